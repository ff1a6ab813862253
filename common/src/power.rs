use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSource {
    Usb,
    Battery,
}

/// How the push loop waits between reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepPlan {
    /// Radio off, block, radio back on; the loop keeps running.
    Light(Duration),
    /// Low-power suspend; execution restarts from boot afterwards.
    Deep(Duration),
}

impl SleepPlan {
    // Deep sleep on external power wakes immediately on some boards, so USB
    // power always gets the light variant.
    pub fn for_source(source: PowerSource, sleep_mins: u32) -> Self {
        let interval = Duration::from_secs(u64::from(sleep_mins) * 60);
        match source {
            PowerSource::Usb => Self::Light(interval),
            PowerSource::Battery => Self::Deep(interval),
        }
    }
}
