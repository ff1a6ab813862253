use std::time::Duration;

use thiserror::Error;

pub const CONNECT_ATTEMPTS: u32 = 15;
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A station-mode wireless interface.
pub trait WifiLink {
    type Error: std::fmt::Display;

    /// Starts association. Completion is observed through `is_connected`.
    fn associate(&mut self, ssid: &str, password: &str) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    fn set_radio(&mut self, enabled: bool) -> Result<(), Self::Error>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("association with `{ssid}` failed: {reason}")]
    Association { ssid: String, reason: String },
    #[error("not connected after {attempts} polls")]
    Timeout { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: CONNECT_ATTEMPTS,
            interval: CONNECT_POLL_INTERVAL,
        }
    }
}

/// Brings the link up with a fixed linear poll budget.
///
/// `wait` is called between polls; firmware passes a thread sleep.
pub fn connect<L, W>(
    link: &mut L,
    ssid: &str,
    password: &str,
    policy: RetryPolicy,
    mut wait: W,
) -> Result<(), LinkError>
where
    L: WifiLink,
    W: FnMut(Duration),
{
    if link.is_connected() {
        return Ok(());
    }

    link.associate(ssid, password)
        .map_err(|err| LinkError::Association {
            ssid: ssid.to_string(),
            reason: err.to_string(),
        })?;

    for _ in 0..policy.attempts {
        if link.is_connected() {
            return Ok(());
        }
        wait(policy.interval);
    }

    if link.is_connected() {
        Ok(())
    } else {
        Err(LinkError::Timeout {
            attempts: policy.attempts,
        })
    }
}
