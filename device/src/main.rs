//! Telemetry relay device.
//!
//! `--features esp32` builds the firmware image. Without it the same boot
//! flow runs on the host against a simulated sensor and Wi-Fi link, so the
//! collector can be exercised end to end from a laptop.

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
