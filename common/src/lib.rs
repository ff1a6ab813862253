pub mod config;
pub mod dashboard;
pub mod http;
pub mod link;
pub mod power;
pub mod reading;

pub use config::{ConfigError, DeviceConfig, DeviceMode};
pub use dashboard::{display_value, render_dashboard, TempBand, DEFAULT_REFRESH_MS};
pub use http::{HttpError, Response, Route};
pub use link::{connect, LinkError, RetryPolicy, WifiLink};
pub use power::{PowerSource, SleepPlan};
pub use reading::{Metric, Reading, ReadingStatus, PLACEHOLDER};
