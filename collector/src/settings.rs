use std::path::PathBuf;

use chrono_tz::Tz;
use tracing::warn;

use relay_common::DEFAULT_REFRESH_MS;

pub const LATEST_FILE: &str = "latest.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSettings {
    pub port: u16,
    pub store: StoreKind,
    pub data_dir: PathBuf,
    pub timezone: Option<Tz>,
    pub refresh_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            port: 5000,
            store: StoreKind::Memory,
            data_dir: PathBuf::from("./.relay"),
            timezone: None,
            refresh_ms: DEFAULT_REFRESH_MS,
        }
    }
}

impl CollectorSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let port = lookup("COLLECTOR_HTTP_PORT")
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let store = match lookup("COLLECTOR_STORE").as_deref().map(str::trim) {
            Some(kind) if kind.eq_ignore_ascii_case("file") => StoreKind::File,
            Some(kind) if !kind.is_empty() && !kind.eq_ignore_ascii_case("memory") => {
                warn!("unknown COLLECTOR_STORE `{kind}`, using memory");
                StoreKind::Memory
            }
            _ => defaults.store,
        };

        let data_dir = lookup("COLLECTOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let timezone = lookup("COLLECTOR_TIMEZONE").and_then(|name| match name.parse::<Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!("unknown COLLECTOR_TIMEZONE `{name}`, using system local time");
                None
            }
        });

        let refresh_ms = lookup("COLLECTOR_REFRESH_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(defaults.refresh_ms);

        Self {
            port,
            store,
            data_dir,
            timezone,
            refresh_ms,
        }
    }

    pub fn latest_path(&self) -> PathBuf {
        self.data_dir.join(LATEST_FILE)
    }
}
