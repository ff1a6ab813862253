use std::{fmt, path::Path};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Server,
    Push,
}

impl DeviceMode {
    /// `SERVER` in any case selects server mode; anything else pushes.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("SERVER") {
            Self::Server
        } else {
            Self::Push
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "SERVER",
            Self::Push => "PUSH",
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {key} must be an integer, got `{value}`")]
    InvalidInteger {
        line: usize,
        key: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub mode: DeviceMode,
    pub ssid: String,
    pub password: String,
    pub sensor_pin: i32,
    pub report_url: String,
    pub sleep_mins: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mode: DeviceMode::Push,
            ssid: "YOUR_WIFI_NAME".to_string(),
            password: "YOUR_WIFI_PASSWORD".to_string(),
            sensor_pin: 16,
            report_url: "http://your-server-ip/api".to_string(),
            sleep_mins: 5,
        }
    }
}

impl DeviceConfig {
    /// Applies `KEY=VALUE` lines on top of the defaults.
    ///
    /// Lines without `=` and unknown keys are skipped. An integer key that
    /// fails to parse rejects the whole text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, line) in text.lines().enumerate() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "MODE" => config.mode = DeviceMode::parse(value),
                "SSID" => config.ssid = value.to_string(),
                "PASSWORD" => config.password = value.to_string(),
                "SENSOR_PIN" => config.sensor_pin = parse_integer(index, "SENSOR_PIN", value)?,
                "REPORT_URL" => config.report_url = value.to_string(),
                "SLEEP_MINS" => config.sleep_mins = parse_integer(index, "SLEEP_MINS", value)?,
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

fn parse_integer<T: std::str::FromStr>(
    index: usize,
    key: &'static str,
    value: &str,
) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidInteger {
        line: index + 1,
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_is_reported_and_defaults_apply() {
        let path = std::env::temp_dir().join("relay-config-does-not-exist.env");

        let err = DeviceConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound));

        let config = DeviceConfig::load(&path).unwrap_or_default();
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn overrides_only_listed_keys() {
        let config = DeviceConfig::parse("SLEEP_MINS=10\n").unwrap();

        assert_eq!(
            config,
            DeviceConfig {
                sleep_mins: 10,
                ..DeviceConfig::default()
            }
        );
    }

    #[test]
    fn parses_full_file() {
        let text = "\
MODE = server
SSID=attic
PASSWORD=p=a=s=s
SENSOR_PIN=22
REPORT_URL=http://10.0.0.5:5000/data
# a comment line
unrelated line
EXTRA=ignored
";
        let config = DeviceConfig::parse(text).unwrap();

        assert_eq!(config.mode, DeviceMode::Server);
        assert_eq!(config.ssid, "attic");
        assert_eq!(config.password, "p=a=s=s");
        assert_eq!(config.sensor_pin, 22);
        assert_eq!(config.report_url, "http://10.0.0.5:5000/data");
        assert_eq!(config.sleep_mins, 5);
    }

    #[test]
    fn unknown_mode_falls_back_to_push() {
        let config = DeviceConfig::parse("MODE=relay").unwrap();
        assert_eq!(config.mode, DeviceMode::Push);
    }

    #[test]
    fn rejects_non_integer_pin() {
        let err = DeviceConfig::parse("SSID=x\nSENSOR_PIN=gp16\n").unwrap_err();

        match err {
            ConfigError::InvalidInteger { line, key, value } => {
                assert_eq!(line, 2);
                assert_eq!(key, "SENSOR_PIN");
                assert_eq!(value, "gp16");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
