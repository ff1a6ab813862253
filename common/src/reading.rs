use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Literal rendered in place of any value the sensor could not provide.
pub const PLACEHOLDER: &str = "--";

pub const ADC_FULL_SCALE: f64 = 65_535.0;
pub const ADC_REFERENCE_VOLTS: f64 = 3.3;
pub const VSYS_DIVIDER_RATIO: f64 = 3.0;

/// A numeric telemetry value, or the placeholder when unavailable.
///
/// On the wire a value is a JSON number and a missing value is `"--"`.
/// Anything non-numeric read back from JSON becomes `Missing`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Metric {
    Value(f64),
    #[default]
    Missing,
}

impl Metric {
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Self::Value(value)
        } else {
            Self::Missing
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(value) => Some(value),
            Self::Missing => None,
        }
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Value(value) => serializer.serialize_f64(*value),
            Self::Missing => serializer.serialize_str(PLACEHOLDER),
        }
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(raw.as_f64().map_or(Self::Missing, Self::from_f64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "Waiting...")]
    Waiting,
}

/// One sensor snapshot. Temperatures are either all numeric and derived from
/// `temp_c`, or all `Missing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub status: ReadingStatus,
    #[serde(default)]
    pub temp_c: Metric,
    #[serde(default)]
    pub temp_f: Metric,
    #[serde(default)]
    pub temp_k: Metric,
    #[serde(default)]
    pub hum: Metric,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsys_volts: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Reading {
    pub fn measured(temp_c: f64, humidity: f64, vsys_volts: f64, runtime_s: u64) -> Self {
        // Derived fields come from the stored Celsius so the collector's
        // recompute lands on the same values.
        let (temp_c, temp_f, temp_k) = if temp_c.is_finite() {
            let temp_c = round_to(temp_c, 1);
            (
                Metric::Value(temp_c),
                Metric::Value(celsius_to_fahrenheit(temp_c)),
                Metric::Value(celsius_to_kelvin(temp_c)),
            )
        } else {
            (Metric::Missing, Metric::Missing, Metric::Missing)
        };

        Self {
            status: ReadingStatus::Ok,
            temp_c,
            temp_f,
            temp_k,
            hum: Metric::from_f64(humidity),
            vsys_volts: Some(vsys_volts),
            runtime_s: Some(runtime_s),
            time: None,
            message: None,
        }
    }

    /// Error record for a failed measurement. Supply voltage is still reported.
    pub fn fault(message: impl Into<String>, vsys_volts: f64) -> Self {
        Self {
            status: ReadingStatus::Error,
            temp_c: Metric::Missing,
            temp_f: Metric::Missing,
            temp_k: Metric::Missing,
            hum: Metric::Missing,
            vsys_volts: Some(vsys_volts),
            runtime_s: None,
            time: None,
            message: Some(message.into()),
        }
    }

    /// What the collector serves before its first ingest.
    pub fn waiting() -> Self {
        Self {
            status: ReadingStatus::Waiting,
            temp_c: Metric::Missing,
            temp_f: Metric::Missing,
            temp_k: Metric::Missing,
            hum: Metric::Missing,
            vsys_volts: None,
            runtime_s: None,
            time: Some("No data yet".to_string()),
            message: None,
        }
    }

    pub fn to_document(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(document)) => document,
            _ => Map::new(),
        }
    }
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}

pub fn celsius_to_fahrenheit(temp_c: f64) -> f64 {
    round_to(temp_c * 9.0 / 5.0 + 32.0, 1)
}

pub fn celsius_to_kelvin(temp_c: f64) -> f64 {
    round_to(temp_c + 273.15, 2)
}

/// Supply voltage from a 16-bit ADC sample taken behind the VSYS divider.
pub fn vsys_volts(raw_adc: u16) -> f64 {
    let volts = f64::from(raw_adc) / ADC_FULL_SCALE * ADC_REFERENCE_VOLTS * VSYS_DIVIDER_RATIO;
    round_to(volts, 2)
}

/// Interprets a JSON value as a number the way a lenient float parse would:
/// numbers and numeric strings pass, everything else is `None`.
pub fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|value| value.is_finite())
}

/// Recomputes `temp_f` and `temp_k` from a document's `temp_c`.
///
/// Documents without `temp_c` are left alone. A non-numeric `temp_c` marks
/// both derived fields with the placeholder.
pub fn apply_derived_temperatures(document: &mut Map<String, Value>) {
    let Some(temp_c) = document.get("temp_c").map(numeric) else {
        return;
    };

    let (temp_f, temp_k) = match temp_c {
        Some(temp_c) => (
            Value::from(celsius_to_fahrenheit(temp_c)),
            Value::from(celsius_to_kelvin(temp_c)),
        ),
        None => (Value::from(PLACEHOLDER), Value::from(PLACEHOLDER)),
    };

    document.insert("temp_f".to_string(), temp_f);
    document.insert("temp_k".to_string(), temp_k);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn derived_units_follow_celsius() {
        for tenths in -400..=600 {
            let temp_c = f64::from(tenths) / 10.0;
            let reading = Reading::measured(temp_c, 40.0, 4.5, 10);

            assert_eq!(
                reading.temp_f,
                Metric::Value(round_to(temp_c * 9.0 / 5.0 + 32.0, 1))
            );
            assert_eq!(reading.temp_k, Metric::Value(round_to(temp_c + 273.15, 2)));
        }
    }

    #[test]
    fn known_conversions() {
        assert_eq!(celsius_to_fahrenheit(22.0), 71.6);
        assert_eq!(celsius_to_fahrenheit(-40.0), -40.0);
        assert_eq!(celsius_to_kelvin(20.0), 293.15);
        assert_eq!(celsius_to_kelvin(0.0), 273.15);
    }

    #[test]
    fn vsys_uses_divider_ratio() {
        assert_eq!(vsys_volts(0), 0.0);
        assert_eq!(vsys_volts(u16::MAX), 9.9);
        assert_eq!(vsys_volts(20_000), 3.02);
    }

    #[test]
    fn fault_keeps_voltage_and_placeholders() {
        let reading = Reading::fault("checksum mismatch", 4.2);

        assert_eq!(
            serde_json::to_value(&reading).unwrap(),
            json!({
                "status": "error",
                "temp_c": "--",
                "temp_f": "--",
                "temp_k": "--",
                "hum": "--",
                "vsys_volts": 4.2,
                "message": "checksum mismatch",
            })
        );
    }

    #[test]
    fn measured_reading_wire_form() {
        let reading = Reading::measured(21.04, 45.0, 4.71, 3_600);

        assert_eq!(
            serde_json::to_value(&reading).unwrap(),
            json!({
                "status": "ok",
                "temp_c": 21.0,
                "temp_f": 69.8,
                "temp_k": 294.15,
                "hum": 45.0,
                "vsys_volts": 4.71,
                "runtime_s": 3600,
            })
        );
    }

    #[test]
    fn collector_recompute_agrees_with_device_reading() {
        for temp_c in [-12.36, -0.04, 0.0, 18.95, 21.04, 21.05, 32.27, 39.99] {
            let reading = Reading::measured(temp_c, 40.0, 4.5, 1);
            let sent = reading.to_document();

            let mut recomputed = sent.clone();
            apply_derived_temperatures(&mut recomputed);

            assert_eq!(recomputed["temp_f"], sent["temp_f"], "temp_f for {temp_c}");
            assert_eq!(recomputed["temp_k"], sent["temp_k"], "temp_k for {temp_c}");
        }
    }

    #[test]
    fn waiting_document_is_all_placeholders() {
        assert_eq!(
            Value::Object(Reading::waiting().to_document()),
            json!({
                "temp_c": "--",
                "temp_f": "--",
                "temp_k": "--",
                "hum": "--",
                "status": "Waiting...",
                "time": "No data yet",
            })
        );
    }

    #[test]
    fn placeholder_round_trips_as_missing() {
        let reading: Reading =
            serde_json::from_value(json!({"status": "ok", "temp_c": "--", "hum": 50})).unwrap();

        assert_eq!(reading.temp_c, Metric::Missing);
        assert_eq!(reading.temp_f, Metric::Missing);
        assert_eq!(reading.hum, Metric::Value(50.0));
    }

    #[test]
    fn derived_temperatures_on_documents() {
        let mut document = json!({"temp_c": 20}).as_object().unwrap().clone();
        apply_derived_temperatures(&mut document);
        assert_eq!(document["temp_f"], json!(68.0));
        assert_eq!(document["temp_k"], json!(293.15));

        let mut document = json!({"temp_c": "21.5"}).as_object().unwrap().clone();
        apply_derived_temperatures(&mut document);
        assert_eq!(document["temp_k"], json!(294.65));

        let mut document = json!({"temp_c": "warm", "temp_k": 1}).as_object().unwrap().clone();
        apply_derived_temperatures(&mut document);
        assert_eq!(document["temp_f"], json!("--"));
        assert_eq!(document["temp_k"], json!("--"));

        let mut document = json!({"hum": 40, "temp_k": 300}).as_object().unwrap().clone();
        apply_derived_temperatures(&mut document);
        assert_eq!(document.get("temp_f"), None);
        assert_eq!(document["temp_k"], json!(300));
    }
}
