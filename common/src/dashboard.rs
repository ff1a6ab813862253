use serde_json::{Map, Value};

use crate::reading::{numeric, PLACEHOLDER};

pub const DEFAULT_REFRESH_MS: u64 = 30_000;
pub const COOL_BELOW_F: f64 = 60.0;
pub const HOT_ABOVE_F: f64 = 85.0;

/// Colour/icon band picked from the Fahrenheit reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempBand {
    Cool,
    Neutral,
    Hot,
    Unknown,
}

impl TempBand {
    /// A missing `temp_f` counts as 0°F. Values that don't parse as a number
    /// land in `Unknown`.
    pub fn classify(temp_f: Option<&Value>) -> Self {
        let temp_f = match temp_f {
            None => Some(0.0),
            Some(value) => numeric(value),
        };

        match temp_f {
            Some(temp) if temp < COOL_BELOW_F => Self::Cool,
            Some(temp) if temp > HOT_ABOVE_F => Self::Hot,
            Some(_) => Self::Neutral,
            None => Self::Unknown,
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Cool => "#3b82f6",
            Self::Neutral => "#10b981",
            Self::Hot => "#ef4444",
            Self::Unknown => "#64748b",
        }
    }

    /// SVG body drawn inside a 24x24 viewBox.
    pub fn icon(self) -> &'static str {
        match self {
            Self::Cool => {
                r#"<path d="M12 2v20M4.93 4.93l14.14 14.14M2 12h20M4.93 19.07L19.07 4.93"></path>"#
            }
            Self::Neutral => {
                r#"<path d="M14 14.76V3.5a2.5 2.5 0 0 0-5 0v11.26a4.5 4.5 0 1 0 5 0z"></path>"#
            }
            Self::Hot => {
                r#"<circle cx="12" cy="12" r="4"></circle><path d="M12 2v2M12 20v2M4.93 4.93l1.41 1.41M17.66 17.66l1.41 1.41M2 12h2M20 12h2M6.34 17.66l-1.41 1.41M19.07 4.93l-1.41 1.41"></path>"#
            }
            Self::Unknown => r#"<circle cx="12" cy="12" r="10"></circle>"#,
        }
    }
}

/// Renders the single-card status page for a reading document.
pub fn render_dashboard(document: &Map<String, Value>, default_refresh_ms: u64) -> String {
    let band = TempBand::classify(document.get("temp_f"));
    let refresh_ms = document
        .get("refresh_ms")
        .and_then(Value::as_u64)
        .unwrap_or(default_refresh_ms);

    let temp_f = field(document, "temp_f");
    let temp_c = field(document, "temp_c");
    let hum = field(document, "hum");
    let vsys = field(document, "vsys_volts");
    let temp_k = field(document, "temp_k");
    let updated = ["time", "runtime_s"]
        .into_iter()
        .find(|key| document.contains_key(*key))
        .map_or_else(|| "Live".to_string(), |key| field(document, key));

    let accent = band.color();
    let icon = band.icon();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8"><meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Env Monitor</title>
<style>
:root {{ --ink: #0f172a; --accent: {accent}; --bg: #f8fafc; }}
body {{ margin: 0; height: 100vh; display: flex; align-items: center; justify-content: center; background: var(--bg); color: var(--ink); font-family: -apple-system, sans-serif; }}
.card {{ width: 90%; max-width: 350px; padding: 2.5rem; text-align: center; background: white; border-radius: 2rem; border-top: 8px solid var(--accent); box-shadow: 0 25px 50px -12px rgba(0,0,0,0.1); }}
.icon {{ color: var(--accent); margin-bottom: 1rem; }}
svg {{ width: 64px; height: 64px; fill: none; stroke: currentColor; stroke-width: 2; stroke-linecap: round; stroke-linejoin: round; }}
.label {{ font-size: 0.85rem; font-weight: 700; letter-spacing: 0.15em; text-transform: uppercase; color: #64748b; }}
.reading {{ font-size: 5rem; font-weight: 900; margin: 0.5rem 0; }}
.grid {{ display: flex; justify-content: space-around; margin: 2rem 0; padding: 1.5rem 0; border-top: 1px solid #f1f5f9; border-bottom: 1px solid #f1f5f9; }}
.stat {{ display: flex; flex-direction: column; }}
.stat-label {{ font-size: 0.7rem; font-weight: 800; color: #94a3b8; }}
.stat-val {{ font-size: 1.1rem; font-weight: 700; color: #475569; }}
.tag {{ display: inline-block; padding: 8px 15px; border-radius: 20px; background: var(--bg); color: var(--accent); font-size: 0.9rem; font-weight: 600; }}
.footer {{ margin-top: 2rem; font-size: 0.7rem; color: #cbd5e1; }}
</style>
<script>setTimeout(() => location.reload(), {refresh_ms});</script>
</head>
<body>
<div class="card">
<div class="icon"><svg viewBox="0 0 24 24">{icon}</svg></div>
<div class="label">Conditions</div>
<div class="reading">{temp_f}°</div>
<div class="grid">
<div class="stat"><span class="stat-label">CELSIUS</span><span class="stat-val">{temp_c}°C</span></div>
<div class="stat"><span class="stat-label">HUMIDITY</span><span class="stat-val">{hum}%</span></div>
<div class="stat"><span class="stat-label">VOLTAGE</span><span class="stat-val">{vsys}V</span></div>
</div>
<div class="tag">{temp_k} Kelvin</div>
<div class="footer">Updated: {updated}</div>
</div>
</body>
</html>"#
    )
}

/// Plain-text form of a document value: strings unquoted, absent or null
/// values as the placeholder.
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => PLACEHOLDER.to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn field(document: &Map<String, Value>, key: &str) -> String {
    escape_html(&display_value(document.get(key)))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn display_value_unquotes_and_fills_gaps() {
        assert_eq!(display_value(Some(&json!("Waiting..."))), "Waiting...");
        assert_eq!(display_value(Some(&json!(68.5))), "68.5");
        assert_eq!(display_value(Some(&json!(null))), PLACEHOLDER);
        assert_eq!(display_value(None), PLACEHOLDER);
    }

    #[test]
    fn bands_by_fahrenheit() {
        assert_eq!(TempBand::classify(Some(&json!(50))), TempBand::Cool);
        assert_eq!(TempBand::classify(Some(&json!(90.0))), TempBand::Hot);
        assert_eq!(TempBand::classify(Some(&json!(70))), TempBand::Neutral);
        assert_eq!(TempBand::classify(Some(&json!(60))), TempBand::Neutral);
        assert_eq!(TempBand::classify(Some(&json!(85))), TempBand::Neutral);
        assert_eq!(TempBand::classify(Some(&json!("88.5"))), TempBand::Hot);
        assert_eq!(TempBand::classify(Some(&json!("--"))), TempBand::Unknown);
        assert_eq!(TempBand::classify(Some(&json!(null))), TempBand::Unknown);
        assert_eq!(TempBand::classify(None), TempBand::Cool);
    }

    #[test]
    fn page_shows_fahrenheit_and_band() {
        let cool = render_dashboard(&document(json!({"temp_f": 50})), DEFAULT_REFRESH_MS);
        assert!(cool.contains("<div class=\"reading\">50°</div>"));
        assert!(cool.contains(TempBand::Cool.color()));
        assert!(cool.contains(TempBand::Cool.icon()));

        let hot = render_dashboard(&document(json!({"temp_f": 90})), DEFAULT_REFRESH_MS);
        assert!(hot.contains(TempBand::Hot.color()));
        assert!(hot.contains(TempBand::Hot.icon()));

        let neutral = render_dashboard(&document(json!({"temp_f": 70})), DEFAULT_REFRESH_MS);
        assert!(neutral.contains(TempBand::Neutral.color()));
        assert!(neutral.contains(TempBand::Neutral.icon()));

        let gray = render_dashboard(&document(json!({"temp_f": "--"})), DEFAULT_REFRESH_MS);
        assert!(gray.contains(TempBand::Unknown.color()));
        assert!(gray.contains(TempBand::Unknown.icon()));
    }

    #[test]
    fn missing_fields_render_placeholder() {
        let page = render_dashboard(&Map::new(), DEFAULT_REFRESH_MS);

        assert!(page.contains("<span class=\"stat-val\">--°C</span>"));
        assert!(page.contains("<span class=\"stat-val\">--%</span>"));
        assert!(page.contains("<span class=\"stat-val\">--V</span>"));
        assert!(page.contains("-- Kelvin"));
        assert!(page.contains("Updated: Live"));
    }

    #[test]
    fn refresh_timer() {
        let page = render_dashboard(&Map::new(), DEFAULT_REFRESH_MS);
        assert!(page.contains("location.reload(), 30000)"));

        let page = render_dashboard(&document(json!({"refresh_ms": 5000})), DEFAULT_REFRESH_MS);
        assert!(page.contains("location.reload(), 5000)"));
    }

    #[test]
    fn footer_prefers_collector_time() {
        let page = render_dashboard(
            &document(json!({"time": "09:15:02 PM", "runtime_s": 40})),
            DEFAULT_REFRESH_MS,
        );
        assert!(page.contains("Updated: 09:15:02 PM"));

        let page = render_dashboard(&document(json!({"runtime_s": 40})), DEFAULT_REFRESH_MS);
        assert!(page.contains("Updated: 40"));
    }

    #[test]
    fn escapes_text_fields() {
        let page = render_dashboard(
            &document(json!({"time": "<script>alert(1)</script>"})),
            DEFAULT_REFRESH_MS,
        );
        assert!(!page.contains("<script>alert"));
        assert!(page.contains("&lt;script&gt;"));
    }
}
