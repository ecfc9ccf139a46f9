/// Canonical activity model shared by both input dialects

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tracing::warn;

pub const DEFAULT_SPORT: &str = "Running";
pub const DEFAULT_NOTES: &str = "Run";

#[derive(Debug, Clone, PartialEq)]
pub struct Trackpoint {
    pub time: Option<DateTime<Utc>>,
    /// Cumulative distance from the start of the track
    pub distance_meters: f64,
    pub heart_rate_bpm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityTrack {
    pub sport: String,
    /// Raw `Id` text; normalization replaces it with the start instant
    pub activity_id: String,
    pub notes: Option<String>,
    pub creator: Option<String>,
    pub total_time_seconds: Option<f64>,
    pub total_distance_meters: Option<f64>,
    pub maximum_speed: Option<f64>,
    pub average_heart_rate_bpm: Option<f64>,
    pub maximum_heart_rate_bpm: Option<f64>,
    /// Chronological; order is preserved through normalization
    pub trackpoints: Vec<Trackpoint>,
}

impl Default for ActivityTrack {
    fn default() -> Self {
        ActivityTrack {
            sport: DEFAULT_SPORT.to_string(),
            activity_id: String::new(),
            notes: None,
            creator: None,
            total_time_seconds: None,
            total_distance_meters: None,
            maximum_speed: None,
            average_heart_rate_bpm: None,
            maximum_heart_rate_bpm: None,
            trackpoints: Vec::new(),
        }
    }
}

impl ActivityTrack {
    /// Seconds between the first and last trackpoint, when both are timed
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let first = self.trackpoints.first()?.time?;
        let last = self.trackpoints.last()?.time?;
        Some((last - first).num_milliseconds() as f64 / 1000.0)
    }
}

/// Numeric field text to a value. Present-but-garbled text is logged and
/// treated as absent so it falls through to the next resolution source.
pub fn parse_number(field: &str, text: Option<&str>) -> Option<f64> {
    let text = text?.trim();
    if text.is_empty() {
        return None;
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            warn!("ignoring non-numeric {} value {:?}", field, text);
            None
        }
    }
}

/// RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS` taken as UTC.
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// UTC instant with a `Z` suffix; fractional seconds only when non-zero.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn format_fixed(value: f64, precision: usize) -> String {
    format!("{:.*}", precision, value)
}

/// `value` rounded to `precision` decimal places
pub fn round_to(value: f64, precision: usize) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}
