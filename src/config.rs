use chrono::{DateTime, Utc};

/// Caller-supplied values that take precedence over anything in the input.
#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    pub distance_meters: Option<f64>,
    pub total_time_seconds: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
}

impl NormalizeOptions {
    /// Distance override, only when positive
    pub fn distance(&self) -> Option<f64> {
        positive(self.distance_meters)
    }

    /// Total time override, only when positive
    pub fn total_time(&self) -> Option<f64> {
        positive(self.total_time_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Written to the root `creator` attribute
    pub creator: String,
    /// Decimal places for cumulative trackpoint distances
    pub distance_precision: usize,
    /// Decimal places for per-point speed and `MaximumSpeed`
    pub speed_precision: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            creator: env!("CARGO_PKG_NAME").to_string(),
            distance_precision: 3,
            speed_precision: 3,
        }
    }
}

impl OutputConfig {
    /// Speed annotations at 6 places, as older uploads of this tool wrote them
    pub fn source_compatible() -> Self {
        OutputConfig {
            speed_precision: 6,
            ..Default::default()
        }
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }
}

/// `value` when it is a finite number above zero
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}
