use super::SegmentationError;

/// Default cap applied to emitted fixation durations (time units of the
/// sample stream, milliseconds for glasses recordings).
pub const FIXATION_MAX_DURATION: u64 = 1000;

/// Spatial spread measure used by the I-DT window test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionMetric {
    /// Maximum Euclidean distance of a window point from the window centroid.
    #[default]
    CentroidRadius,
    /// `(max_x - min_x) + (max_y - min_y)` as in Salvucci & Goldberg.
    BoundingBoxSum,
}

/// Configuration for the dispersion-threshold (I-DT) fixation filter.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct IdtConfig {
    /// Maximum dispersion (spatial units) of a fixation window, inclusive.
    pub dispersion_threshold: f64,
    /// Time span collected into the initial window before the dispersion test.
    pub duration_threshold: f64,
    /// Spread measure applied to both window entry and growth.
    pub metric: DispersionMetric,
    /// Upper bound for emitted fixation durations.
    pub max_fixation_duration: u64,
    /// Emit a saccade between every pair of consecutive fixations.
    pub emit_saccades: bool,
}

impl Default for IdtConfig {
    fn default() -> Self {
        Self {
            dispersion_threshold: 10.0,
            duration_threshold: 100.0,
            metric: DispersionMetric::CentroidRadius,
            max_fixation_duration: FIXATION_MAX_DURATION,
            emit_saccades: false,
        }
    }
}

impl IdtConfig {
    pub fn new(dispersion_threshold: f64, duration_threshold: f64) -> Self {
        Self {
            dispersion_threshold,
            duration_threshold,
            ..Self::default()
        }
    }

    /// Reject thresholds that are NaN or negative.
    pub fn validate(&self) -> Result<(), SegmentationError> {
        if self.dispersion_threshold.is_nan() || self.dispersion_threshold < 0.0 {
            return Err(SegmentationError::InvalidThreshold {
                name: "dispersion_threshold",
                value: self.dispersion_threshold,
            });
        }
        if !self.duration_threshold.is_finite() || self.duration_threshold < 0.0 {
            return Err(SegmentationError::InvalidThreshold {
                name: "duration_threshold",
                value: self.duration_threshold,
            });
        }
        Ok(())
    }
}
