//! Fixation/saccade segmentation of timestamped gaze positions.
//!
//! Two filters are provided:
//! - [`IdtFilter`]: dispersion-threshold identification (Salvucci & Goldberg).
//! - [`RawFilter`]: every sample becomes a fixation lasting until the next one.
//!
//! Both assign event indices per call, starting at zero.

mod config;
mod idt;
mod raw;

pub use config::{DispersionMetric, IdtConfig, FIXATION_MAX_DURATION};
pub use idt::{dispersion, IdtFilter};
pub use raw::RawFilter;

use crate::sample::{GazeSample, SampleError};

/// Errors that abort a segmentation run.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentationError {
    /// Parallel input columns have different lengths.
    LengthMismatch { ts: usize, x: usize, y: usize },
    /// A threshold is NaN, negative, or otherwise unusable.
    InvalidThreshold { name: &'static str, value: f64 },
    /// Sample timestamps are not finite and non-decreasing.
    Samples(SampleError),
}

impl std::fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch { ts, x, y } => write!(
                f,
                "input length mismatch: {} timestamps, {} x values, {} y values",
                ts, x, y
            ),
            Self::InvalidThreshold { name, value } => {
                write!(f, "invalid {}: {}", name, value)
            }
            Self::Samples(e) => write!(f, "invalid samples: {}", e),
        }
    }
}

impl std::error::Error for SegmentationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Samples(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SampleError> for SegmentationError {
    fn from(e: SampleError) -> Self {
        Self::Samples(e)
    }
}

/// A fixation: window start timestamp, rounded centroid, capped duration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FixationEvent {
    pub ts: f64,
    pub index: u32,
    pub duration: u64,
    pub x: i64,
    pub y: i64,
}

/// A saccade between two fixations.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SaccadeEvent {
    pub ts: f64,
    pub index: u32,
    pub duration: u64,
    pub start_x: f64,
    pub start_y: f64,
    pub end_x: f64,
    pub end_y: f64,
}

/// Output of one segmentation run, both lists ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Segmentation {
    pub fixations: Vec<FixationEvent>,
    pub saccades: Vec<SaccadeEvent>,
}

/// A fixation-identification strategy over an ordered sample stream.
pub trait FixationFilter {
    /// Segment `samples` (timestamps non-decreasing) into events.
    fn filter(&self, samples: &[GazeSample]) -> Result<Segmentation, SegmentationError>;
}

/// Segment parallel `ts`/`x`/`y` columns with the I-DT filter.
pub fn segment_xy(
    ts: &[f64],
    x: &[f64],
    y: &[f64],
    config: &IdtConfig,
) -> Result<Segmentation, SegmentationError> {
    let samples = zip_columns(ts, x, y)?;
    IdtFilter::new(config.clone()).filter(&samples)
}

/// Build samples from parallel columns, failing when lengths differ.
pub fn zip_columns(ts: &[f64], x: &[f64], y: &[f64]) -> Result<Vec<GazeSample>, SegmentationError> {
    if ts.len() != x.len() || x.len() != y.len() {
        return Err(SegmentationError::LengthMismatch {
            ts: ts.len(),
            x: x.len(),
            y: y.len(),
        });
    }
    Ok(ts
        .iter()
        .zip(x.iter().zip(y.iter()))
        .map(|(&t, (&x, &y))| GazeSample::new(t, x, y))
        .collect())
}

/// Round a finite centroid to integer coordinates, or `None` for NaN/Inf.
pub(crate) fn finite_rounded(c: [f64; 2]) -> Option<(i64, i64)> {
    if c[0].is_finite() && c[1].is_finite() {
        Some((c[0].round() as i64, c[1].round() as i64))
    } else {
        None
    }
}

/// Clamp a non-negative span to `[0, cap]` and round to integer time units.
pub(crate) fn capped_duration(span: f64, cap: u64) -> u64 {
    if !span.is_finite() || span <= 0.0 {
        return 0;
    }
    (span.min(cap as f64)).round() as u64
}
