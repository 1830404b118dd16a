//! Raw gaze samples and the ordered sample series used for timestamp lookup.

use std::path::Path;

/// One gaze sample: timestamp and 2D position (frame pixels for
/// scene-camera gaze).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GazeSample {
    pub ts: f64,
    pub x: f64,
    pub y: f64,
}

impl GazeSample {
    pub fn new(ts: f64, x: f64, y: f64) -> Self {
        Self { ts, x, y }
    }

    /// Position as `[x, y]`.
    pub fn xy(&self) -> [f64; 2] {
        [self.x, self.y]
    }
}

/// Ordering violations in a sample stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    /// Timestamp is NaN or infinite.
    NonFiniteTimestamp { index: usize },
    /// Timestamp is smaller than its predecessor.
    OutOfOrder { index: usize, prev_ts: f64, ts: f64 },
}

impl std::fmt::Display for SampleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFiniteTimestamp { index } => {
                write!(f, "sample {} has a non-finite timestamp", index)
            }
            Self::OutOfOrder { index, prev_ts, ts } => write!(
                f,
                "sample {} is out of order: ts {} follows ts {}",
                index, ts, prev_ts
            ),
        }
    }
}

impl std::error::Error for SampleError {}

/// Check that timestamps are finite and non-decreasing.
pub fn validate_order(samples: &[GazeSample]) -> Result<(), SampleError> {
    let mut prev: Option<f64> = None;
    for (index, s) in samples.iter().enumerate() {
        if !s.ts.is_finite() {
            return Err(SampleError::NonFiniteTimestamp { index });
        }
        if let Some(prev_ts) = prev {
            if s.ts < prev_ts {
                return Err(SampleError::OutOfOrder {
                    index,
                    prev_ts,
                    ts: s.ts,
                });
            }
        }
        prev = Some(s.ts);
    }
    Ok(())
}

/// Validated, timestamp-ordered gaze samples with nearest-neighbour lookup.
#[derive(Debug, Clone, Default)]
pub struct GazeSeries {
    samples: Vec<GazeSample>,
}

impl GazeSeries {
    pub fn new(samples: Vec<GazeSample>) -> Result<Self, SampleError> {
        validate_order(&samples)?;
        Ok(Self { samples })
    }

    /// Load a JSON array of `{"ts", "x", "y"}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let samples: Vec<GazeSample> = serde_json::from_str(&data)?;
        Ok(Self::new(samples)?)
    }

    pub fn samples(&self) -> &[GazeSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sample whose timestamp is closest to `ts`. Ties resolve to the
    /// earlier sample.
    pub fn nearest(&self, ts: f64) -> Option<&GazeSample> {
        if self.samples.is_empty() || ts.is_nan() {
            return None;
        }
        let idx = self.samples.partition_point(|s| s.ts < ts);
        if idx == 0 {
            return self.samples.first();
        }
        if idx == self.samples.len() {
            return self.samples.last();
        }
        let before = &self.samples[idx - 1];
        let after = &self.samples[idx];
        if ts - before.ts <= after.ts - ts {
            Some(before)
        } else {
            Some(after)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(ts: &[f64]) -> GazeSeries {
        GazeSeries::new(ts.iter().map(|&t| GazeSample::new(t, t, -t)).collect()).unwrap()
    }

    #[test]
    fn nearest_picks_closest_and_prefers_earlier_on_tie() {
        let s = series(&[0.0, 10.0, 20.0, 40.0]);
        assert_eq!(s.nearest(-5.0).unwrap().ts, 0.0);
        assert_eq!(s.nearest(12.0).unwrap().ts, 10.0);
        assert_eq!(s.nearest(16.0).unwrap().ts, 20.0);
        assert_eq!(s.nearest(30.0).unwrap().ts, 20.0);
        assert_eq!(s.nearest(100.0).unwrap().ts, 40.0);
        assert_eq!(s.nearest(20.0).unwrap().ts, 20.0);
    }

    #[test]
    fn nearest_on_empty_series_is_none() {
        assert!(GazeSeries::default().nearest(1.0).is_none());
    }

    #[test]
    fn out_of_order_samples_are_rejected() {
        let samples = vec![
            GazeSample::new(0.0, 0.0, 0.0),
            GazeSample::new(5.0, 0.0, 0.0),
            GazeSample::new(4.0, 0.0, 0.0),
        ];
        let err = GazeSeries::new(samples).unwrap_err();
        assert_eq!(
            err,
            SampleError::OutOfOrder {
                index: 2,
                prev_ts: 5.0,
                ts: 4.0
            }
        );
    }

    #[test]
    fn duplicate_timestamps_are_accepted() {
        let samples = vec![GazeSample::new(1.0, 0.0, 0.0), GazeSample::new(1.0, 2.0, 2.0)];
        assert!(validate_order(&samples).is_ok());
    }

    #[test]
    fn nan_timestamp_is_rejected() {
        let samples = vec![GazeSample::new(f64::NAN, 0.0, 0.0)];
        assert_eq!(
            validate_order(&samples),
            Err(SampleError::NonFiniteTimestamp { index: 0 })
        );
    }
}
