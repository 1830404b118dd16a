//! Dispersion-threshold fixation identification (I-DT).
//!
//! Salvucci & Goldberg, "Identifying fixations and saccades in eye-tracking
//! protocols", ETRA 2000.
//!
//! Window policy:
//! - the initial window holds the cursor sample, its successor, and every
//!   further sample within `duration_threshold` of the cursor timestamp;
//! - a window whose dispersion is `<= dispersion_threshold` grows one sample
//!   at a time; the first sample that pushes the dispersion over the
//!   threshold closes the window and becomes the next cursor;
//! - at end of input the window closes at the last sample;
//! - a window over the threshold advances the cursor by one sample.

use std::ops::Range;

use crate::sample::{validate_order, GazeSample};

use super::{
    capped_duration, finite_rounded, DispersionMetric, FixationEvent, FixationFilter, IdtConfig,
    SaccadeEvent, Segmentation, SegmentationError,
};

fn centroid(window: &[GazeSample]) -> [f64; 2] {
    let n = window.len() as f64;
    let sx: f64 = window.iter().map(|s| s.x).sum();
    let sy: f64 = window.iter().map(|s| s.y).sum();
    [sx / n, sy / n]
}

/// Dispersion of a window under `metric`. Empty windows have zero spread.
pub fn dispersion(window: &[GazeSample], metric: DispersionMetric) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    match metric {
        DispersionMetric::CentroidRadius => {
            let c = centroid(window);
            window
                .iter()
                .map(|s| ((s.x - c[0]).powi(2) + (s.y - c[1]).powi(2)).sqrt())
                .fold(0.0, |acc: f64, d| {
                    if acc.is_nan() || d.is_nan() {
                        f64::NAN
                    } else {
                        acc.max(d)
                    }
                })
        }
        DispersionMetric::BoundingBoxSum => {
            let mut min_x = f64::INFINITY;
            let mut max_x = f64::NEG_INFINITY;
            let mut min_y = f64::INFINITY;
            let mut max_y = f64::NEG_INFINITY;
            for s in window {
                if s.x.is_nan() || s.y.is_nan() {
                    return f64::NAN;
                }
                min_x = min_x.min(s.x);
                max_x = max_x.max(s.x);
                min_y = min_y.min(s.y);
                max_y = max_y.max(s.y);
            }
            (max_x - min_x) + (max_y - min_y)
        }
    }
}

/// I-DT fixation filter.
#[derive(Debug, Clone, Default)]
pub struct IdtFilter {
    config: IdtConfig,
}

impl IdtFilter {
    pub fn new(config: IdtConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IdtConfig {
        &self.config
    }

    // NaN dispersion never qualifies.
    fn within(&self, window: &[GazeSample]) -> bool {
        dispersion(window, self.config.metric) <= self.config.dispersion_threshold
    }

    /// Sample index ranges of the closed fixation windows, in order.
    ///
    /// Windows never overlap and each holds at least two samples.
    pub fn windows(&self, samples: &[GazeSample]) -> Vec<Range<usize>> {
        let n = samples.len();
        let mut out = Vec::new();
        let mut start = 0usize;

        while start + 1 < n {
            let t0 = samples[start].ts;
            let mut end = start + 2;
            while end < n && samples[end].ts - t0 <= self.config.duration_threshold {
                end += 1;
            }

            if !self.within(&samples[start..end]) {
                tracing::trace!(start, end, "window over dispersion threshold");
                start += 1;
                continue;
            }

            while end < n && self.within(&samples[start..end + 1]) {
                end += 1;
            }

            tracing::trace!(start, end, "fixation window closed");
            out.push(start..end);
            start = end;
        }
        out
    }
}

impl FixationFilter for IdtFilter {
    fn filter(&self, samples: &[GazeSample]) -> Result<Segmentation, SegmentationError> {
        self.config.validate()?;
        validate_order(samples)?;

        let mut seg = Segmentation::default();
        let mut last_window: Option<(usize, FixationEvent)> = None;

        for window in self.windows(samples) {
            let pts = &samples[window.clone()];
            let Some((x, y)) = finite_rounded(centroid(pts)) else {
                tracing::debug!(
                    ts = pts[0].ts,
                    "dropping fixation with non-finite centroid"
                );
                continue;
            };
            let first_ts = pts[0].ts;
            let last_ts = pts[pts.len() - 1].ts;
            let fixation = FixationEvent {
                ts: first_ts,
                index: seg.fixations.len() as u32,
                duration: capped_duration(last_ts - first_ts, self.config.max_fixation_duration),
                x,
                y,
            };

            if self.config.emit_saccades {
                if let Some((prev_end, prev)) = last_window {
                    let from_ts = samples[prev_end - 1].ts;
                    // A saccade shares its key with the fixation it would
                    // shadow when no time separates the two windows.
                    if from_ts == first_ts || from_ts == prev.ts {
                        tracing::debug!(ts = from_ts, "skipping zero-length saccade");
                    } else {
                        seg.saccades.push(SaccadeEvent {
                            ts: from_ts,
                            index: seg.saccades.len() as u32,
                            duration: capped_duration(first_ts - from_ts, u64::MAX),
                            start_x: prev.x as f64,
                            start_y: prev.y as f64,
                            end_x: x as f64,
                            end_y: y as f64,
                        });
                    }
                }
            }

            last_window = Some((window.end, fixation));
            seg.fixations.push(fixation);
        }

        tracing::info!(
            "I-DT segmented {} samples into {} fixations, {} saccades",
            samples.len(),
            seg.fixations.len(),
            seg.saccades.len()
        );
        Ok(seg)
    }
}
