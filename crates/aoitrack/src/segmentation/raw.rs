use crate::sample::{validate_order, GazeSample};

use super::{
    capped_duration, finite_rounded, FixationEvent, FixationFilter, Segmentation,
    SegmentationError, FIXATION_MAX_DURATION,
};

/// Pass-through filter: every sample after the first is reported as a
/// fixation lasting since the previous sample.
#[derive(Debug, Clone)]
pub struct RawFilter {
    pub max_fixation_duration: u64,
}

impl Default for RawFilter {
    fn default() -> Self {
        Self {
            max_fixation_duration: FIXATION_MAX_DURATION,
        }
    }
}

impl FixationFilter for RawFilter {
    fn filter(&self, samples: &[GazeSample]) -> Result<Segmentation, SegmentationError> {
        validate_order(samples)?;
        let mut seg = Segmentation::default();
        for pair in samples.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let Some((x, y)) = finite_rounded(cur.xy()) else {
                continue;
            };
            seg.fixations.push(FixationEvent {
                ts: cur.ts,
                index: seg.fixations.len() as u32,
                duration: capped_duration(cur.ts - prev.ts, self.max_fixation_duration),
                x,
                y,
            });
        }
        tracing::info!(
            "raw filter produced {} fixations from {} samples",
            seg.fixations.len(),
            samples.len()
        );
        Ok(seg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_sample_after_the_first_becomes_a_fixation() {
        let samples = vec![
            GazeSample::new(0.0, 1.0, 1.0),
            GazeSample::new(20.0, 2.4, 2.6),
            GazeSample::new(50.0, f64::NAN, 3.0),
            GazeSample::new(60.0, 4.0, 4.0),
        ];
        let seg = RawFilter::default().filter(&samples).unwrap();
        assert_eq!(seg.fixations.len(), 2);
        assert_eq!(seg.fixations[0].ts, 20.0);
        assert_eq!(seg.fixations[0].duration, 20);
        assert_eq!((seg.fixations[0].x, seg.fixations[0].y), (2, 3));
        // The NaN sample is skipped without consuming an index.
        assert_eq!(seg.fixations[1].index, 1);
        assert_eq!(seg.fixations[1].duration, 10);
    }

    #[test]
    fn raw_durations_respect_the_cap() {
        let samples = vec![GazeSample::new(0.0, 0.0, 0.0), GazeSample::new(5000.0, 0.0, 0.0)];
        let seg = RawFilter::default().filter(&samples).unwrap();
        assert_eq!(seg.fixations[0].duration, 1000);
    }
}
