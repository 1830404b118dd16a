//! Batch drivers wiring segmentation, AOI detection and tracking into one
//! event store.

use std::path::Path;

use crate::aoi::{
    AoiDetector, ClusterAoiModel, ClusterError, ClusterSortKey, ClusteringStrategy, Dbscan,
    DbscanConfig, FittedCluster, GaussianMixture, GaussianMixtureConfig, MarkerAoiConfig,
};
use crate::events::{EventFilter, GazeEvents};
use crate::sample::GazeSample;
use crate::segmentation::{IdtConfig, IdtFilter, SegmentationError};
use crate::tracker::{AoiTracker, TrackerConfig};
use crate::video::{FrameError, FrameGaze};

/// Every tunable of an analysis run. Missing sections take their defaults.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub idt: IdtConfig,
    pub tracker: TrackerConfig,
    pub marker: MarkerAoiConfig,
    pub gmm: GaussianMixtureConfig,
    pub dbscan: DbscanConfig,
}

impl AnalysisConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Segment `samples` with I-DT into `events`, skipping samples an earlier
/// call already segmented. Returns the number of fixations added.
pub fn segment_into(
    events: &mut GazeEvents,
    samples: &[GazeSample],
    config: &IdtConfig,
) -> Result<usize, SegmentationError> {
    let before = events.fixations(None).len();
    let filter = IdtFilter::new(config.clone());
    let n = events.filter_fixations(&filter, samples, None)?;
    let added = events.fixations(None).len() - before;
    tracing::info!("segmented {} samples, {} new fixations", n, added);
    Ok(added)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MappingSummary {
    pub frames: usize,
    pub hits: usize,
    pub frame_errors: usize,
    /// Fixations labelled with the AOI containing them.
    pub annotated_fixations: usize,
}

/// Run every frame through `detector` and `tracker`, then label the
/// fixations in `events` with the AOI containing them.
///
/// Each frame is hit-tested with the position of the fixation closest to
/// (at or before) its timestamp. After the last frame every fixation is
/// looked up at its end, in the region recorded there or the closest prior
/// one, and annotated with the AOI label and template-space point.
/// A store without fixations is mapped sample by sample instead: the raw
/// gaze point of each frame is hit-tested and annotated at its timestamp.
///
/// Frame errors are counted and logged; they do not abort the run.
pub fn map_aois<I, D>(
    frames: I,
    detector: &mut D,
    tracker: &mut AoiTracker,
    events: &mut GazeEvents,
) -> MappingSummary
where
    I: IntoIterator<Item = Result<FrameGaze, FrameError>>,
    D: AoiDetector + ?Sized,
{
    let mut summary = MappingSummary::default();
    let by_fixation = !events.fixations(None).is_empty();
    for item in frames {
        let fg = match item {
            Ok(fg) => fg,
            Err(e) => {
                tracing::warn!("frame {}: {}", summary.frames + summary.frame_errors, e);
                summary.frame_errors += 1;
                continue;
            }
        };
        summary.frames += 1;
        let hit = if by_fixation {
            let [x, y] = events
                .closest_fixation(fg.ts)
                .and_then(|r| r.fixation_xy())
                .unwrap_or([fg.x, fg.y]);
            tracker.apply(detector, &fg.frame.image, fg.ts, x, y, None)
        } else {
            tracker.apply(detector, &fg.frame.image, fg.ts, fg.x, fg.y, Some(&mut *events))
        };
        if hit.is_some() {
            summary.hits += 1;
        }
    }
    if by_fixation {
        summary.annotated_fixations = annotate_fixations(tracker, events);
    }
    tracing::info!(
        "mapped {} frames: {} AOI hits, {} fixations labelled, {} frame errors",
        summary.frames,
        summary.hits,
        summary.annotated_fixations,
        summary.frame_errors
    );
    summary
}

/// Label every fixation with the AOI the tracker places it in, using the
/// latest region at or before the fixation's end.
fn annotate_fixations(tracker: &AoiTracker, events: &mut GazeEvents) -> usize {
    let fixations: Vec<(f64, f64, [f64; 2])> = events
        .fixations(None)
        .into_iter()
        .filter_map(|r| {
            let end = r.ts + r.duration.unwrap_or(0) as f64;
            r.fixation_xy().map(|xy| (r.ts, end, xy))
        })
        .collect();
    let mut annotated = 0;
    for (ts, end, [x, y]) in fixations {
        let Some(hit) = tracker.locate(end, x, y) else {
            continue;
        };
        events.set_aoi_hit(ts, &hit.aoi_id, hit.score, hit.mapped);
        annotated += 1;
    }
    annotated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMethod {
    Gmm,
    Dbscan,
}

/// Fit cluster AOIs to the fixations selected by `ts_filter` and annotate
/// them in `events`.
pub fn cluster_fixations(
    events: &mut GazeEvents,
    config: &AnalysisConfig,
    method: ClusterMethod,
    labels: Option<Vec<String>>,
    sort_key: Option<ClusterSortKey>,
    ts_filter: Option<&EventFilter>,
) -> Result<Vec<FittedCluster>, ClusterError> {
    let strategy: Box<dyn ClusteringStrategy> = match method {
        ClusterMethod::Gmm => Box::new(GaussianMixture::with_config(config.gmm.clone())),
        ClusterMethod::Dbscan => Box::new(Dbscan::with_config(config.dbscan.clone())),
    };
    let mut model = ClusterAoiModel::new(strategy);
    if let Some(labels) = labels {
        model = model.with_labels(labels);
    }
    if let Some(key) = sort_key {
        model = model.sorted_by(key);
    }
    Ok(model.fit(events, ts_filter)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aoi::{MarkerAoiModel, RecordedMarkers};
    use crate::board_layout::BoardSpec;
    use crate::homography::polygon_centroid;
    use crate::sample::GazeSeries;
    use crate::test_utils::{board_markers_seen_through, fixation_run, gaussian_blob};
    use crate::video::{Frame, FramesAndGaze, VideoSync};
    use image::GrayImage;
    use nalgebra::Matrix3;
    use std::collections::VecDeque;

    #[test]
    fn config_sections_default_independently() {
        let cfg: AnalysisConfig =
            serde_json::from_str(r#"{"idt": {"dispersion_threshold": 25.0}, "dbscan": {"eps": 12.5}}"#)
                .unwrap();
        assert_eq!(cfg.idt.dispersion_threshold, 25.0);
        assert_eq!(cfg.idt.duration_threshold, 100.0);
        assert_eq!(cfg.dbscan.eps, 12.5);
        assert_eq!(cfg.dbscan.min_samples, 5);
        assert_eq!(cfg.tracker.containment_tolerance, 10.0);
    }

    #[test]
    fn segment_into_is_incremental() {
        let mut samples = fixation_run(0.0, 10.0, 12, [100.0, 100.0]);
        samples.extend(fixation_run(200.0, 10.0, 12, [600.0, 300.0]));
        let mut events = GazeEvents::new();
        let cfg = IdtConfig::new(5.0, 50.0);
        assert_eq!(segment_into(&mut events, &samples, &cfg).unwrap(), 2);
        assert_eq!(segment_into(&mut events, &samples, &cfg).unwrap(), 0);
    }

    #[test]
    fn raw_gaze_is_mapped_when_no_fixations_exist() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("poster", BoardSpec::default()).unwrap();
        let board = model.board("poster").unwrap().clone();
        for _ in 0..2 {
            let markers = board_markers_seen_through(&board, &Matrix3::identity(), board.marker_ids());
            model.detector_mut().push_frame(markers);
        }
        model.detector_mut().push_frame(Vec::new());

        let center = polygon_centroid(&board.reference_quad()).unwrap();
        let gaze = GazeSeries::new(
            (0..30)
                .map(|i| GazeSample::new(i as f64 * 10.0, center[0], center[1]))
                .collect(),
        )
        .unwrap();
        let frames: VecDeque<Frame> = (0..3)
            .map(|i| Frame {
                image: GrayImage::new(4, 4),
                pts_ms: i as f64 * 40.0,
            })
            .collect();

        let mut tracker = AoiTracker::new();
        let mut events = GazeEvents::new();
        let it = FramesAndGaze::new(frames, gaze, VideoSync::default()).unwrap();
        let summary = map_aois(it, &mut model, &mut tracker, &mut events);

        assert_eq!(
            summary,
            MappingSummary {
                frames: 3,
                hits: 3,
                frame_errors: 0,
                annotated_fixations: 0,
            }
        );
        assert_eq!(events.get(80.0).unwrap().aoi.as_deref(), Some("poster"));
        assert!(tracker.region_at("poster", 80.0).is_none());
        let mapped = tracker.export_heatmap_samples("poster");
        assert!((mapped[0][0] - center[0]).abs() < 1e-6);
    }

    fn visible_board_model(frames: usize) -> (MarkerAoiModel<RecordedMarkers>, [f64; 2]) {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("poster", BoardSpec::default()).unwrap();
        let board = model.board("poster").unwrap().clone();
        for _ in 0..frames {
            let markers = board_markers_seen_through(&board, &Matrix3::identity(), board.marker_ids());
            model.detector_mut().push_frame(markers);
        }
        let center = polygon_centroid(&board.reference_quad()).unwrap();
        (model, center)
    }

    fn blank_frames(pts: &[f64]) -> VecDeque<Frame> {
        pts.iter()
            .map(|&pts_ms| Frame {
                image: GrayImage::new(4, 4),
                pts_ms,
            })
            .collect()
    }

    #[test]
    fn fixations_are_labelled_for_per_aoi_metrics() {
        let (mut model, center) = visible_board_model(3);
        let samples: Vec<GazeSample> = (0..30)
            .map(|i| GazeSample::new(i as f64 * 10.0, center[0], center[1]))
            .collect();
        let mut events = GazeEvents::new();
        segment_into(&mut events, &samples, &IdtConfig::default()).unwrap();
        assert_eq!(events.fixations(None).len(), 1);

        let gaze = GazeSeries::new(samples).unwrap();
        let frames = blank_frames(&[15.0, 55.0, 95.0]);
        let it = FramesAndGaze::new(frames, gaze, VideoSync::default()).unwrap();
        let mut tracker = AoiTracker::new();
        let summary = map_aois(it, &mut model, &mut tracker, &mut events);
        assert_eq!(summary.hits, 3);
        assert_eq!(summary.annotated_fixations, 1);

        let metrics = crate::metrics::FixationMetrics::new(&events, None);
        assert_eq!(metrics.fixation_count_per_aoi().get("poster"), Some(&1));
        assert_eq!(metrics.time_to_first_fixation(0.0).get("poster"), Some(&Some(0.0)));
    }

    #[test]
    fn fixations_before_the_first_region_stay_unlabelled() {
        let (mut model, center) = visible_board_model(1);
        let mut samples = fixation_run(0.0, 10.0, 12, [center[0], center[1]]);
        samples.extend(fixation_run(300.0, 10.0, 12, [center[0] + 5.0, center[1]]));
        let mut events = GazeEvents::new();
        segment_into(&mut events, &samples, &IdtConfig::new(3.0, 50.0)).unwrap();
        assert_eq!(events.fixations(None).len(), 2);

        let gaze = GazeSeries::new(samples).unwrap();
        let it = FramesAndGaze::new(blank_frames(&[250.0]), gaze, VideoSync::default()).unwrap();
        let mut tracker = AoiTracker::new();
        let summary = map_aois(it, &mut model, &mut tracker, &mut events);

        assert_eq!(summary.annotated_fixations, 1);
        assert!(events.get(0.0).unwrap().aoi.is_none());
        assert_eq!(events.get(300.0).unwrap().aoi.as_deref(), Some("poster"));
    }

    #[test]
    fn shared_boundary_timestamp_keeps_both_fixations() {
        let samples = vec![
            GazeSample::new(0.0, 0.0, 0.0),
            GazeSample::new(10.0, 0.0, 0.0),
            GazeSample::new(10.0, 500.0, 500.0),
            GazeSample::new(20.0, 500.0, 500.0),
        ];
        let cfg = IdtConfig {
            emit_saccades: true,
            ..IdtConfig::new(5.0, 5.0)
        };
        let mut events = GazeEvents::new();
        assert_eq!(segment_into(&mut events, &samples, &cfg).unwrap(), 2);
        assert_eq!(events.fixations(None).len(), 2);
    }

    #[test]
    fn frame_errors_are_counted() {
        let frames = vec![Err(FrameError::NoGaze)];
        let summary = map_aois(
            frames,
            &mut crate::test_utils::ScriptedAois::default(),
            &mut AoiTracker::new(),
            &mut GazeEvents::new(),
        );
        assert_eq!(summary.frame_errors, 1);
        assert_eq!(summary.frames, 0);
    }

    #[test]
    fn clustering_driver_uses_configured_strategy() {
        let mut pts = gaussian_blob(31, 40, [200.0, 200.0], 8.0);
        pts.extend(gaussian_blob(32, 40, [900.0, 200.0], 8.0));
        let mut events = GazeEvents::new();
        for (i, p) in pts.iter().enumerate() {
            events.add_fixation(&crate::segmentation::FixationEvent {
                ts: i as f64 * 50.0,
                index: i as u32,
                duration: 50,
                x: p[0].round() as i64,
                y: p[1].round() as i64,
            });
        }
        let clusters = cluster_fixations(
            &mut events,
            &AnalysisConfig::default(),
            ClusterMethod::Dbscan,
            Some(vec!["left".into(), "right".into()]),
            Some(ClusterSortKey::CentroidX),
            None,
        )
        .unwrap();
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].centroid[0] < clusters[1].centroid[0]);
        assert_eq!(events.get(0.0).unwrap().aoi.as_deref(), Some("left"));
    }
}
