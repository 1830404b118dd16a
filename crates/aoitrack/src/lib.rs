//! aoitrack: eye-tracking event segmentation and AOI hit-testing.
//!
//! Turns a timestamped gaze stream into fixations and saccades, then maps
//! them onto areas of interest that move across scene-video frames. The
//! stages are:
//!
//! 1. **Segmentation** – dispersion-threshold (I-DT) fixation identification.
//! 2. **Detection** – per-frame AOI correspondences from marker boards,
//!    landmark sets, or clusters fitted to fixation points.
//! 3. **Homography** – reference→frame transforms (DLT + RANSAC) and
//!    polygon containment.
//! 4. **Tracking** – live AOI regions per timestamp, closest-prior fallback
//!    for frames where an AOI was missed, and gaze hit recording.
//! 5. **Events** – a timestamp-ordered store merging fixations, saccades,
//!    logged events and AOI annotations, with interval/label filters.
//!
//! Marker and landmark recognition are external: plug them in through
//! [`MarkerDetector`] and [`LandmarkDetector`].

pub mod aoi;
pub mod board_layout;
pub mod events;
pub mod homography;
pub mod metrics;
pub mod pipeline;
pub mod sample;
pub mod segmentation;
pub mod tracker;
pub mod video;

#[cfg(test)]
pub(crate) mod test_utils;

pub use aoi::{
    AoiDetection, AoiDetector, AoiError, AoiItem, ClusterAoiModel, LandmarkAoiModel,
    LandmarkDetector, MarkerAoiModel, MarkerDetector,
};
pub use board_layout::{BoardLayout, BoardSpec};
pub use events::{EventFilter, EventRecord, GazeEvents};
pub use homography::{compute_homography, map_points, point_in_polygon, HomographyError};
pub use metrics::{FixationMetrics, Stats};
pub use pipeline::{AnalysisConfig, MappingSummary};
pub use sample::{GazeSample, GazeSeries};
pub use segmentation::{
    segment_xy, FixationEvent, FixationFilter, IdtConfig, IdtFilter, SaccadeEvent, Segmentation,
    SegmentationError,
};
pub use tracker::{AoiHit, AoiRegion, AoiTracker, OverlapPolicy, TrackerConfig};
pub use video::{FrameGaze, FrameSource, FramesAndGaze, VideoSync};
