//! Area-of-interest detection.
//!
//! An [`AoiDetector`] turns one frame into a set of [`AoiItem`]s: one per
//! known template found in the frame, each carrying four ordered
//! correspondences between template space and frame pixels. Templates not
//! found in a frame produce no item.
//!
//! Three strategies are provided:
//! - [`MarkerAoiModel`]: planar fiducial boards seen through a [`MarkerDetector`].
//! - [`LandmarkAoiModel`]: landmark quadrilaterals (faces) from a [`LandmarkDetector`].
//! - [`ClusterAoiModel`]: regions fitted to a batch of fixation points.

pub mod cluster;
mod landmark;
mod marker;

pub use cluster::{
    default_label, ClusterAoiModel, ClusterError, ClusterFit, ClusterSortKey, ClusteringStrategy,
    Dbscan, DbscanConfig, Ellipse, FittedCluster, GaussianMixture, GaussianMixtureConfig,
    COLORS_LIST,
};
pub use landmark::{
    LandmarkAoiModel, LandmarkDetector, LandmarkTemplate, FACE_ANCHORS, FACE_REFERENCE_POINTS,
    FACE_TEMPLATE_SIZE,
};
pub use marker::{DetectedMarker, MarkerAoiConfig, MarkerAoiModel, MarkerDetector, RecordedMarkers};

use image::GrayImage;

/// Default AOI score reported for geometric detections.
pub const DEFAULT_AOI_SCORE: f64 = 100.0;

// ── Error type ───────────────────────────────────────────────────────────

/// Template registration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum AoiError {
    /// A template with this label is already registered.
    DuplicateLabel(String),
    /// Template parameters failed validation.
    InvalidTemplate { label: String, reason: String },
}

impl std::fmt::Display for AoiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateLabel(label) => {
                write!(f, "AOI label '{}' is already registered", label)
            }
            Self::InvalidTemplate { label, reason } => {
                write!(f, "invalid AOI template '{}': {}", label, reason)
            }
        }
    }
}

impl std::error::Error for AoiError {}

// ── Detection results ────────────────────────────────────────────────────

/// Template image metadata carried with each item.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TemplateInfo {
    /// Snapshot file name of the template (used by heatmap exporters).
    pub name: String,
    /// Template size `[width, height]` in template pixels.
    pub size: [u32; 2],
}

/// Strategy-specific payload of a detection.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AoiDetection {
    /// Board found from these visible marker ids.
    Marker { marker_ids: Vec<u32> },
    /// Landmark instance (1-based) and its full landmark set in frame pixels.
    Landmark {
        instance: usize,
        landmarks: Vec<[f64; 2]>,
    },
    /// Fitted cluster with its centroid and covariance in gaze space.
    Cluster {
        centroid: [f64; 2],
        covariance: [[f64; 2]; 2],
    },
}

/// One template found in one frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AoiItem {
    pub aoi_id: String,
    /// Ordered quadrilateral in frame pixels.
    pub detected_points: [[f64; 2]; 4],
    /// The same quadrilateral in template space, same vertex order.
    pub reference_points: [[f64; 2]; 4],
    pub template: TemplateInfo,
    pub score: f64,
    pub detection: AoiDetection,
}

/// Per-frame AOI detection strategy.
pub trait AoiDetector {
    /// Items for every registered template visible in `frame`, in template
    /// registration order.
    fn detected_items(&mut self, frame: &GrayImage) -> Vec<AoiItem>;
}

impl<D: AoiDetector + ?Sized> AoiDetector for &mut D {
    fn detected_items(&mut self, frame: &GrayImage) -> Vec<AoiItem> {
        (**self).detected_items(frame)
    }
}

impl<D: AoiDetector + ?Sized> AoiDetector for Box<D> {
    fn detected_items(&mut self, frame: &GrayImage) -> Vec<AoiItem> {
        (**self).detected_items(frame)
    }
}
