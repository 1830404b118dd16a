//! Fiducial marker board AOIs.

use std::collections::VecDeque;
use std::path::Path;

use image::GrayImage;

use crate::board_layout::{BoardLayout, BoardSpec};
use crate::homography::{
    compute_homography, estimate_homography_dlt, fit_homography_ransac, has_collinear_triple,
    map_points, RansacHomographyConfig,
};

use super::{AoiDetection, AoiDetector, AoiError, AoiItem, TemplateInfo, DEFAULT_AOI_SCORE};

/// One marker reported by a marker detection primitive.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectedMarker {
    pub id: u32,
    /// Frame-pixel corners in the board's corner order (TL, TR, BR, BL).
    pub corners: [[f64; 2]; 4],
}

/// Opaque marker recognition primitive (ArUco or similar).
pub trait MarkerDetector {
    fn detect_markers(&mut self, frame: &GrayImage) -> Vec<DetectedMarker>;
}

/// Replays marker detections recorded offline, one list per frame.
///
/// Frames past the end of the recording report no markers.
#[derive(Debug, Clone, Default)]
pub struct RecordedMarkers {
    frames: VecDeque<Vec<DetectedMarker>>,
}

impl RecordedMarkers {
    pub fn new(frames: Vec<Vec<DetectedMarker>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// Load a JSON array (one entry per frame) of marker lists.
    pub fn from_json_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let data = std::fs::read_to_string(path)?;
        let frames: Vec<Vec<DetectedMarker>> = serde_json::from_str(&data)?;
        Ok(Self::new(frames))
    }

    pub fn push_frame(&mut self, markers: Vec<DetectedMarker>) {
        self.frames.push_back(markers);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl MarkerDetector for RecordedMarkers {
    fn detect_markers(&mut self, _frame: &GrayImage) -> Vec<DetectedMarker> {
        self.frames.pop_front().unwrap_or_default()
    }
}

/// Pose estimation settings for marker boards.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MarkerAoiConfig {
    /// Minimum number of visible board markers for a detection.
    pub min_markers: usize,
    /// Use RANSAC when more than one marker is visible.
    pub use_ransac: bool,
    pub ransac: RansacHomographyConfig,
}

impl Default for MarkerAoiConfig {
    fn default() -> Self {
        Self {
            min_markers: 1,
            use_ransac: true,
            ransac: RansacHomographyConfig::default(),
        }
    }
}

/// Marker-board AOI detector.
///
/// Boards are kept in registration order; that order is also the order of
/// the items returned per frame.
pub struct MarkerAoiModel<D> {
    detector: D,
    boards: Vec<(String, BoardLayout)>,
    config: MarkerAoiConfig,
}

impl<D: MarkerDetector> MarkerAoiModel<D> {
    pub fn new(detector: D) -> Self {
        Self::with_config(detector, MarkerAoiConfig::default())
    }

    pub fn with_config(detector: D, config: MarkerAoiConfig) -> Self {
        Self {
            detector,
            boards: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &MarkerAoiConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MarkerAoiConfig {
        &mut self.config
    }

    /// Register a board under `label`.
    ///
    /// Without an explicit `first_marker_id` the board takes the id block
    /// `registration_index * markers_per_board`. An existing label is never
    /// overwritten.
    pub fn create_board_aoi(
        &mut self,
        label: &str,
        mut spec: BoardSpec,
    ) -> Result<&BoardLayout, AoiError> {
        if self.board(label).is_some() {
            tracing::warn!("AOI label '{}' already present, board not created", label);
            return Err(AoiError::DuplicateLabel(label.to_string()));
        }
        if spec.first_marker_id.is_none() {
            let block = (self.boards.len() as u32).saturating_mul(spec.markers_per_board());
            spec.first_marker_id = Some(block);
        }
        spec.name = label.to_string();
        let layout = BoardLayout::from_spec(spec).map_err(|reason| AoiError::InvalidTemplate {
            label: label.to_string(),
            reason,
        })?;
        tracing::info!(
            "registered board '{}' ({}x{}, ids {}..{})",
            label,
            layout.markers_x,
            layout.markers_y,
            layout.first_marker_id,
            layout.first_marker_id as usize + layout.n_markers()
        );
        self.boards.push((label.to_string(), layout));
        Ok(&self.boards[self.boards.len() - 1].1)
    }

    pub fn board(&self, label: &str) -> Option<&BoardLayout> {
        self.boards.iter().find(|(l, _)| l == label).map(|(_, b)| b)
    }

    pub fn boards(&self) -> impl Iterator<Item = (&str, &BoardLayout)> + '_ {
        self.boards.iter().map(|(l, b)| (l.as_str(), b))
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    /// Locate one board among the markers found in a frame.
    pub fn locate_board(
        &self,
        label: &str,
        board: &BoardLayout,
        markers: &[DetectedMarker],
    ) -> Option<AoiItem> {
        let mut marker_ids: Vec<u32> = Vec::new();
        let mut src: Vec<[f64; 2]> = Vec::new();
        let mut dst: Vec<[f64; 2]> = Vec::new();
        for m in markers {
            if marker_ids.contains(&m.id) {
                continue;
            }
            let Some(corners) = board.marker_corners(m.id) else {
                continue;
            };
            marker_ids.push(m.id);
            src.extend(corners.iter().map(|&c| board.to_template(c)));
            dst.extend_from_slice(&m.corners);
        }

        if marker_ids.is_empty() || marker_ids.len() < self.config.min_markers {
            tracing::debug!(
                "board '{}': {} markers visible, need {}",
                label,
                marker_ids.len(),
                self.config.min_markers.max(1)
            );
            return None;
        }

        let h = if marker_ids.len() == 1 {
            compute_homography(&src, &dst)
        } else if self.config.use_ransac {
            fit_homography_ransac(&src, &dst, &self.config.ransac).map(|r| r.h)
        } else {
            estimate_homography_dlt(&src, &dst)
        };
        let h = match h {
            Ok(h) => h,
            Err(e) => {
                tracing::debug!("board '{}': pose estimation failed: {}", label, e);
                return None;
            }
        };

        let reference_points = board.reference_quad();
        let detected = match map_points(&h, &reference_points) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("board '{}': {}", label, e);
                return None;
            }
        };
        let detected_points = [detected[0], detected[1], detected[2], detected[3]];
        if has_collinear_triple(&detected_points) {
            tracing::debug!("board '{}': degenerate projected region", label);
            return None;
        }

        Some(AoiItem {
            aoi_id: label.to_string(),
            detected_points,
            reference_points,
            template: TemplateInfo {
                name: board.snapshot_name(),
                size: board.template_size,
            },
            score: DEFAULT_AOI_SCORE,
            detection: AoiDetection::Marker { marker_ids },
        })
    }
}

impl<D: MarkerDetector> AoiDetector for MarkerAoiModel<D> {
    fn detected_items(&mut self, frame: &GrayImage) -> Vec<AoiItem> {
        let markers = self.detector.detect_markers(frame);
        if markers.is_empty() {
            return Vec::new();
        }
        self.boards
            .iter()
            .filter_map(|(label, board)| self.locate_board(label, board, &markers))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{board_markers_seen_through, perspective_homography};
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn frame() -> GrayImage {
        GrayImage::new(8, 8)
    }

    #[test]
    fn duplicate_board_label_is_rejected_without_overwrite() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("poster", BoardSpec::default()).unwrap();
        let err = model
            .create_board_aoi("poster", BoardSpec::grid("x", 4, 4, 0.2, 0.1))
            .unwrap_err();
        assert_eq!(err, AoiError::DuplicateLabel("poster".into()));
        assert_eq!(model.board("poster").unwrap().markers_x, 3);
        assert_eq!(model.boards().count(), 1);
    }

    #[test]
    fn boards_get_consecutive_id_blocks() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("a", BoardSpec::default()).unwrap();
        let b = model.create_board_aoi("b", BoardSpec::default()).unwrap();
        assert_eq!(b.first_marker_id, 6);
        assert!(b.contains_id(11));
        assert!(!b.contains_id(5));
    }

    #[test]
    fn projected_board_is_located() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("poster", BoardSpec::default()).unwrap();
        let h = perspective_homography();
        let board = model.board("poster").unwrap().clone();
        let markers = board_markers_seen_through(&board, &h, board.marker_ids());
        model.detector_mut().push_frame(markers);

        let items = model.detected_items(&frame());
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.aoi_id, "poster");
        assert_eq!(item.template.size, [1920, 1080]);
        assert_eq!(item.template.name, "aruco_poster.png");
        let expected = map_points(&h, &item.reference_points).unwrap();
        for (d, e) in item.detected_points.iter().zip(&expected) {
            assert_relative_eq!(d[0], e[0], epsilon = 1e-6);
            assert_relative_eq!(d[1], e[1], epsilon = 1e-6);
        }
        assert!(matches!(&item.detection, AoiDetection::Marker { marker_ids } if marker_ids.len() == 6));
    }

    #[test]
    fn single_visible_marker_is_enough_by_default() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("poster", BoardSpec::default()).unwrap();
        let board = model.board("poster").unwrap().clone();
        let h = Matrix3::new(0.5, 0.0, 100.0, 0.0, 0.5, 50.0, 0.0, 0.0, 1.0);
        let markers = board_markers_seen_through(&board, &h, [3u32]);
        model.detector_mut().push_frame(markers);

        let items = model.detected_items(&frame());
        assert_eq!(items.len(), 1);
        let expected = map_points(&h, &board.reference_quad()).unwrap();
        assert_relative_eq!(items[0].detected_points[2][0], expected[2][0], epsilon = 1e-6);
    }

    #[test]
    fn too_few_markers_is_a_miss_not_an_error() {
        let config = MarkerAoiConfig {
            min_markers: 3,
            ..MarkerAoiConfig::default()
        };
        let mut model = MarkerAoiModel::with_config(RecordedMarkers::default(), config);
        model.create_board_aoi("poster", BoardSpec::default()).unwrap();
        let board = model.board("poster").unwrap().clone();
        let markers = board_markers_seen_through(&board, &Matrix3::identity(), [0u32, 1]);
        model.detector_mut().push_frame(markers);
        assert!(model.detected_items(&frame()).is_empty());
    }

    #[test]
    fn foreign_markers_do_not_locate_a_board() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("a", BoardSpec::default()).unwrap();
        model.create_board_aoi("b", BoardSpec::default()).unwrap();
        let b = model.board("b").unwrap().clone();
        let markers = board_markers_seen_through(&b, &Matrix3::identity(), b.marker_ids());
        model.detector_mut().push_frame(markers);

        let items = model.detected_items(&frame());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].aoi_id, "b");
    }

    #[test]
    fn items_follow_registration_order() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        model.create_board_aoi("first", BoardSpec::default()).unwrap();
        model.create_board_aoi("second", BoardSpec::default()).unwrap();
        let a = model.board("first").unwrap().clone();
        let b = model.board("second").unwrap().clone();
        let mut markers = board_markers_seen_through(&b, &Matrix3::identity(), b.marker_ids());
        markers.extend(board_markers_seen_through(&a, &Matrix3::identity(), a.marker_ids()));
        model.detector_mut().push_frame(markers);

        let ids: Vec<String> = model
            .detected_items(&frame())
            .into_iter()
            .map(|i| i.aoi_id)
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn recording_replays_one_frame_per_call() {
        let m = DetectedMarker {
            id: 2,
            corners: [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
        };
        let mut rec = RecordedMarkers::new(vec![vec![m.clone()], vec![]]);
        assert_eq!(rec.detect_markers(&frame()), vec![m]);
        assert!(rec.detect_markers(&frame()).is_empty());
        assert_eq!(rec.remaining(), 0);
        assert!(rec.detect_markers(&frame()).is_empty());
    }

    #[test]
    fn invalid_board_spec_is_reported() {
        let mut model = MarkerAoiModel::new(RecordedMarkers::default());
        let err = model
            .create_board_aoi("bad", BoardSpec::grid("bad", 0, 2, 0.1, 0.1))
            .unwrap_err();
        assert!(matches!(err, AoiError::InvalidTemplate { .. }));
    }
}
