//! Landmark-anchored AOIs (faces and similar).
//!
//! A template picks four anchor indices out of a landmark set. Every
//! instance found in a frame is reported as its own item, labelled
//! `<label>_<n>` with `n` counting instances from 1.

use image::GrayImage;

use crate::homography::has_collinear_triple;

use super::{AoiDetection, AoiDetector, AoiError, AoiItem, TemplateInfo, DEFAULT_AOI_SCORE};

/// 68-point landmark indices of the face quadrilateral, ordered TL, TR, BR,
/// BL: right-eyebrow start, left-eyebrow end, and the two chin points.
pub const FACE_ANCHORS: [usize; 4] = [17, 26, 9, 7];

/// Face anchors in the face template image, same order as [`FACE_ANCHORS`].
pub const FACE_REFERENCE_POINTS: [[f64; 2]; 4] =
    [[132.0, 60.0], [675.0, 50.0], [515.0, 615.0], [330.0, 620.0]];

pub const FACE_TEMPLATE_SIZE: [u32; 2] = [800, 700];

/// Opaque landmark recognition primitive.
///
/// Returns one landmark set per instance found in the frame.
pub trait LandmarkDetector {
    fn detect_landmarks(&mut self, frame: &GrayImage) -> Vec<Vec<[f64; 2]>>;
}

/// Anchor selection and reference geometry of a landmark AOI.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LandmarkTemplate {
    pub anchors: [usize; 4],
    pub reference_points: [[f64; 2]; 4],
    pub size: [u32; 2],
    pub snapshot: String,
}

impl LandmarkTemplate {
    /// The built-in 68-point face template.
    pub fn face() -> Self {
        Self {
            anchors: FACE_ANCHORS,
            reference_points: FACE_REFERENCE_POINTS,
            size: FACE_TEMPLATE_SIZE,
            snapshot: "facial_landmarks_68markup.png".to_string(),
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self
            .reference_points
            .iter()
            .any(|p| !p[0].is_finite() || !p[1].is_finite())
        {
            return Err("reference points must be finite".to_string());
        }
        if has_collinear_triple(&self.reference_points) {
            return Err("reference points must not contain three collinear points".to_string());
        }
        for (i, a) in self.anchors.iter().enumerate() {
            if self.anchors[..i].contains(a) {
                return Err(format!("anchor index {} is repeated", a));
            }
        }
        Ok(())
    }

    /// Anchor positions picked out of one landmark set, if all are present
    /// and finite.
    pub fn anchor_points(&self, landmarks: &[[f64; 2]]) -> Option<[[f64; 2]; 4]> {
        let mut out = [[0.0; 2]; 4];
        for (slot, &idx) in out.iter_mut().zip(&self.anchors) {
            let p = *landmarks.get(idx)?;
            if !p[0].is_finite() || !p[1].is_finite() {
                return None;
            }
            *slot = p;
        }
        Some(out)
    }
}

/// Landmark AOI detector. Starts with the `face` template registered.
pub struct LandmarkAoiModel<D> {
    detector: D,
    templates: Vec<(String, LandmarkTemplate)>,
}

impl<D: LandmarkDetector> LandmarkAoiModel<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            templates: vec![("face".to_string(), LandmarkTemplate::face())],
        }
    }

    /// Detector with no templates registered.
    pub fn empty(detector: D) -> Self {
        Self {
            detector,
            templates: Vec::new(),
        }
    }

    /// Register a template under `label`; an existing label is never
    /// overwritten.
    pub fn create_landmark_aoi(
        &mut self,
        label: &str,
        template: LandmarkTemplate,
    ) -> Result<(), AoiError> {
        if self.template(label).is_some() {
            tracing::warn!("AOI label '{}' already present, template not created", label);
            return Err(AoiError::DuplicateLabel(label.to_string()));
        }
        template
            .validate()
            .map_err(|reason| AoiError::InvalidTemplate {
                label: label.to_string(),
                reason,
            })?;
        self.templates.push((label.to_string(), template));
        Ok(())
    }

    pub fn template(&self, label: &str) -> Option<&LandmarkTemplate> {
        self.templates
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, t)| t)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.templates.iter().map(|(l, _)| l.as_str())
    }
}

impl<D: LandmarkDetector> AoiDetector for LandmarkAoiModel<D> {
    fn detected_items(&mut self, frame: &GrayImage) -> Vec<AoiItem> {
        let instances = self.detector.detect_landmarks(frame);
        let mut items = Vec::new();
        for (label, template) in &self.templates {
            for (i, landmarks) in instances.iter().enumerate() {
                let instance = i + 1;
                let Some(detected_points) = template.anchor_points(landmarks) else {
                    tracing::debug!(
                        "{} instance {}: anchors missing from {} landmarks",
                        label,
                        instance,
                        landmarks.len()
                    );
                    continue;
                };
                if has_collinear_triple(&detected_points) {
                    tracing::debug!("{} instance {}: degenerate anchors", label, instance);
                    continue;
                }
                items.push(AoiItem {
                    aoi_id: format!("{}_{}", label, instance),
                    detected_points,
                    reference_points: template.reference_points,
                    template: TemplateInfo {
                        name: template.snapshot.clone(),
                        size: template.size,
                    },
                    score: DEFAULT_AOI_SCORE,
                    detection: AoiDetection::Landmark {
                        instance,
                        landmarks: landmarks.clone(),
                    },
                });
            }
        }
        items
    }
}
