//! Synthetic data for unit tests.

use std::collections::VecDeque;

use image::GrayImage;
use nalgebra::Matrix3;
use rand::prelude::*;

use crate::aoi::{
    AoiDetection, AoiDetector, AoiItem, DetectedMarker, LandmarkDetector, TemplateInfo,
    DEFAULT_AOI_SCORE, FACE_ANCHORS, FACE_REFERENCE_POINTS,
};
use crate::board_layout::BoardLayout;
use crate::homography::project;
use crate::sample::GazeSample;

/// `n` samples `dt` apart around `center`, with sub-pixel jitter small
/// enough that the rounded centroid is `center` itself.
pub(crate) fn fixation_run(t0: f64, dt: f64, n: usize, center: [f64; 2]) -> Vec<GazeSample> {
    (0..n)
        .map(|i| {
            let jx = ((i % 3) as f64 - 1.0) * 0.3;
            let jy = if i % 2 == 0 { -0.2 } else { 0.2 };
            GazeSample::new(t0 + i as f64 * dt, center[0] + jx, center[1] + jy)
        })
        .collect()
}

/// Runs of 10-30 samples (10 ms apart, +-3 px jitter) separated by jumps of
/// at least 200 px.
pub(crate) fn jittered_stream(seed: u64, n: usize) -> Vec<GazeSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(n);
    let mut center = [960.0, 540.0];
    while out.len() < n {
        let run = rng.gen_range(10..=30);
        for _ in 0..run {
            if out.len() == n {
                break;
            }
            let ts = out.len() as f64 * 10.0;
            out.push(GazeSample::new(
                ts,
                center[0] + rng.gen_range(-3.0..3.0),
                center[1] + rng.gen_range(-3.0..3.0),
            ));
        }
        loop {
            let next = [rng.gen_range(0.0..1920.0), rng.gen_range(0.0..1080.0)];
            if (next[0] - center[0]).hypot(next[1] - center[1]) >= 200.0 {
                center = next;
                break;
            }
        }
    }
    out
}

/// Moderate perspective that keeps a 2000 px square in front of the camera.
pub(crate) fn perspective_homography() -> Matrix3<f64> {
    Matrix3::new(0.9, 0.05, 120.0, -0.03, 0.85, 80.0, 4e-5, 2e-5, 1.0)
}

/// Detections of `ids` for `board` as seen through `h` (template -> frame).
pub(crate) fn board_markers_seen_through(
    board: &BoardLayout,
    h: &Matrix3<f64>,
    ids: impl IntoIterator<Item = u32>,
) -> Vec<DetectedMarker> {
    ids.into_iter()
        .filter_map(|id| {
            let corners = board.marker_corners(id)?;
            let mut out = [[0.0; 2]; 4];
            for (o, c) in out.iter_mut().zip(&corners) {
                let t = board.to_template(*c);
                *o = project(h, t[0], t[1])?;
            }
            Some(DetectedMarker { id, corners: out })
        })
        .collect()
}

/// A 68-point landmark set whose face anchors are the face reference points
/// mapped through `h`; the remaining points sit on a grid inside the face.
pub(crate) fn face_landmarks_seen_through(h: &Matrix3<f64>) -> Vec<[f64; 2]> {
    let mut pts: Vec<[f64; 2]> = (0..68)
        .map(|i| {
            let t = [
                220.0 + (i % 10) as f64 * 40.0,
                120.0 + (i / 10) as f64 * 60.0,
            ];
            project(h, t[0], t[1]).unwrap_or(t)
        })
        .collect();
    for (&idx, r) in FACE_ANCHORS.iter().zip(&FACE_REFERENCE_POINTS) {
        if let Some(p) = project(h, r[0], r[1]) {
            pts[idx] = p;
        }
    }
    pts
}

/// Landmark primitive replaying scripted instances, one list per frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedLandmarks {
    frames: VecDeque<Vec<Vec<[f64; 2]>>>,
}

impl ScriptedLandmarks {
    pub fn new(frames: Vec<Vec<Vec<[f64; 2]>>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl LandmarkDetector for ScriptedLandmarks {
    fn detect_landmarks(&mut self, _frame: &GrayImage) -> Vec<Vec<[f64; 2]>> {
        self.frames.pop_front().unwrap_or_default()
    }
}

/// `n` isotropic normal points around `center` (Box-Muller).
pub(crate) fn gaussian_blob(seed: u64, n: usize, center: [f64; 2], sigma: f64) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
            let u2: f64 = rng.gen_range(0.0..1.0);
            let r = (-2.0 * u1.ln()).sqrt() * sigma;
            let theta = 2.0 * std::f64::consts::PI * u2;
            [center[0] + r * theta.cos(), center[1] + r * theta.sin()]
        })
        .collect()
}

/// Axis-aligned square `[x0, y0]` with side `side`, ordered TL, TR, BR, BL.
pub(crate) fn square(x0: f64, y0: f64, side: f64) -> [[f64; 2]; 4] {
    [
        [x0, y0],
        [x0 + side, y0],
        [x0 + side, y0 + side],
        [x0, y0 + side],
    ]
}

/// Item whose `reference` quad is seen at `detected` in the frame.
pub(crate) fn quad_item(aoi_id: &str, reference: [[f64; 2]; 4], detected: [[f64; 2]; 4]) -> AoiItem {
    AoiItem {
        aoi_id: aoi_id.to_string(),
        detected_points: detected,
        reference_points: reference,
        template: TemplateInfo {
            name: format!("{}.png", aoi_id),
            size: [1920, 1080],
        },
        score: DEFAULT_AOI_SCORE,
        detection: AoiDetection::Marker {
            marker_ids: Vec::new(),
        },
    }
}

/// AOI detector replaying scripted items, one list per frame.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedAois {
    frames: VecDeque<Vec<AoiItem>>,
}

impl ScriptedAois {
    pub fn new(frames: Vec<Vec<AoiItem>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

impl AoiDetector for ScriptedAois {
    fn detected_items(&mut self, _frame: &GrayImage) -> Vec<AoiItem> {
        self.frames.pop_front().unwrap_or_default()
    }
}
