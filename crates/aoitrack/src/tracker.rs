//! AOI tracking and gaze hit-testing.
//!
//! [`AoiTracker::apply`] takes one frame and the gaze point at its
//! timestamp. Every item the detector reports becomes an [`AoiRegion`] for
//! that timestamp: the item's reference quadrilateral projected through the
//! reference→frame homography. AOIs seen in earlier frames but missing from
//! this one are tested against their closest strictly-prior region.
//!
//! At most one AOI is hit per timestamp. Candidates are tried in
//! [`OverlapPolicy`] order; the first one that contains the gaze point and
//! maps it back into template space wins.
//!
//! Hits on cluster AOIs score the distance from the gaze point to the
//! cluster centroid; other AOIs carry the detector's item score.

use std::collections::HashMap;

use image::GrayImage;
use nalgebra::Matrix3;

use crate::aoi::{AoiDetection, AoiDetector, AoiItem, TemplateInfo};
use crate::events::GazeEvents;
use crate::homography::{
    array_to_matrix3, compute_homography, invert, matrix3_to_array, point_in_polygon,
    polygon_area, project, HomographyError,
};

/// Tie-break between AOIs whose regions all contain the gaze point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Items detected in this frame, in detector order, then AOIs reusing a
    /// prior region, in the order they were first seen.
    #[default]
    DetectionOrder,
    /// Smallest region area first; equal areas keep detection order.
    SmallestArea,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Points within this distance (frame pixels) of a region edge count as
    /// inside.
    pub containment_tolerance: f64,
    pub overlap_policy: OverlapPolicy,
    /// Test AOIs missing from a frame against their closest prior region.
    pub reuse_prior_regions: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            containment_tolerance: 10.0,
            overlap_policy: OverlapPolicy::DetectionOrder,
            reuse_prior_regions: true,
        }
    }
}

/// Live extent of one AOI at one timestamp.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AoiRegion {
    pub ts: f64,
    /// Reference quadrilateral in frame pixels.
    pub polygon: [[f64; 2]; 4],
    /// Reference→frame homography, row-major.
    pub homography: [[f64; 3]; 3],
}

impl AoiRegion {
    /// Region of `item` at `ts`, or the reason its correspondences are
    /// unusable.
    pub fn from_item(item: &AoiItem, ts: f64) -> Result<Self, HomographyError> {
        let h = compute_homography(&item.reference_points, &item.detected_points)?;
        let mut polygon = [[0.0; 2]; 4];
        for (index, (out, p)) in polygon.iter_mut().zip(&item.reference_points).enumerate() {
            *out = project(&h, p[0], p[1]).ok_or(HomographyError::DegenerateProjection { index })?;
        }
        Ok(Self {
            ts,
            polygon,
            homography: matrix3_to_array(&h),
        })
    }

    pub fn homography(&self) -> Matrix3<f64> {
        array_to_matrix3(&self.homography)
    }

    pub fn contains(&self, p: [f64; 2], tolerance: f64) -> bool {
        point_in_polygon(&self.polygon, p, tolerance)
    }

    pub fn area(&self) -> f64 {
        polygon_area(&self.polygon)
    }

    /// Map a frame point back into template space.
    pub fn to_template(&self, p: [f64; 2]) -> Result<[f64; 2], HomographyError> {
        let inv = invert(&self.homography())?;
        project(&inv, p[0], p[1]).ok_or(HomographyError::DegenerateProjection { index: 0 })
    }
}

/// A gaze point that fell inside an AOI.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AoiHit {
    pub ts: f64,
    pub aoi_id: String,
    /// Gaze point in frame pixels.
    pub gaze: [f64; 2],
    /// Gaze point in template space.
    pub mapped: [f64; 2],
    pub score: f64,
}

struct AoiTrack {
    template: TemplateInfo,
    score: f64,
    /// Cluster centroid in gaze space, for distance scoring.
    centroid: Option<[f64; 2]>,
    /// Ascending by timestamp, one region per timestamp.
    regions: Vec<AoiRegion>,
    hits: Vec<AoiHit>,
}

impl AoiTrack {
    fn new(item: &AoiItem) -> Self {
        Self {
            template: item.template.clone(),
            score: item.score,
            centroid: cluster_centroid(item),
            regions: Vec::new(),
            hits: Vec::new(),
        }
    }

    fn insert_region(&mut self, region: AoiRegion) {
        let idx = self.regions.partition_point(|r| r.ts < region.ts);
        match self.regions.get_mut(idx) {
            Some(r) if r.ts == region.ts => *r = region,
            _ => self.regions.insert(idx, region),
        }
    }

    fn region_at(&self, ts: f64) -> Option<&AoiRegion> {
        let idx = self.regions.partition_point(|r| r.ts < ts);
        self.regions.get(idx).filter(|r| r.ts == ts)
    }

    fn closest_prior(&self, ts: f64) -> Option<&AoiRegion> {
        match self.regions.partition_point(|r| r.ts < ts) {
            0 => None,
            idx => Some(&self.regions[idx - 1]),
        }
    }

    fn update(&mut self, item: &AoiItem) {
        self.score = item.score;
        self.centroid = cluster_centroid(item);
    }

    fn hit_score(&self, gaze: [f64; 2]) -> f64 {
        match self.centroid {
            Some(c) => (gaze[0] - c[0]).hypot(gaze[1] - c[1]),
            None => self.score,
        }
    }

    fn record_hit(&mut self, hit: AoiHit) {
        self.hits.retain(|h| h.ts != hit.ts);
        let idx = self.hits.partition_point(|h| h.ts < hit.ts);
        self.hits.insert(idx, hit);
    }
}

fn cluster_centroid(item: &AoiItem) -> Option<[f64; 2]> {
    match item.detection {
        AoiDetection::Cluster { centroid, .. } => Some(centroid),
        _ => None,
    }
}

/// Region and hit state for every AOI a detector has reported.
pub struct AoiTracker {
    config: TrackerConfig,
    tracks: Vec<(String, AoiTrack)>,
    index: HashMap<String, usize>,
}

impl Default for AoiTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AoiTracker {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut TrackerConfig {
        &mut self.config
    }

    fn track_index(&mut self, item: &AoiItem) -> usize {
        if let Some(&idx) = self.index.get(&item.aoi_id) {
            self.tracks[idx].1.update(item);
            return idx;
        }
        let idx = self.tracks.len();
        self.tracks.push((item.aoi_id.clone(), AoiTrack::new(item)));
        self.index.insert(item.aoi_id.clone(), idx);
        tracing::debug!("tracking new AOI '{}'", item.aoi_id);
        idx
    }

    /// Region of track `idx` usable for a query at `ts`.
    fn lookup(&self, idx: usize, ts: f64) -> Option<&AoiRegion> {
        let track = &self.tracks[idx].1;
        track.region_at(ts).or_else(|| {
            if self.config.reuse_prior_regions {
                track.closest_prior(ts)
            } else {
                None
            }
        })
    }

    /// Candidate order for a hit test at `ts`.
    fn candidates(&self, detected: &[usize], ts: f64) -> Vec<usize> {
        let mut order: Vec<usize> = detected.to_vec();
        if self.config.reuse_prior_regions {
            order.extend((0..self.tracks.len()).filter(|i| !detected.contains(i)));
        }
        order.retain(|&i| self.lookup(i, ts).is_some());
        if self.config.overlap_policy == OverlapPolicy::SmallestArea {
            order.sort_by(|&a, &b| {
                let area = |i: usize| self.lookup(i, ts).map_or(f64::INFINITY, AoiRegion::area);
                area(a).total_cmp(&area(b))
            });
        }
        order
    }

    /// Process one frame: update regions for every detected AOI, hit-test
    /// the gaze point, and annotate `sink` on a hit.
    pub fn apply<D: AoiDetector + ?Sized>(
        &mut self,
        detector: &mut D,
        frame: &GrayImage,
        ts: f64,
        gaze_x: f64,
        gaze_y: f64,
        sink: Option<&mut GazeEvents>,
    ) -> Option<AoiHit> {
        let items = detector.detected_items(frame);
        let mut detected = Vec::with_capacity(items.len());
        for item in &items {
            let region = match AoiRegion::from_item(item, ts) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!("AOI '{}' at ts {}: {}", item.aoi_id, ts, e);
                    continue;
                }
            };
            let idx = self.track_index(item);
            self.tracks[idx].1.insert_region(region);
            if !detected.contains(&idx) {
                detected.push(idx);
            }
        }

        self.hit_test(&detected, ts, [gaze_x, gaze_y], sink)
    }

    /// First candidate whose region contains `gaze` and maps it into
    /// template space.
    fn find_hit(&self, detected: &[usize], ts: f64, gaze: [f64; 2]) -> Option<(usize, AoiHit)> {
        if !gaze[0].is_finite() || !gaze[1].is_finite() {
            return None;
        }
        let tolerance = self.config.containment_tolerance;
        for idx in self.candidates(detected, ts) {
            let Some(region) = self.lookup(idx, ts) else {
                continue;
            };
            if !region.contains(gaze, tolerance) {
                continue;
            }
            let (aoi_id, track) = &self.tracks[idx];
            let mapped = match region.to_template(gaze) {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!("AOI '{}' at ts {}: {}", aoi_id, ts, e);
                    continue;
                }
            };
            let hit = AoiHit {
                ts,
                aoi_id: aoi_id.clone(),
                gaze,
                mapped,
                score: track.hit_score(gaze),
            };
            return Some((idx, hit));
        }
        None
    }

    fn hit_test(
        &mut self,
        detected: &[usize],
        ts: f64,
        gaze: [f64; 2],
        sink: Option<&mut GazeEvents>,
    ) -> Option<AoiHit> {
        let (idx, hit) = self.find_hit(detected, ts, gaze)?;
        tracing::trace!("ts {}: gaze hit '{}'", ts, hit.aoi_id);
        if let Some(events) = sink {
            events.set_aoi_hit(ts, &hit.aoi_id, hit.score, hit.mapped);
        }
        self.tracks[idx].1.record_hit(hit.clone());
        Some(hit)
    }

    /// Hit the point at `ts` would score, from exact or closest-prior
    /// regions, without recording anything.
    pub fn locate(&self, ts: f64, x: f64, y: f64) -> Option<AoiHit> {
        let exact = self.exact_tracks(ts);
        self.find_hit(&exact, ts, [x, y]).map(|(_, hit)| hit)
    }

    fn exact_tracks(&self, ts: f64) -> Vec<usize> {
        (0..self.tracks.len())
            .filter(|&i| self.tracks[i].1.region_at(ts).is_some())
            .collect()
    }

    /// Whether `aoi_id` contains the point at `ts`, using the exact region or
    /// the closest prior one.
    pub fn contains(&self, aoi_id: &str, ts: f64, x: f64, y: f64) -> bool {
        self.index
            .get(aoi_id)
            .and_then(|&idx| self.lookup(idx, ts))
            .is_some_and(|r| r.contains([x, y], self.config.containment_tolerance))
    }

    /// AOI hit by the point at `ts` under the overlap policy, without
    /// recording anything.
    pub fn aoi_at(&self, ts: f64, x: f64, y: f64) -> Option<&str> {
        let exact = self.exact_tracks(ts);
        self.candidates(&exact, ts)
            .into_iter()
            .find(|&i| {
                self.lookup(i, ts)
                    .is_some_and(|r| r.contains([x, y], self.config.containment_tolerance))
            })
            .map(|i| self.tracks[i].0.as_str())
    }

    /// Region computed for `aoi_id` exactly at `ts`.
    pub fn region_at(&self, aoi_id: &str, ts: f64) -> Option<&AoiRegion> {
        let idx = *self.index.get(aoi_id)?;
        self.tracks[idx].1.region_at(ts)
    }

    /// Latest region of `aoi_id` strictly before `ts`.
    pub fn closest_prior_region(&self, aoi_id: &str, ts: f64) -> Option<&AoiRegion> {
        let idx = *self.index.get(aoi_id)?;
        self.tracks[idx].1.closest_prior(ts)
    }

    pub fn regions(&self, aoi_id: &str) -> &[AoiRegion] {
        match self.index.get(aoi_id) {
            Some(&idx) => &self.tracks[idx].1.regions,
            None => &[],
        }
    }

    /// Hits recorded for `aoi_id`, ascending by timestamp.
    pub fn hits(&self, aoi_id: &str) -> &[AoiHit] {
        match self.index.get(aoi_id) {
            Some(&idx) => &self.tracks[idx].1.hits,
            None => &[],
        }
    }

    /// Every recorded hit, ascending by timestamp.
    pub fn all_hits(&self) -> Vec<&AoiHit> {
        let mut hits: Vec<&AoiHit> = self.tracks.iter().flat_map(|(_, t)| &t.hits).collect();
        hits.sort_by(|a, b| a.ts.total_cmp(&b.ts));
        hits
    }

    /// AOI ids in the order they were first detected.
    pub fn aoi_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.tracks.iter().map(|(id, _)| id.as_str())
    }

    /// Template metadata of `aoi_id`, as first reported by the detector.
    pub fn template(&self, aoi_id: &str) -> Option<&TemplateInfo> {
        let idx = *self.index.get(aoi_id)?;
        Some(&self.tracks[idx].1.template)
    }

    /// Template-space gaze points of every hit on `aoi_id`, for heatmap
    /// rendering.
    pub fn export_heatmap_samples(&self, aoi_id: &str) -> Vec<[f64; 2]> {
        self.hits(aoi_id).iter().map(|h| h.mapped).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homography::map_points;
    use crate::test_utils::{perspective_homography, quad_item, square, ScriptedAois};
    use approx::assert_relative_eq;

    fn frame() -> GrayImage {
        GrayImage::new(4, 4)
    }

    #[test]
    fn identity_square_contains_inner_point_only() {
        let sq = square(0.0, 0.0, 100.0);
        let mut det = ScriptedAois::new(vec![
            vec![quad_item("board", sq, sq)],
            vec![quad_item("board", sq, sq)],
        ]);
        let mut tracker = AoiTracker::new();

        let hit = tracker.apply(&mut det, &frame(), 0.0, 50.0, 50.0, None).unwrap();
        assert_eq!(hit.aoi_id, "board");
        assert_relative_eq!(hit.mapped[0], 50.0, epsilon = 1e-9);
        assert_relative_eq!(hit.mapped[1], 50.0, epsilon = 1e-9);

        assert!(tracker.apply(&mut det, &frame(), 10.0, 150.0, 150.0, None).is_none());
        assert_eq!(tracker.hits("board").len(), 1);
        assert!(tracker.region_at("board", 10.0).is_some());
    }

    #[test]
    fn missing_detection_falls_back_to_closest_prior_region() {
        let sq = square(0.0, 0.0, 100.0);
        let moved = square(500.0, 0.0, 100.0);
        let mut det = ScriptedAois::new(vec![
            vec![quad_item("board", sq, sq)],
            vec![quad_item("board", sq, moved)],
            vec![],
        ]);
        let mut tracker = AoiTracker::new();
        tracker.apply(&mut det, &frame(), 100.0, -500.0, -500.0, None);
        tracker.apply(&mut det, &frame(), 200.0, -500.0, -500.0, None);

        let hit = tracker.apply(&mut det, &frame(), 240.0, 550.0, 50.0, None).unwrap();
        assert_eq!(hit.aoi_id, "board");
        assert!(tracker.region_at("board", 240.0).is_none());
        assert_eq!(tracker.closest_prior_region("board", 240.0).unwrap().ts, 200.0);

        // Between the two frames the earlier region applies.
        assert!(tracker.contains("board", 150.0, 50.0, 50.0));
        assert!(!tracker.contains("board", 150.0, 550.0, 50.0));
        // Nothing before the first region.
        assert!(!tracker.contains("board", 50.0, 50.0, 50.0));
        assert!(!tracker.contains("poster", 150.0, 50.0, 50.0));
    }

    #[test]
    fn fallback_can_be_disabled() {
        let sq = square(0.0, 0.0, 100.0);
        let mut det = ScriptedAois::new(vec![vec![quad_item("board", sq, sq)], vec![]]);
        let mut tracker = AoiTracker::with_config(TrackerConfig {
            reuse_prior_regions: false,
            ..TrackerConfig::default()
        });
        tracker.apply(&mut det, &frame(), 0.0, -500.0, 0.0, None);
        assert!(tracker.apply(&mut det, &frame(), 10.0, 50.0, 50.0, None).is_none());
    }

    #[test]
    fn overlap_policies_pick_different_aois() {
        let big = square(0.0, 0.0, 200.0);
        let small = square(50.0, 50.0, 50.0);
        let items = vec![quad_item("big", big, big), quad_item("small", small, small)];

        let mut det = ScriptedAois::new(vec![items.clone()]);
        let mut tracker = AoiTracker::new();
        let hit = tracker.apply(&mut det, &frame(), 0.0, 75.0, 75.0, None).unwrap();
        assert_eq!(hit.aoi_id, "big");
        assert!(tracker.hits("small").is_empty());

        let mut det = ScriptedAois::new(vec![items]);
        let mut tracker = AoiTracker::with_config(TrackerConfig {
            overlap_policy: OverlapPolicy::SmallestArea,
            ..TrackerConfig::default()
        });
        let hit = tracker.apply(&mut det, &frame(), 0.0, 75.0, 75.0, None).unwrap();
        assert_eq!(hit.aoi_id, "small");
        assert_eq!(tracker.aoi_at(0.0, 75.0, 75.0), Some("small"));
        assert_eq!(tracker.aoi_at(0.0, 180.0, 180.0), Some("big"));
    }

    #[test]
    fn degenerate_item_is_skipped_without_blocking_others() {
        let sq = square(0.0, 0.0, 100.0);
        let collinear = [[0.0, 0.0], [50.0, 0.0], [100.0, 0.0], [0.0, 100.0]];
        let mut det = ScriptedAois::new(vec![vec![
            quad_item("broken", sq, collinear),
            quad_item("board", sq, sq),
        ]]);
        let mut tracker = AoiTracker::new();
        let hit = tracker.apply(&mut det, &frame(), 0.0, 20.0, 20.0, None).unwrap();
        assert_eq!(hit.aoi_id, "board");
        assert!(tracker.regions("broken").is_empty());
        assert_eq!(tracker.aoi_ids().collect::<Vec<_>>(), vec!["board"]);
    }

    #[test]
    fn hits_annotate_the_event_sink_in_template_space() {
        let reference = square(0.0, 0.0, 400.0);
        let h = perspective_homography();
        let detected_vec = map_points(&h, &reference).unwrap();
        let detected = [detected_vec[0], detected_vec[1], detected_vec[2], detected_vec[3]];
        let gaze = project(&h, 120.0, 300.0).unwrap();

        let mut det = ScriptedAois::new(vec![vec![quad_item("poster", reference, detected)]]);
        let mut tracker = AoiTracker::new();
        let mut events = GazeEvents::new();
        tracker
            .apply(&mut det, &frame(), 40.0, gaze[0], gaze[1], Some(&mut events))
            .unwrap();

        let r = events.get(40.0).unwrap();
        assert_eq!(r.aoi.as_deref(), Some("poster"));
        assert_eq!(r.aoi_score, Some(crate::aoi::DEFAULT_AOI_SCORE));
        assert_relative_eq!(r.aoi_x.unwrap(), 120.0, epsilon = 1e-6);
        assert_relative_eq!(r.aoi_y.unwrap(), 300.0, epsilon = 1e-6);

        let samples = tracker.export_heatmap_samples("poster");
        assert_eq!(samples.len(), 1);
        assert_relative_eq!(samples[0][1], 300.0, epsilon = 1e-6);
    }

    #[test]
    fn centroid_is_contained_and_far_points_are_not() {
        let reference = square(0.0, 0.0, 300.0);
        let h = perspective_homography();
        let d = map_points(&h, &reference).unwrap();
        let item = quad_item("poster", reference, [d[0], d[1], d[2], d[3]]);
        let region = AoiRegion::from_item(&item, 0.0).unwrap();

        let c = crate::homography::polygon_centroid(&region.polygon).unwrap();
        assert!(region.contains(c, 0.0));
        let diag = crate::homography::diameter(&region.polygon);
        assert!(!region.contains([c[0] + 10.0 * diag, c[1] - 10.0 * diag], 10.0));
    }

    #[test]
    fn non_finite_gaze_never_hits() {
        let sq = square(0.0, 0.0, 100.0);
        let mut det = ScriptedAois::new(vec![vec![quad_item("board", sq, sq)]]);
        let mut tracker = AoiTracker::new();
        assert!(tracker
            .apply(&mut det, &frame(), 0.0, f64::NAN, 50.0, None)
            .is_none());
        assert!(tracker.region_at("board", 0.0).is_some());
    }

    #[test]
    fn cluster_hits_score_distance_to_centroid() {
        let sq = square(0.0, 0.0, 100.0);
        let mut item = quad_item("left", sq, sq);
        item.detection = crate::aoi::AoiDetection::Cluster {
            centroid: [50.0, 50.0],
            covariance: [[100.0, 0.0], [0.0, 100.0]],
        };
        let mut det = ScriptedAois::new(vec![vec![item]]);
        let mut tracker = AoiTracker::new();
        let hit = tracker.apply(&mut det, &frame(), 0.0, 53.0, 54.0, None).unwrap();
        assert_relative_eq!(hit.score, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn locate_reads_prior_regions_without_recording() {
        let sq = square(0.0, 0.0, 100.0);
        let mut det = ScriptedAois::new(vec![vec![quad_item("board", sq, sq)]]);
        let mut tracker = AoiTracker::new();
        tracker.apply(&mut det, &frame(), 100.0, -500.0, -500.0, None);

        let hit = tracker.locate(130.0, 20.0, 30.0).unwrap();
        assert_eq!(hit.aoi_id, "board");
        assert_eq!(hit.score, crate::aoi::DEFAULT_AOI_SCORE);
        assert_relative_eq!(hit.mapped[1], 30.0, epsilon = 1e-9);
        assert!(tracker.locate(90.0, 20.0, 30.0).is_none());
        assert!(tracker.hits("board").is_empty());
    }
}
