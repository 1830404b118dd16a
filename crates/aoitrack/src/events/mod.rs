//! Timestamp-indexed event store.
//!
//! [`GazeEvents`] holds one [`EventRecord`] per timestamp, merging
//! fixations, saccades, logged/JSON events and AOI annotations. Writing a
//! field at an existing timestamp overwrites that field only.

mod filter;

pub use filter::{CompiledFilter, EventFilter};

use std::collections::{BTreeMap, BTreeSet};

use crate::sample::GazeSample;
use crate::segmentation::{
    FixationEvent, FixationFilter, SaccadeEvent, Segmentation, SegmentationError,
};

/// Totally ordered timestamp key.
#[derive(Debug, Clone, Copy)]
pub struct TsKey(pub f64);

impl PartialEq for TsKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for TsKey {}

impl PartialOrd for TsKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TsKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeType {
    Fixation,
    Saccade,
}

/// All annotations at one timestamp.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventRecord {
    pub ts: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaze_type: Option<GazeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixation_x: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixation_y: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saccade_start: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saccade_end: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logged_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoi_score: Option<f64>,
    /// Gaze point mapped into the AOI template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoi_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aoi_y: Option<f64>,
}

impl EventRecord {
    fn empty(ts: f64) -> Self {
        Self {
            ts,
            ..Self::default()
        }
    }

    pub fn is_fixation(&self) -> bool {
        self.gaze_type == Some(GazeType::Fixation)
    }

    pub fn is_saccade(&self) -> bool {
        self.gaze_type == Some(GazeType::Saccade)
    }

    /// Fixation position, when this record is a fixation.
    pub fn fixation_xy(&self) -> Option<[f64; 2]> {
        match (self.is_fixation(), self.fixation_x, self.fixation_y) {
            (true, Some(x), Some(y)) => Some([x as f64, y as f64]),
            _ => None,
        }
    }
}

/// Ordered event store for one (recording, segment) pair.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(from = "Vec<EventRecord>", into = "Vec<EventRecord>")]
pub struct GazeEvents {
    records: BTreeMap<TsKey, EventRecord>,
    processed: BTreeSet<TsKey>,
}

impl From<Vec<EventRecord>> for GazeEvents {
    fn from(records: Vec<EventRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (TsKey(r.ts), r)).collect(),
            processed: BTreeSet::new(),
        }
    }
}

impl From<GazeEvents> for Vec<EventRecord> {
    fn from(events: GazeEvents) -> Self {
        events.records.into_values().collect()
    }
}

impl GazeEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `ts`, created empty when missing.
    pub fn entry(&mut self, ts: f64) -> &mut EventRecord {
        self.records
            .entry(TsKey(ts))
            .or_insert_with(|| EventRecord::empty(ts))
    }

    pub fn get(&self, ts: f64) -> Option<&EventRecord> {
        self.records.get(&TsKey(ts))
    }

    pub fn add_fixation(&mut self, f: &FixationEvent) {
        let r = self.entry(f.ts);
        r.gaze_type = Some(GazeType::Fixation);
        r.event_index = Some(f.index);
        r.duration = Some(f.duration);
        r.fixation_x = Some(f.x);
        r.fixation_y = Some(f.y);
    }

    /// Store a saccade. A fixation already keyed at `s.ts` is kept and the
    /// saccade dropped.
    pub fn add_saccade(&mut self, s: &SaccadeEvent) {
        let r = self.entry(s.ts);
        if r.is_fixation() {
            tracing::debug!(ts = s.ts, "saccade collides with a fixation, dropped");
            return;
        }
        r.gaze_type = Some(GazeType::Saccade);
        r.event_index = Some(s.index);
        r.duration = Some(s.duration);
        r.saccade_start = Some([s.start_x, s.start_y]);
        r.saccade_end = Some([s.end_x, s.end_y]);
    }

    pub fn add_logged_event(&mut self, ts: f64, name: &str) {
        self.entry(ts).logged_event = Some(name.to_string());
    }

    pub fn add_json_event(&mut self, ts: f64, name: &str) {
        self.entry(ts).json_event = Some(name.to_string());
    }

    /// Annotate `ts` with an AOI label and score.
    pub fn set_aoi(&mut self, ts: f64, label: &str, score: f64) {
        let r = self.entry(ts);
        r.aoi = Some(label.to_string());
        r.aoi_score = Some(score);
    }

    /// Annotate `ts` with an AOI hit and the gaze point in template space.
    pub fn set_aoi_hit(&mut self, ts: f64, label: &str, score: f64, mapped: [f64; 2]) {
        self.set_aoi(ts, label, score);
        let r = self.entry(ts);
        r.aoi_x = Some(mapped[0]);
        r.aoi_y = Some(mapped[1]);
    }

    /// Add every fixation and saccade of one segmentation run.
    pub fn extend_from(&mut self, seg: &Segmentation) {
        for f in &seg.fixations {
            self.add_fixation(f);
        }
        for s in &seg.saccades {
            self.add_saccade(s);
        }
    }

    /// Run `filter` over the samples selected by `ts_filter` that earlier
    /// calls have not processed yet, and store the result.
    ///
    /// Returns the number of samples handed to the filter.
    pub fn filter_fixations(
        &mut self,
        filter: &dyn FixationFilter,
        samples: &[GazeSample],
        ts_filter: Option<&EventFilter>,
    ) -> Result<usize, SegmentationError> {
        let compiled = ts_filter.map(|f| f.compile(self));
        let selected: Vec<GazeSample> = samples
            .iter()
            .filter(|s| !self.processed.contains(&TsKey(s.ts)))
            .filter(|s| {
                compiled
                    .as_ref()
                    .map_or(true, |c| c.accepts(s.ts, self.get(s.ts)))
            })
            .copied()
            .collect();
        if selected.is_empty() {
            return Ok(0);
        }
        let seg = filter.filter(&selected)?;
        self.processed.extend(selected.iter().map(|s| TsKey(s.ts)));
        self.extend_from(&seg);
        Ok(selected.len())
    }

    /// Records passing `filter` (all records for `None`), in time order.
    pub fn records(&self, filter: Option<&EventFilter>) -> Vec<&EventRecord> {
        let compiled = filter.map(|f| f.compile(self));
        self.records
            .values()
            .filter(|r| compiled.as_ref().map_or(true, |c| c.accepts(r.ts, Some(r))))
            .collect()
    }

    pub fn fixations(&self, filter: Option<&EventFilter>) -> Vec<&EventRecord> {
        let mut out = self.records(filter);
        out.retain(|r| r.is_fixation());
        out
    }

    pub fn saccades(&self, filter: Option<&EventFilter>) -> Vec<&EventRecord> {
        let mut out = self.records(filter);
        out.retain(|r| r.is_saccade());
        out
    }

    /// `(ts, [x, y])` of every fixation passing `filter`.
    pub fn fixation_points(&self, filter: Option<&EventFilter>) -> Vec<(f64, [f64; 2])> {
        self.records(filter)
            .into_iter()
            .filter_map(|r| r.fixation_xy().map(|xy| (r.ts, xy)))
            .collect()
    }

    /// Latest fixation at or before `ts`; the first fixation when `ts`
    /// precedes all of them.
    pub fn closest_fixation(&self, ts: f64) -> Option<&EventRecord> {
        self.records
            .range(..=TsKey(ts))
            .rev()
            .map(|(_, r)| r)
            .find(|r| r.is_fixation())
            .or_else(|| self.records.values().find(|r| r.is_fixation()))
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.records.keys().map(|k| k.0).collect()
    }

    pub(crate) fn logged_event_timestamps(&self, name: &str) -> Vec<f64> {
        self.records
            .values()
            .filter(|r| r.logged_event.as_deref() == Some(name))
            .map(|r| r.ts)
            .collect()
    }

    pub(crate) fn json_event_timestamps(&self, name: &str) -> Vec<f64> {
        self.records
            .values()
            .filter(|r| r.json_event.as_deref() == Some(name))
            .map(|r| r.ts)
            .collect()
    }
}
