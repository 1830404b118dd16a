//! Descriptive fixation metrics, overall and per AOI.
//!
//! All per-AOI maps are keyed by AOI label in lexical order. Fixations
//! without an AOI annotation count towards the overall figures only.

use std::collections::BTreeMap;

use crate::events::{EventFilter, EventRecord, GazeEvents};

/// Summary statistics of a numeric column.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` for a single value.
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub q50: f64,
    pub q75: f64,
    pub max: f64,
}

impl Stats {
    /// Statistics of the finite entries of `values`; `None` when there are
    /// none.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
        if v.is_empty() {
            return None;
        }
        v.sort_by(f64::total_cmp);
        let n = v.len();
        let mean = v.iter().sum::<f64>() / n as f64;
        let std = (n > 1).then(|| {
            let ss: f64 = v.iter().map(|x| (x - mean).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        });
        Some(Self {
            count: n,
            mean,
            std,
            min: v[0],
            q25: quantile(&v, 0.25),
            q50: quantile(&v, 0.5),
            q75: quantile(&v, 0.75),
            max: v[n - 1],
        })
    }

    pub fn median(&self) -> f64 {
        self.q50
    }
}

/// Linear-interpolated quantile of sorted, non-empty values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Everything [`FixationMetrics`] computes, for reporting.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsReport {
    pub fixation_count: usize,
    pub duration: Option<Stats>,
    pub x: Option<Stats>,
    pub y: Option<Stats>,
    pub onset: f64,
    pub time_to_first_fixation: BTreeMap<String, Option<f64>>,
    pub first_fixation_duration: BTreeMap<String, Option<u64>>,
    pub total_fixation_duration: BTreeMap<String, u64>,
    pub fixation_count_per_aoi: BTreeMap<String, usize>,
    pub duration_per_aoi: BTreeMap<String, Stats>,
}

/// Metrics over the fixations of one event store.
pub struct FixationMetrics<'a> {
    fixations: Vec<&'a EventRecord>,
}

impl<'a> FixationMetrics<'a> {
    /// Fixations of `events` passing `filter` (all of them for `None`).
    pub fn new(events: &'a GazeEvents, filter: Option<&EventFilter>) -> Self {
        Self {
            fixations: events.fixations(filter),
        }
    }

    pub fn fixation_count(&self) -> usize {
        self.fixations.len()
    }

    fn column(&self, f: impl Fn(&EventRecord) -> Option<f64>) -> Vec<f64> {
        self.fixations.iter().filter_map(|r| f(*r)).collect()
    }

    pub fn duration_stats(&self) -> Option<Stats> {
        Stats::from_values(&self.column(|r| r.duration.map(|d| d as f64)))
    }

    pub fn x_stats(&self) -> Option<Stats> {
        Stats::from_values(&self.column(|r| r.fixation_x.map(|x| x as f64)))
    }

    pub fn y_stats(&self) -> Option<Stats> {
        Stats::from_values(&self.column(|r| r.fixation_y.map(|y| y as f64)))
    }

    /// AOI labels present on any fixation.
    pub fn aoi_labels(&self) -> Vec<&'a str> {
        let mut labels: Vec<&'a str> = self
            .fixations
            .iter()
            .filter_map(|&r| r.aoi.as_deref())
            .collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    fn by_aoi(&self) -> BTreeMap<&'a str, Vec<&'a EventRecord>> {
        let mut out: BTreeMap<&str, Vec<&EventRecord>> = BTreeMap::new();
        for &r in &self.fixations {
            if let Some(aoi) = r.aoi.as_deref() {
                out.entry(aoi).or_default().push(r);
            }
        }
        out
    }

    fn first_after(&self, aoi: &str, onset: f64) -> Option<&'a EventRecord> {
        self.fixations
            .iter()
            .copied()
            .find(|r| r.ts >= onset && r.aoi.as_deref() == Some(aoi))
    }

    /// Time from `onset` to the first fixation on each AOI; `None` when the
    /// AOI is only fixated before `onset`.
    pub fn time_to_first_fixation(&self, onset: f64) -> BTreeMap<String, Option<f64>> {
        self.aoi_labels()
            .into_iter()
            .map(|aoi| (aoi.to_string(), self.first_after(aoi, onset).map(|r| r.ts - onset)))
            .collect()
    }

    /// Duration of the first fixation on each AOI at or after `onset`.
    pub fn first_fixation_duration(&self, onset: f64) -> BTreeMap<String, Option<u64>> {
        self.aoi_labels()
            .into_iter()
            .map(|aoi| {
                let d = self.first_after(aoi, onset).and_then(|r| r.duration);
                (aoi.to_string(), d)
            })
            .collect()
    }

    pub fn total_fixation_duration(&self) -> BTreeMap<String, u64> {
        self.by_aoi()
            .into_iter()
            .map(|(aoi, rs)| (aoi.to_string(), rs.iter().filter_map(|r| r.duration).sum()))
            .collect()
    }

    pub fn fixation_count_per_aoi(&self) -> BTreeMap<String, usize> {
        self.by_aoi()
            .into_iter()
            .map(|(aoi, rs)| (aoi.to_string(), rs.len()))
            .collect()
    }

    pub fn duration_stats_per_aoi(&self) -> BTreeMap<String, Stats> {
        self.by_aoi()
            .into_iter()
            .filter_map(|(aoi, rs)| {
                let d: Vec<f64> = rs.iter().filter_map(|r| r.duration.map(|d| d as f64)).collect();
                Stats::from_values(&d).map(|s| (aoi.to_string(), s))
            })
            .collect()
    }

    pub fn report(&self, onset: f64) -> MetricsReport {
        MetricsReport {
            fixation_count: self.fixation_count(),
            duration: self.duration_stats(),
            x: self.x_stats(),
            y: self.y_stats(),
            onset,
            time_to_first_fixation: self.time_to_first_fixation(onset),
            first_fixation_duration: self.first_fixation_duration(onset),
            total_fixation_duration: self.total_fixation_duration(),
            fixation_count_per_aoi: self.fixation_count_per_aoi(),
            duration_per_aoi: self.duration_stats_per_aoi(),
        }
    }
}
