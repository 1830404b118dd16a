//! Timestamp and label filters over the event store.

use std::collections::BTreeSet;

use super::{EventRecord, GazeEvents, TsKey};

/// Selection of events (or raw samples) by time or annotation.
///
/// Interval bounds are inclusive. Filters based on logged or JSON events
/// read those events from the store they are compiled against.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventFilter {
    /// Exactly these timestamps.
    Timestamps(Vec<f64>),
    /// `from <= ts <= to`.
    Between { from: f64, to: f64 },
    /// Records carrying this logged event.
    SingleLoggedEvent(String),
    /// `[t, t + offset]` around every occurrence `t` of a logged event, or
    /// `[t + offset, t]` for negative offsets.
    AroundLoggedEvents { event: String, offset: f64 },
    /// `[from_i, to_i]` for the i-th occurrences of two logged events.
    BetweenLoggedEvents { from: String, to: String },
    /// Records carrying this JSON event.
    SingleJsonEvent(String),
    /// `[from_i, to_i]` for the i-th occurrences of two JSON events.
    BetweenJsonEvents { from: String, to: String },
    /// Records annotated with one of these AOI labels; empty means any AOI.
    Aoi(Vec<String>),
}

/// A filter resolved against a store, ready to test timestamps.
#[derive(Debug, Clone)]
pub enum CompiledFilter {
    Timestamps(BTreeSet<TsKey>),
    Ranges(Vec<[f64; 2]>),
    LoggedEvent(String),
    JsonEvent(String),
    Aoi(Vec<String>),
}

fn pairwise(from: &[f64], to: &[f64]) -> Vec<[f64; 2]> {
    from.iter().zip(to).map(|(&a, &b)| [a, b]).collect()
}

impl EventFilter {
    pub fn between(from: f64, to: f64) -> Self {
        Self::Between { from, to }
    }

    pub fn compile(&self, events: &GazeEvents) -> CompiledFilter {
        match self {
            Self::Timestamps(ts) => {
                CompiledFilter::Timestamps(ts.iter().map(|&t| TsKey(t)).collect())
            }
            Self::Between { from, to } => CompiledFilter::Ranges(vec![[*from, *to]]),
            Self::SingleLoggedEvent(name) => CompiledFilter::LoggedEvent(name.clone()),
            Self::AroundLoggedEvents { event, offset } => CompiledFilter::Ranges(
                events
                    .logged_event_timestamps(event)
                    .into_iter()
                    .map(|t| {
                        if *offset >= 0.0 {
                            [t, t + offset]
                        } else {
                            [t + offset, t]
                        }
                    })
                    .collect(),
            ),
            Self::BetweenLoggedEvents { from, to } => CompiledFilter::Ranges(pairwise(
                &events.logged_event_timestamps(from),
                &events.logged_event_timestamps(to),
            )),
            Self::SingleJsonEvent(name) => CompiledFilter::JsonEvent(name.clone()),
            Self::BetweenJsonEvents { from, to } => CompiledFilter::Ranges(pairwise(
                &events.json_event_timestamps(from),
                &events.json_event_timestamps(to),
            )),
            Self::Aoi(labels) => CompiledFilter::Aoi(labels.clone()),
        }
    }
}

impl CompiledFilter {
    /// Whether a timestamp (with its record, if the store has one) passes.
    pub fn accepts(&self, ts: f64, record: Option<&EventRecord>) -> bool {
        match self {
            Self::Timestamps(set) => set.contains(&TsKey(ts)),
            Self::Ranges(ranges) => ranges.iter().any(|r| ts >= r[0] && ts <= r[1]),
            Self::LoggedEvent(name) => {
                record.and_then(|r| r.logged_event.as_deref()) == Some(name.as_str())
            }
            Self::JsonEvent(name) => {
                record.and_then(|r| r.json_event.as_deref()) == Some(name.as_str())
            }
            Self::Aoi(labels) => match record.and_then(|r| r.aoi.as_deref()) {
                Some(aoi) => labels.is_empty() || labels.iter().any(|l| l == aoi),
                None => false,
            },
        }
    }
}
