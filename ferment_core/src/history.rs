//! History samples kept per device and the possibly-incomplete records used
//! to rebuild them.

use std::collections::BTreeSet;
use std::collections::VecDeque;

use crate::anomaly::AnomalyReason;

/// One appended entry of a device's gravity history. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    pub timestamp_ms: u64,
    pub raw: f64,
    pub value: f64,
    pub rate_per_hour: f64,
    pub confidence: f64,
    pub anomaly: bool,
    pub reasons: BTreeSet<AnomalyReason>,
    pub raw_temperature: Option<f64>,
    pub temperature: Option<f64>,
}

/// A historical row as it comes back from storage or a CSV file. Any field
/// may be missing; hydration counts rows without a timestamp or gravity as
/// skipped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HistoryRecord {
    pub timestamp_ms: Option<u64>,
    pub gravity: Option<f64>,
    pub temperature: Option<f64>,
}

impl HistoryRecord {
    pub fn new(timestamp_ms: u64, gravity: f64, temperature: Option<f64>) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            gravity: Some(gravity),
            temperature,
        }
    }
}

impl From<&HistorySample> for HistoryRecord {
    fn from(s: &HistorySample) -> Self {
        Self {
            timestamp_ms: Some(s.timestamp_ms),
            gravity: Some(s.raw),
            temperature: s.raw_temperature,
        }
    }
}

impl From<ferment_config::HistoryRow> for HistoryRecord {
    fn from(r: ferment_config::HistoryRow) -> Self {
        Self {
            timestamp_ms: r.timestamp_ms,
            gravity: r.gravity,
            temperature: r.temperature,
        }
    }
}

/// Bounded, append-only buffer. Oldest entries are evicted past the cap.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    cap: usize,
    samples: VecDeque<HistorySample>,
}

impl HistoryBuffer {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap,
            samples: VecDeque::with_capacity(cap.min(1024)),
        }
    }

    pub fn push(&mut self, sample: HistorySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.cap {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn last(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    pub fn first(&self) -> Option<&HistorySample> {
        self.samples.front()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &HistorySample> + ExactSizeIterator {
        self.samples.iter()
    }

    /// Samples with `timestamp_ms >= since_ms`, oldest first.
    pub fn since(&self, since_ms: u64) -> Vec<HistorySample> {
        let start = self.samples.partition_point(|s| s.timestamp_ms < since_ms);
        self.samples.range(start..).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<HistorySample> {
        self.samples.iter().cloned().collect()
    }
}
