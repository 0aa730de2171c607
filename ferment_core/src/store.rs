//! Persistence seam.
//!
//! The core never owns long-term storage. It talks to a [`HistoryStore`]
//! and, on the hot path, only through a [`StoreWriter`]: a background thread
//! that owns the store and is fed through a bounded channel, so a slow store
//! can never stall ingestion or actuation.
//!
//! Safety: each `StoreWriter` spawns exactly one thread, which drains the
//! queue and exits when the writer is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crossbeam_channel as xch;

use crate::error::Result;
use crate::history::HistorySample;
use crate::safety::ControlEvent;
use crate::util::lock;

pub trait HistoryStore: Send {
    fn append_sample(&mut self, device_id: &str, sample: HistorySample) -> Result<()>;
    /// The newest `limit` samples at or after `since_ms`, oldest first.
    fn query_history(&self, device_id: &str, since_ms: u64, limit: usize) -> Result<Vec<HistorySample>>;
    fn append_control_event(&mut self, batch_id: &str, event: ControlEvent) -> Result<()>;
    /// Every event at or after `since_ms`, oldest first.
    fn query_control_history(&self, batch_id: &str, since_ms: u64) -> Result<Vec<ControlEvent>>;
}

/// Ordered in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    samples: HashMap<String, Vec<HistorySample>>,
    events: HashMap<String, Vec<ControlEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryStore {
    fn append_sample(&mut self, device_id: &str, sample: HistorySample) -> Result<()> {
        let v = self.samples.entry(device_id.to_owned()).or_default();
        let at = v.partition_point(|s| s.timestamp_ms <= sample.timestamp_ms);
        v.insert(at, sample);
        Ok(())
    }

    fn query_history(&self, device_id: &str, since_ms: u64, limit: usize) -> Result<Vec<HistorySample>> {
        let Some(v) = self.samples.get(device_id) else {
            return Ok(Vec::new());
        };
        let start = v.partition_point(|s| s.timestamp_ms < since_ms);
        let tail = &v[start..];
        let skip = tail.len().saturating_sub(limit);
        Ok(tail[skip..].to_vec())
    }

    fn append_control_event(&mut self, batch_id: &str, event: ControlEvent) -> Result<()> {
        let v = self.events.entry(batch_id.to_owned()).or_default();
        let at = v.partition_point(|e| e.timestamp_ms <= event.timestamp_ms);
        v.insert(at, event);
        Ok(())
    }

    fn query_control_history(&self, batch_id: &str, since_ms: u64) -> Result<Vec<ControlEvent>> {
        let Some(v) = self.events.get(batch_id) else {
            return Ok(Vec::new());
        };
        let start = v.partition_point(|e| e.timestamp_ms < since_ms);
        Ok(v[start..].to_vec())
    }
}

/// Shared handle so a store can be queried while a writer thread appends.
impl<S: HistoryStore> HistoryStore for Arc<Mutex<S>> {
    fn append_sample(&mut self, device_id: &str, sample: HistorySample) -> Result<()> {
        lock(self).append_sample(device_id, sample)
    }

    fn query_history(&self, device_id: &str, since_ms: u64, limit: usize) -> Result<Vec<HistorySample>> {
        lock(self).query_history(device_id, since_ms, limit)
    }

    fn append_control_event(&mut self, batch_id: &str, event: ControlEvent) -> Result<()> {
        lock(self).append_control_event(batch_id, event)
    }

    fn query_control_history(&self, batch_id: &str, since_ms: u64) -> Result<Vec<ControlEvent>> {
        lock(self).query_control_history(batch_id, since_ms)
    }
}

enum Pending {
    Sample(String, HistorySample),
    Event(String, ControlEvent),
}

/// Non-blocking front for a [`HistoryStore`].
pub struct StoreWriter {
    tx: Option<xch::Sender<Pending>>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl StoreWriter {
    pub const DEFAULT_QUEUE: usize = 1024;

    pub fn spawn<S: HistoryStore + 'static>(mut store: S, queue: usize) -> Self {
        let (tx, rx) = xch::bounded::<Pending>(queue.max(1));
        let join_handle = std::thread::spawn(move || {
            // Ends once every sender is gone and the queue is drained
            for w in rx.iter() {
                let res = match w {
                    Pending::Sample(id, s) => store.append_sample(&id, s),
                    Pending::Event(id, e) => store.append_control_event(&id, e),
                };
                if let Err(e) = res {
                    tracing::warn!(error = %e, "persistence write failed");
                }
            }
            tracing::trace!("Store writer thread exiting cleanly");
        });
        Self {
            tx: Some(tx),
            join_handle: Some(join_handle),
        }
    }

    fn send(&self, w: Pending) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        match tx.try_send(w) {
            Ok(()) => true,
            Err(xch::TrySendError::Full(_)) => {
                tracing::warn!("persistence queue full, write dropped");
                false
            }
            Err(xch::TrySendError::Disconnected(_)) => {
                tracing::warn!("persistence writer gone, write dropped");
                false
            }
        }
    }

    /// Queue a sample; returns false if it was dropped.
    pub fn append_sample(&self, device_id: &str, sample: HistorySample) -> bool {
        self.send(Pending::Sample(device_id.to_owned(), sample))
    }

    /// Queue a control event; returns false if it was dropped.
    pub fn append_control_event(&self, batch_id: &str, event: ControlEvent) -> bool {
        self.send(Pending::Event(batch_id.to_owned(), event))
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what is queued and exit
        drop(self.tx.take());
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("Store writer thread joined successfully"),
                Err(e) => tracing::warn!(?e, "Store writer thread panicked during shutdown"),
            }
        }
    }
}
