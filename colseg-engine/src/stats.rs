//! Access-statistics map and segment catalog (component B): a
//! process-wide registry from segment identity to a monotonically
//! growing read counter, plus a ranked snapshot for the adaptive
//! controller.
//!
//! The catalog stores only non-owning `Weak` handles to segments, which
//! breaks the cyclic reference a segment's own `Arc<ColumnSegmentCatalog>`
//! would otherwise create; a segment's `Drop` impl deregisters itself.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::AdaptiveControllerConfig;
use crate::controller::ControllerHandle;
use crate::segment::ColumnSegment;

pub type SegmentId = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct AccessStatistics {
    pub num_reads: u64,
}

struct Entry {
    segment: Weak<ColumnSegment>,
    stats: AccessStatistics,
}

/// Process-wide (well: per-database-instance) registry of data segments
/// and their read counts, and owner of the lazily-started background
/// adaptive controller thread.
pub struct ColumnSegmentCatalog {
    entries: Mutex<HashMap<SegmentId, Entry>>,
    event_counter: AtomicU64,
    next_id: AtomicU64,
    adaptive_enabled: bool,
    controller_config: AdaptiveControllerConfig,
    controller_started: AtomicBool,
    controller: Mutex<Option<ControllerHandle>>,
}

impl ColumnSegmentCatalog {
    pub fn new(adaptive_enabled: bool, controller_config: AdaptiveControllerConfig) -> Arc<Self> {
        Arc::new(ColumnSegmentCatalog {
            entries: Mutex::new(HashMap::new()),
            event_counter: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            adaptive_enabled,
            controller_config,
            controller_started: AtomicBool::new(false),
            controller: Mutex::new(None),
        })
    }

    pub fn next_segment_id(&self) -> SegmentId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a data segment at `{num_reads: 0}`. Segments that hold
    /// no real data never call this.
    pub fn add_segment(&self, id: SegmentId, segment: Weak<ColumnSegment>) {
        self.entries.lock().unwrap().insert(
            id,
            Entry {
                segment,
                stats: AccessStatistics::default(),
            },
        );
    }

    /// Deregisters unconditionally; called from the segment's `Drop`.
    pub fn remove_segment(&self, id: SegmentId) {
        self.entries.lock().unwrap().remove(&id);
    }

    /// Records a read hit and lazily starts the background controller on
    /// first call, if adaptive mode is configured on. Exactly one
    /// controller loop is ever spawned per catalog.
    pub fn record_read(self: &Arc<Self>, id: SegmentId) {
        {
            let mut entries = self.entries.lock().unwrap();
            entries
                .entry(id)
                .or_insert_with(|| Entry {
                    segment: Weak::new(),
                    stats: AccessStatistics::default(),
                })
                .stats
                .num_reads += 1;
        }
        self.event_counter.fetch_add(1, Ordering::Relaxed);

        if self.adaptive_enabled
            && self
                .controller_started
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let handle = crate::controller::spawn(Arc::clone(self), self.controller_config.clone());
            *self.controller.lock().unwrap() = Some(handle);
        }
    }

    /// Copies current `(id, num_reads)` pairs ranked ascending by
    /// `num_reads`, ties broken by id for determinism.
    pub fn snapshot_ranked_ascending(&self) -> Vec<(SegmentId, u64)> {
        let entries = self.entries.lock().unwrap();
        let mut v: Vec<(SegmentId, u64)> = entries.iter().map(|(id, e)| (*id, e.stats.num_reads)).collect();
        v.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        v
    }

    pub fn event_counter(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }

    pub fn reset_counts(&self) {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            entry.stats.num_reads = 0;
        }
        self.event_counter.store(0, Ordering::Relaxed);
    }

    /// Upgrades a tracked segment's weak handle, or `None` if it has
    /// since been destroyed (the controller must tolerate this).
    pub fn upgrade(&self, id: SegmentId) -> Option<Arc<ColumnSegment>> {
        self.entries.lock().unwrap().get(&id).and_then(|e| e.segment.upgrade())
    }

    /// Sum of `data_size_bytes()` across all currently-live tracked segments.
    pub fn total_data_size(&self) -> usize {
        let entries = self.entries.lock().unwrap();
        entries
            .values()
            .filter_map(|e| e.segment.upgrade())
            .map(|s| s.data_size_bytes())
            .sum()
    }

    /// Stops and joins the background controller thread, if one was
    /// started. Safe to call multiple times.
    pub fn shutdown(&self) {
        if let Some(handle) = self.controller.lock().unwrap().take() {
            handle.stop_and_join();
        }
    }
}

impl Drop for ColumnSegmentCatalog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn snapshot_is_ranked_ascending_with_id_tiebreak() {
        let catalog = ColumnSegmentCatalog::new(false, AdaptiveControllerConfig::default());
        catalog.add_segment(2, Weak::new());
        catalog.add_segment(1, Weak::new());
        catalog.add_segment(3, Weak::new());
        // Simulate reads directly through the entry map via record_read,
        // which only requires the id to be present (weak handle unused here).
        for _ in 0..5 {
            catalog.record_read(2);
        }
        catalog.record_read(1);
        // id 3 stays at zero reads.
        let snap = catalog.snapshot_ranked_ascending();
        assert_eq!(snap, vec![(3, 0), (1, 1), (2, 5)]);
    }

    #[test]
    fn reset_counts_zeros_everything() {
        let catalog = ColumnSegmentCatalog::new(false, AdaptiveControllerConfig::default());
        catalog.add_segment(1, Weak::new());
        catalog.record_read(1);
        catalog.record_read(1);
        catalog.reset_counts();
        assert_eq!(catalog.event_counter(), 0);
        assert_eq!(catalog.snapshot_ranked_ascending(), vec![(1, 0)]);
    }
}
