//! Adaptive compaction controller (component E): a single long-lived
//! background loop, started lazily on first read access once
//! `adaptive_succinct_compression_enabled` is configured, that
//! periodically ranks segments by recent reads and issues `compact`/
//! `uncompact` to partition them into cold/hot sets.
//!
//! Runs as a real loop with a joinable shutdown, rather than a detached
//! one-shot thread: cancellation always waits for the in-flight
//! iteration to finish before returning.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, trace, warn};

use crate::config::AdaptiveControllerConfig;
use crate::stats::ColumnSegmentCatalog;

pub struct ControllerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn stop_and_join(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub fn spawn(catalog: Arc<ColumnSegmentCatalog>, config: AdaptiveControllerConfig) -> ControllerHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let join = std::thread::Builder::new()
        .name("colseg-adaptive-controller".into())
        .spawn(move || loop {
            match shutdown_rx.recv_timeout(config.interval) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
                Err(mpsc::RecvTimeoutError::Timeout) => run_iteration(&catalog, &config),
            }
        })
        .expect("failed to spawn adaptive controller thread");
    ControllerHandle {
        shutdown_tx,
        join: Some(join),
    }
}

fn run_iteration(catalog: &Arc<ColumnSegmentCatalog>, config: &AdaptiveControllerConfig) {
    let snapshot = catalog.snapshot_ranked_ascending();
    let r = snapshot.len();
    if r == 0 {
        return;
    }
    debug!(
        target: "colseg",
        tracked = r,
        rho = config.compression_rate,
        "adaptive controller iteration starting"
    );

    let mut cum: f64 = 0.0;
    for (id, num_reads) in &snapshot {
        cum += if config.weighted { *num_reads as f64 } else { 1.0 };
        let cold = cum / r as f64 <= config.compression_rate;

        let Some(segment) = catalog.upgrade(*id) else {
            trace!(target: "colseg", segment = id, "skipping destroyed segment");
            continue;
        };
        let outcome = if cold { segment.compact() } else { segment.uncompact() };
        match outcome {
            Ok(()) => trace!(
                target: "colseg",
                segment = id,
                num_reads,
                action = if cold { "compact" } else { "uncompact" },
                "adaptive controller decision applied"
            ),
            Err(err) => warn!(target: "colseg", segment = id, %err, "adaptive controller action failed, skipping"),
        }
    }

    catalog.reset_counts();
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn iteration_on_empty_snapshot_is_a_no_op() {
        let catalog = ColumnSegmentCatalog::new(true, AdaptiveControllerConfig::default());
        // Should not panic on an empty registry.
        run_iteration(&catalog, &AdaptiveControllerConfig::default());
        assert_eq!(catalog.event_counter(), 0);
    }

    /// Pins the R=10, equal-weight, default-rho boundary spec.md Scenario 3
    /// exercises literally: the 9th of 10 ranked segments lands at
    /// `cum/R == 9/10 == 0.90`, exactly `compression_rate`. That rank must
    /// classify cold (compact), not hot, so a 9-cold/1-hot partition is
    /// reachable at all under the default config.
    #[test]
    fn rank_nine_of_ten_classifies_cold_at_default_rho() {
        use crate::buffer::{BufferManager, InMemoryBufferManager};
        use crate::config::EngineConfig;
        use crate::segment::ColumnSegment;
        use crate::types::IntWidth;

        let bm: Arc<dyn BufferManager> = Arc::new(InMemoryBufferManager::new());
        let catalog = ColumnSegmentCatalog::new(false, AdaptiveControllerConfig::default());
        let config = EngineConfig {
            adaptive_succinct_compression_enabled: true,
            ..EngineConfig::default()
        };

        let mut segments = Vec::new();
        for i in 0..10 {
            let seg = ColumnSegment::create_transient(Arc::clone(&catalog), Arc::clone(&bm), IntWidth::U32, i * 4, 4 * 4, &config).unwrap();
            let mut state = seg.init_append().unwrap();
            let values: Vec<u32> = (0..4).collect();
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            seg.append(&mut state, &bytes, None, 0, values.len()).unwrap();
            seg.finalize_append(state).unwrap();
            segments.push(seg);
        }

        // Ranks ascending 1..=10 line up with creation order: segment i
        // gets i reads, so ties never occur and the id tie-break never
        // matters here.
        for (i, seg) in segments.iter().enumerate() {
            for _ in 0..i {
                catalog.record_read(seg.id());
            }
        }

        run_iteration(&catalog, &AdaptiveControllerConfig::default());

        // Rank 9 (segments[8]): cum=9, 9/10 == rho exactly, must be cold.
        assert!(segments[8].is_compacted(), "rank 9 of 10 at rho=0.90 must classify cold");
        // Rank 10 (segments[9]): cum=10, strictly above rho, stays hot.
        assert!(!segments[9].is_compacted());
    }
}
