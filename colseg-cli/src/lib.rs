//! A small synthetic workload that exercises the engine end to end:
//! sequential insert into a handful of segments, followed by a skewed
//! ("zipf-ish") re-scan pattern, with an adaptive catalog watching over
//! all of it. `bin.rs` is a thin wrapper that initializes logging and
//! prints the resulting summary.

use std::sync::Arc;
use std::time::Duration;

use colseg_engine::{
    BufferManager, ColumnSegment, ColumnSegmentCatalog, EngineConfig, InMemoryBufferManager, IntWidth, Result,
};

/// One segment's footprint before and after the workload, for reporting.
#[derive(Debug, Clone)]
pub struct SegmentReport {
    pub id: u64,
    pub start: usize,
    pub count: usize,
    pub compacted: bool,
    pub data_size_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct DemoSummary {
    pub segments: Vec<SegmentReport>,
    pub used_data_size: i64,
    pub uncompressed_baseline_bytes: usize,
}

const SEGMENT_CAPACITY: usize = 4096;
const SEGMENT_COUNT: usize = 8;

/// Appends `SEGMENT_CAPACITY` sequential `u32` values into each of
/// `SEGMENT_COUNT` segments, then re-scans the first half of the
/// segments far more often than the second half ("hot" vs "cold"),
/// giving the adaptive controller a skewed access pattern to react to.
pub fn run_demo(config: EngineConfig) -> Result<DemoSummary> {
    let buffer_manager: Arc<dyn BufferManager> = Arc::new(InMemoryBufferManager::new());
    let catalog = ColumnSegmentCatalog::new(config.adaptive_succinct_compression_enabled, config.controller.clone());

    let mut segments: Vec<Arc<ColumnSegment>> = Vec::with_capacity(SEGMENT_COUNT);
    for i in 0..SEGMENT_COUNT {
        let start = i * SEGMENT_CAPACITY;
        let segment = ColumnSegment::create_transient(
            Arc::clone(&catalog),
            Arc::clone(&buffer_manager),
            IntWidth::U32,
            start,
            SEGMENT_CAPACITY * IntWidth::U32.type_size(),
            &config,
        )?;

        let mut append_state = segment.init_append()?;
        let values: Vec<u32> = (0..SEGMENT_CAPACITY as u32).map(|row| row + (i as u32) * 1_000_000).collect();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        segment.append(&mut append_state, &bytes, None, 0, values.len())?;
        segment.finalize_append(append_state)?;

        segments.push(segment);
    }

    // Skewed re-scan: the first half gets scanned on every round, the
    // second half only once every eighth round.
    for round in 0..64 {
        for (i, segment) in segments.iter().enumerate() {
            let hot = i < SEGMENT_COUNT / 2;
            if hot || round % 8 == 0 {
                let mut state = segment.init_scan();
                let mut out = vec![0_u8; segment.count() * IntWidth::U32.type_size()];
                segment.scan(&mut state, segment.count(), &mut out)?;
            }
        }
    }

    if config.adaptive_succinct_compression_enabled {
        std::thread::sleep(config.controller.interval.saturating_mul(3).max(Duration::from_millis(50)));
    }

    let segments_report = segments
        .iter()
        .map(|s| SegmentReport {
            id: s.id(),
            start: s.start(),
            count: s.count(),
            compacted: s.is_compacted(),
            data_size_bytes: s.data_size_bytes(),
        })
        .collect();

    let summary = DemoSummary {
        segments: segments_report,
        used_data_size: buffer_manager.used_data_size(),
        uncompressed_baseline_bytes: SEGMENT_COUNT * SEGMENT_CAPACITY * IntWidth::U32.type_size(),
    };

    catalog.shutdown();
    Ok(summary)
}
