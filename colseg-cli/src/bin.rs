//! Demonstration binary: runs the synthetic insert-then-rescan workload
//! defined in `lib.rs` under adaptive compaction and prints a summary of
//! which segments ended up compacted.

use colseg_cli::run_demo;
use colseg_engine::EngineConfig;

fn main() -> colseg_base::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = EngineConfig {
        adaptive_succinct_compression_enabled: true,
        ..EngineConfig::default()
    };

    let summary = run_demo(config)?;
    println!(
        "{} bytes used across {} segments (uncompressed baseline: {} bytes)",
        summary.used_data_size,
        summary.segments.len(),
        summary.uncompressed_baseline_bytes,
    );
    for segment in &summary.segments {
        println!(
            "  segment {:>3} start={:<8} count={:<6} compacted={:<5} data_size={}",
            segment.id, segment.start, segment.count, segment.compacted, segment.data_size_bytes,
        );
    }
    Ok(())
}
