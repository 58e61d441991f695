//! Configuration flags: plain structs, no loader of any kind.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the background adaptive compaction controller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveControllerConfig {
    /// How long the controller sleeps between iterations. Production use
    /// means tens of seconds; tests use a much shorter interval.
    pub interval: Duration,
    /// Compression rate `ρ`: the cumulative-fraction cutoff below which a
    /// segment is compacted and above which it is left/expanded.
    pub compression_rate: f64,
    /// Selects the cumulative-weighting variant: `false` increments by 1
    /// per ranked segment (equal-weight), `true` increments by the
    /// segment's own `num_reads` (reacts faster to sudden hot-spot shifts
    /// but can thrash).
    pub weighted: bool,
}

impl Default for AdaptiveControllerConfig {
    fn default() -> Self {
        AdaptiveControllerConfig {
            interval: Duration::from_secs(10),
            compression_rate: 0.90,
            weighted: false,
        }
    }
}

/// The four external configuration flags, plus the controller's own tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Master switch. If false, every segment is Uncompressed and the
    /// controller is dormant.
    pub succinct_enabled: bool,
    /// Switches control between "compact on creation" (false, autonomous
    /// lazy self-compaction on first scan) and "controller decides" (true).
    pub adaptive_succinct_compression_enabled: bool,
    /// Rounds chosen bit widths up to the next multiple of 8.
    pub succinct_padded_to_next_byte_enabled: bool,
    /// Enables frame-of-reference: subtract the observed min before packing.
    pub succinct_extract_prefix_enabled: bool,
    pub controller: AdaptiveControllerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            succinct_enabled: true,
            adaptive_succinct_compression_enabled: false,
            succinct_padded_to_next_byte_enabled: false,
            succinct_extract_prefix_enabled: true,
            controller: AdaptiveControllerConfig::default(),
        }
    }
}
