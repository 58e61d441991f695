//! Adaptive bit-packed column segment engine.
//!
//! A single analytical column is carved into fixed-capacity segments
//! (`segment`), each holding either an uncompressed page or a bit-packed
//! vector (`bitvec`, `codec`). An access-statistics catalog (`stats`)
//! tracks per-segment read counts and, in adaptive mode, drives a
//! background controller (`controller`) that periodically compacts cold
//! segments and uncompacts hot ones. `buffer` is the thin allocation/
//! accounting contract the engine is built against; `config` holds the
//! tunables; `types` holds the supported integer domain.

pub mod bitvec;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod segment;
pub mod stats;
pub mod types;

pub use buffer::{BlockHandle, BufferManager, InMemoryBufferManager};
pub use config::{AdaptiveControllerConfig, EngineConfig};
pub use error::{Result, SegmentError};
pub use segment::{AppendState, ColumnSegment, ScanState, SegmentKind};
pub use stats::{AccessStatistics, ColumnSegmentCatalog, SegmentId};
pub use types::{IntWidth, LogicalValue};

#[cfg(test)]
mod test;
