//! Error kinds named in the engine's contract (State/Range/Type/Internal).
//! Capacity is deliberately absent: it is a normal return value (an
//! `append` that copies fewer rows than requested), not an error.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Operation issued against the wrong representation or segment kind,
    /// e.g. `init_append` on a Persistent segment.
    State(String),
    /// Scan/fetch row index out of bounds for the segment's `count`.
    Range(String),
    /// Codec invoked with a logical type it does not support.
    Type(String),
    /// An internal invariant was violated (e.g. width shrinkage overflow).
    Internal(String),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::State(msg) => write!(f, "state error: {msg}"),
            SegmentError::Range(msg) => write!(f, "range error: {msg}"),
            SegmentError::Type(msg) => write!(f, "type error: {msg}"),
            SegmentError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for SegmentError {}

pub type Result<T> = std::result::Result<T, SegmentError>;
