//! Column segment state machine (component C). A segment holds exactly
//! one representation at a time (`Uncompressed` or `Packed`, component
//! D's `Representation`), plus width (carried implicitly by the packed
//! vector), `min_subtrahend`, `compacted`, and the flags that govern
//! whether this segment self-compacts lazily or waits for the adaptive
//! controller.
//!
//! The catalog relationship mirrors `stats.rs`: the catalog holds a
//! `Weak<ColumnSegment>`, the segment holds an `Arc` back to the
//! catalog, and `Drop` deregisters.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::buffer::BufferManager;
use crate::bitvec::BitPackedVector;
use crate::codec::{self, Representation};
use crate::config::EngineConfig;
use crate::error::{Result, SegmentError};
use crate::stats::{ColumnSegmentCatalog, SegmentId};
use crate::types::{min_width_for_range, pad_to_byte, IntWidth};

/// Below this many bytes a transition allocates through
/// `BufferManager::register_small` rather than `allocate`, mirroring the
/// source's `segment_size < Storage::BLOCK_SIZE` check in
/// `UncompressSuccinct`.
const SMALL_BLOCK_THRESHOLD: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Transient,
    Persistent,
}

/// A cursor into one segment's row range, produced by `init_scan` and
/// threaded through `scan`/`scan_partial`/`skip`. Representation-
/// independent: both arms of `Representation` support random access, so
/// a transition between `init_scan` and the next `scan` never requires
/// more than clearing `scan_state_invalidated`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanState {
    cursor: usize,
}

/// Opaque append cursor. Carries no state of its own today: appends are
/// always sequential and single-threaded per segment. It exists so the
/// public contract keeps the usual `init_append(&mut AppendState)` /
/// `append(...)` shape.
#[derive(Debug, Default)]
pub struct AppendState {
    _private: (),
}

struct Inner {
    kind: SegmentKind,
    representation: Representation,
    compacted: bool,
    /// Raw bit pattern subtracted from every stored element; `None` means
    /// no offset. Always expressed over the unsigned native bit pattern,
    /// not the signed logical value (see `codec::bits_from_le_bytes`).
    min_subtrahend: Option<u64>,
    min_observed_bits: Option<u64>,
    max_observed_bits: Option<u64>,
    scan_state_invalidated: bool,
    count: usize,
}

/// The column segment state machine (component C). Holds its buffer
/// manager as `Arc<dyn BufferManager>` so the catalog's segment map
/// does not need to be generic over it.
pub struct ColumnSegment {
    id: SegmentId,
    catalog: Arc<ColumnSegmentCatalog>,
    buffer_manager: Arc<dyn BufferManager>,
    int_width: IntWidth,
    start: usize,
    segment_size: usize,
    succinct_possible: bool,
    background_compaction_enabled: bool,
    padded_to_byte: bool,
    extract_prefix: bool,
    inner: Mutex<Inner>,
}

impl ColumnSegment {
    /// Creates a new transient segment starting at row `start`, reserving
    /// `segment_size` bytes for the uncompressed representation. When
    /// `succinct_enabled && !adaptive_succinct_compression_enabled` the
    /// segment is created directly `Packed` at full width; otherwise it
    /// starts `Uncompressed`.
    pub fn create_transient(
        catalog: Arc<ColumnSegmentCatalog>,
        buffer_manager: Arc<dyn BufferManager>,
        int_width: IntWidth,
        start: usize,
        segment_size: usize,
        config: &EngineConfig,
    ) -> Result<Arc<Self>> {
        let type_size = int_width.type_size();
        let capacity = segment_size / type_size;
        let representation = if config.succinct_enabled && !config.adaptive_succinct_compression_enabled {
            Representation::Packed(BitPackedVector::new(capacity, int_width.full_bit_width())?)
        } else {
            Representation::Uncompressed(buffer_manager.allocate(segment_size))
        };
        let initial_size = match &representation {
            Representation::Packed(vec) => vec.size_in_bytes(),
            Representation::Uncompressed(_) => segment_size,
        };
        buffer_manager.add_to_data_size(initial_size as i64);

        let id = catalog.next_segment_id();
        let seg = Arc::new(ColumnSegment {
            id,
            catalog: Arc::clone(&catalog),
            buffer_manager,
            int_width,
            start,
            segment_size,
            succinct_possible: config.succinct_enabled,
            background_compaction_enabled: config.adaptive_succinct_compression_enabled,
            padded_to_byte: config.succinct_padded_to_next_byte_enabled,
            extract_prefix: config.succinct_extract_prefix_enabled,
            inner: Mutex::new(Inner {
                kind: SegmentKind::Transient,
                representation,
                compacted: false,
                min_subtrahend: None,
                min_observed_bits: None,
                max_observed_bits: None,
                scan_state_invalidated: false,
                count: 0,
            }),
        });
        catalog.add_segment(id, Arc::downgrade(&seg));
        Ok(seg)
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    pub fn is_compacted(&self) -> bool {
        self.inner.lock().unwrap().compacted
    }

    pub fn kind(&self) -> SegmentKind {
        self.inner.lock().unwrap().kind
    }

    fn capacity(&self) -> usize {
        self.segment_size / self.int_width.type_size()
    }

    fn require_transient(&self, inner: &Inner, op: &str) -> Result<()> {
        if inner.kind == SegmentKind::Persistent {
            return Err(SegmentError::State(format!("{op} is not allowed on a persistent segment")));
        }
        Ok(())
    }

    // -- Scan -------------------------------------------------------

    /// Prepares a cursor into the current representation, starting at
    /// the first row of the segment.
    pub fn init_scan(&self) -> ScanState {
        self.inner.lock().unwrap().scan_state_invalidated = false;
        ScanState::default()
    }

    /// Materializes `count` values starting at the cursor into `out` at
    /// offset 0.
    pub fn scan(&self, state: &mut ScanState, count: usize, out: &mut [u8]) -> Result<()> {
        self.scan_partial(state, count, out, 0)
    }

    /// Materializes `count` values starting at the cursor into `out`
    /// starting at `out_offset`.
    pub fn scan_partial(&self, state: &mut ScanState, count: usize, out: &mut [u8], out_offset: usize) -> Result<()> {
        self.catalog.record_read(self.id);

        // Autonomous mode: a segment only compacts itself lazily when
        // the controller does not own the decision.
        if !self.background_compaction_enabled {
            self.compact()?;
        }

        let mut inner = self.inner.lock().unwrap();
        if state.cursor + count > inner.count {
            return Err(SegmentError::Range(format!(
                "scan cursor {}+{count} exceeds segment count {}",
                state.cursor, inner.count
            )));
        }
        // The representation may have changed since `init_scan`; both
        // arms support random access so there is nothing further to
        // reinitialize beyond clearing the flag.
        inner.scan_state_invalidated = false;

        let type_size = self.int_width.type_size();
        match &inner.representation {
            Representation::Uncompressed(block) => {
                codec::uncompressed_scan_partial(
                    self.buffer_manager.as_ref(),
                    block,
                    state.cursor,
                    count,
                    type_size,
                    out,
                    out_offset,
                );
            }
            Representation::Packed(vec) => {
                codec::packed_scan_partial(
                    vec,
                    inner.min_subtrahend.unwrap_or(0),
                    type_size,
                    state.cursor,
                    count,
                    out,
                    out_offset,
                );
            }
        }
        state.cursor += count;
        Ok(())
    }

    /// Advances the cursor by `count` without materializing output.
    pub fn skip(&self, state: &mut ScanState, count: usize) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if state.cursor + count > inner.count {
            return Err(SegmentError::Range(format!(
                "skip cursor {}+{count} exceeds segment count {}",
                state.cursor, inner.count
            )));
        }
        state.cursor += count;
        Ok(())
    }

    /// Writes the single value at `row_id` into `out` at slot `idx`.
    pub fn fetch_row(&self, row_id: usize, out: &mut [u8], idx: usize) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        if row_id < self.start || row_id >= self.start + inner.count {
            return Err(SegmentError::Range(format!(
                "row {row_id} out of range [{}, {})",
                self.start,
                self.start + inner.count
            )));
        }
        let rel = row_id - self.start;
        let type_size = self.int_width.type_size();
        match &inner.representation {
            Representation::Uncompressed(block) => {
                codec::uncompressed_scan_partial(self.buffer_manager.as_ref(), block, rel, 1, type_size, out, idx);
            }
            Representation::Packed(vec) => {
                codec::packed_scan_partial(vec, inner.min_subtrahend.unwrap_or(0), type_size, rel, 1, out, idx);
            }
        }
        Ok(())
    }

    // -- Append -------------------------------------------------------

    /// Allowed only on Transient segments.
    pub fn init_append(&self) -> Result<AppendState> {
        let inner = self.inner.lock().unwrap();
        self.require_transient(&inner, "init_append")?;
        Ok(AppendState::default())
    }

    /// Appends `min(count, capacity_left)` values from `data[offset..]`
    /// (packed `type_size`-byte little-endian elements), respecting
    /// `validity` (a `false` entry marks a null row, stored as the type's
    /// null sentinel and excluded from min/max tracking). Returns the
    /// number of rows actually copied; `0` signals Capacity (the caller
    /// should open a new segment).
    pub fn append(
        &self,
        _state: &mut AppendState,
        data: &[u8],
        validity: Option<&[bool]>,
        offset: usize,
        count: usize,
    ) -> Result<usize> {
        let type_size = self.int_width.type_size();
        if data.len() < (offset + count) * type_size {
            return Err(SegmentError::Type(format!(
                "append data buffer too short for {count} elements of width {type_size}"
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        self.require_transient(&inner, "append")?;

        // Appending into a compacted segment always uncompacts first,
        // so a value wider than the packed width never gets silently
        // truncated.
        let mut just_uncompacted = false;
        if inner.compacted {
            drop(inner);
            self.uncompact()?;
            inner = self.inner.lock().unwrap();
            just_uncompacted = true;
        }

        let capacity = self.capacity();
        if inner.count >= capacity {
            return Ok(0);
        }
        let copy_count = count.min(capacity - inner.count);
        let target_offset = inner.count;

        let min_max = match &mut inner.representation {
            Representation::Uncompressed(block) => codec::uncompressed_append_loop(
                self.buffer_manager.as_ref(),
                block,
                target_offset,
                self.int_width,
                data,
                validity,
                offset,
                copy_count,
            ),
            Representation::Packed(vec) => {
                codec::packed_append_loop(vec, target_offset, self.int_width, data, validity, offset, copy_count)
            }
        };
        if let Some((mn, mx)) = min_max {
            inner.min_observed_bits = Some(inner.min_observed_bits.map_or(mn, |cur| cur.min(mn)));
            inner.max_observed_bits = Some(inner.max_observed_bits.map_or(mx, |cur| cur.max(mx)));
        }
        inner.count += copy_count;
        let became_full = inner.count >= capacity;
        let compacted = inner.compacted;
        drop(inner);

        if !self.background_compaction_enabled && !compacted && (became_full || just_uncompacted) {
            self.compact()?;
        }
        Ok(copy_count)
    }

    /// Triggers `bit_compress` of the packed representation (when the
    /// segment is `Packed`) and returns the occupied byte footprint.
    pub fn finalize_append(&self, _state: AppendState) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        self.require_transient(&inner, "finalize_append")?;
        let is_packed = inner.representation.is_packed();
        drop(inner);
        if is_packed {
            self.bit_compress_packed()?;
        }
        Ok(self.data_size_bytes())
    }

    /// Truncates `count` back to `start_row - start`.
    pub fn revert_append(&self, start_row: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.count = start_row.saturating_sub(self.start);
    }

    // -- Compaction -----------------------------------------------------

    /// Idempotent. No-op unless eligible: a data segment, succinct
    /// packing globally possible, non-empty, and not already compacted.
    pub fn compact(&self) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        self.require_transient(&inner, "compact")?;
        if !self.succinct_possible || inner.count == 0 || inner.compacted {
            return Ok(());
        }
        let is_packed = inner.representation.is_packed();
        drop(inner);
        if is_packed {
            self.bit_compress_packed()
        } else {
            self.transition_uncompressed_to_packed()
        }
    }

    /// Inverse of `compact` for `Packed` segments; no-op otherwise.
    pub fn uncompact(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.require_transient(&inner, "uncompact")?;
        if !inner.compacted {
            return Ok(());
        }
        let count = inner.count;
        let type_size = self.int_width.type_size();
        let subtrahend = inner.min_subtrahend.unwrap_or(0);

        let before = match &inner.representation {
            Representation::Packed(vec) => vec.size_in_bytes(),
            Representation::Uncompressed(_) => {
                return Err(SegmentError::Internal("uncompact called on uncompressed representation".into()));
            }
        };

        let block = if self.segment_size < SMALL_BLOCK_THRESHOLD {
            self.buffer_manager.register_small(self.segment_size)
        } else {
            self.buffer_manager.allocate(self.segment_size)
        };

        if let Representation::Packed(vec) = &inner.representation {
            self.buffer_manager.pin_write(&block, &mut |page: &mut [u8]| {
                for i in 0..count {
                    let bits = vec.get(i).wrapping_add(subtrahend);
                    let off = i * type_size;
                    page[off..off + type_size].copy_from_slice(&codec::bits_to_le_bytes(bits, type_size)[..type_size]);
                }
            });
        }

        inner.representation = Representation::Uncompressed(block);
        inner.compacted = false;
        inner.min_subtrahend = None;
        inner.scan_state_invalidated = true;
        drop(inner);

        debug!(target: "colseg", segment = self.id, before, after = self.segment_size, "uncompact");
        self.buffer_manager.add_to_data_size(self.segment_size as i64 - before as i64);
        Ok(())
    }

    /// Flips a transient segment's representation back to Uncompressed
    /// (if currently Packed) and marks it terminal. Persistent segments
    /// are always stored uncompressed and never re-pack.
    pub fn convert_to_persistent(&self) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.kind == SegmentKind::Persistent {
                return Ok(());
            }
        }
        self.uncompact()?;
        self.inner.lock().unwrap().kind = SegmentKind::Persistent;
        Ok(())
    }

    /// Narrows a `Packed` representation from its current width down to
    /// the minimum width that fits `max_observed - min_observed` (or
    /// `max_observed` alone when frame-of-reference extraction is
    /// disabled). No-op if the computed width is not narrower.
    fn bit_compress_packed(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let (min_bits, max_bits) = match (inner.min_observed_bits, inner.max_observed_bits) {
            (Some(mn), Some(mx)) => (mn, mx),
            _ => {
                // Empty or all-null: nothing observed to compress against.
                inner.compacted = true;
                return Ok(());
            }
        };
        let subtrahend = if self.extract_prefix { min_bits } else { 0 };
        let max_effective = max_bits.wrapping_sub(subtrahend) as u128;
        let mut width = min_width_for_range(max_effective);
        if self.padded_to_byte {
            width = pad_to_byte(width);
        }

        let count = inner.count;
        let current_width = match &inner.representation {
            Representation::Packed(vec) => vec.width(),
            Representation::Uncompressed(_) => {
                return Err(SegmentError::Internal("bit_compress_packed called on uncompressed representation".into()));
            }
        };
        if width >= current_width {
            inner.compacted = true;
            return Ok(());
        }

        let Representation::Packed(vec) = &mut inner.representation else {
            unreachable!("checked above");
        };
        let before = vec.size_in_bytes();
        if subtrahend != 0 {
            // `BitPackedVector::bit_compress` has no notion of an additive
            // offset, so the frame-of-reference shift is applied
            // element-wise first.
            for i in 0..count {
                let v = vec.get(i);
                vec.set(i, v.wrapping_sub(subtrahend));
            }
        }
        vec.bit_compress(width)?;
        let after = vec.size_in_bytes();

        inner.min_subtrahend = if subtrahend != 0 { Some(subtrahend) } else { None };
        inner.compacted = true;
        drop(inner);

        debug!(target: "colseg", segment = self.id, before, after, width, "compact");
        self.buffer_manager.add_to_data_size(after as i64 - before as i64);
        Ok(())
    }

    /// Scans the uncompressed page to find `(min, max)`, chooses a
    /// target width, and emits a new packed vector; the old page handle
    /// is released by dropping it.
    fn transition_uncompressed_to_packed(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.count;
        let type_size = self.int_width.type_size();
        let sentinel = self.int_width.null_sentinel_bits();

        let page = match &inner.representation {
            Representation::Uncompressed(block) => self.buffer_manager.pin_read(block),
            Representation::Packed(_) => {
                return Err(SegmentError::Internal("transition called on packed representation".into()));
            }
        };

        let mut min_bits: Option<u64> = None;
        let mut max_bits: Option<u64> = None;
        let mut raw_bits = Vec::with_capacity(count);
        for i in 0..count {
            let off = i * type_size;
            let bits = codec::bits_from_le_bytes(&page[off..off + type_size]);
            raw_bits.push(bits);
            if bits != sentinel {
                min_bits = Some(min_bits.map_or(bits, |m| m.min(bits)));
                max_bits = Some(max_bits.map_or(bits, |m| m.max(bits)));
            }
        }

        let subtrahend = if self.extract_prefix { min_bits.unwrap_or(0) } else { 0 };
        let max_effective = max_bits.unwrap_or(0).wrapping_sub(subtrahend) as u128;
        let mut width = min_width_for_range(max_effective);
        if self.padded_to_byte {
            width = pad_to_byte(width);
        }

        let capacity = self.segment_size / type_size;
        let mut vec = BitPackedVector::new(capacity, width.max(1))?;
        for (i, bits) in raw_bits.iter().enumerate() {
            let stored = if bits == &sentinel { sentinel } else { bits.wrapping_sub(subtrahend) };
            vec.set(i, stored);
        }
        let after = vec.size_in_bytes();

        inner.min_subtrahend = if subtrahend != 0 { Some(subtrahend) } else { None };
        inner.min_observed_bits = min_bits;
        inner.max_observed_bits = max_bits;
        inner.representation = Representation::Packed(vec);
        inner.compacted = true;
        inner.scan_state_invalidated = true;
        drop(inner);

        debug!(target: "colseg", segment = self.id, before = self.segment_size, after, width, "compact (from uncompressed)");
        self.buffer_manager.add_to_data_size(after as i64 - self.segment_size as i64);
        Ok(())
    }

    // -- Accounting -----------------------------------------------------

    /// The reserved byte capacity for the uncompressed representation.
    pub fn segment_size_bytes(&self) -> usize {
        self.segment_size
    }

    /// The current representation's footprint: the packed vector's exact
    /// size when `Packed`, `segment_size` when `Uncompressed`.
    pub fn data_size_bytes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        match &inner.representation {
            Representation::Packed(vec) => vec.size_in_bytes(),
            Representation::Uncompressed(_) => self.segment_size,
        }
    }

    /// The packed vector's footprint, or `0` when `Uncompressed`.
    pub fn succinct_size_bytes(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        match &inner.representation {
            Representation::Packed(vec) => vec.size_in_bytes(),
            Representation::Uncompressed(_) => 0,
        }
    }
}

impl Drop for ColumnSegment {
    fn drop(&mut self) {
        self.catalog.remove_segment(self.id);
        self.buffer_manager.add_to_data_size(-(self.data_size_bytes() as i64));
    }
}
