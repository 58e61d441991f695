//! Segment codec (component D): the representation-tagged dispatch
//! table the column segment drives for scan/append. Grounded on
//! `src/storage/compression/succinct.cpp`'s `SuccinctScanPartial` and
//! `SuccinctAppendLoop` for the packed arm, and a plain `memcpy`-style
//! scan/append for the uncompressed arm.
//!
//! This module holds the `Representation` enum and the free functions
//! that operate on each arm, so `segment.rs` dispatches with a single
//! `match` rather than calling through function pointers the way a
//! virtual-dispatch codec would.

use crate::buffer::{BlockHandle, BufferManager};
use crate::bitvec::BitPackedVector;
use crate::types::IntWidth;

/// Either of the two storage representations a segment may hold.
pub(crate) enum Representation {
    Uncompressed(BlockHandle),
    Packed(BitPackedVector),
}

impl Representation {
    pub(crate) fn is_packed(&self) -> bool {
        matches!(self, Representation::Packed(_))
    }
}

/// Zero-extends up to 8 little-endian bytes into a `u64`, the raw native
/// bit pattern of one element (sign bits of a signed type are carried as
/// ordinary high bits here, not sign-extended: packing and frame-of-
/// reference arithmetic both operate on this unsigned bit pattern, never
/// on the signed logical value, exactly as the source's `uint64_t`
/// accumulators do).
pub(crate) fn bits_from_le_bytes(bytes: &[u8]) -> u64 {
    let mut buf = [0_u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Inverse of `bits_from_le_bytes`, truncated to `type_size` bytes.
pub(crate) fn bits_to_le_bytes(bits: u64, type_size: usize) -> [u8; 8] {
    let mut buf = bits.to_le_bytes();
    for b in &mut buf[type_size..] {
        *b = 0;
    }
    buf
}

/// `memcpy`s `count` elements starting at `start` out of the uncompressed
/// page into `out`, `type_size` bytes per slot, starting at `out_offset`.
pub(crate) fn uncompressed_scan_partial(
    buffer_manager: &dyn BufferManager,
    block: &BlockHandle,
    start: usize,
    count: usize,
    type_size: usize,
    out: &mut [u8],
    out_offset: usize,
) {
    let page = buffer_manager.pin_read(block);
    let src = start * type_size;
    let dst = out_offset * type_size;
    out[dst..dst + count * type_size].copy_from_slice(&page[src..src + count * type_size]);
}

/// Writes `count` elements at `start` onto a packed vector, adding back
/// `min_subtrahend` (wrapping, consistent with the wrapping subtraction
/// performed when the offset was first extracted) and zero-extending each
/// to `type_size` bytes at `out_offset`.
pub(crate) fn packed_scan_partial(
    vec: &BitPackedVector,
    min_subtrahend: u64,
    type_size: usize,
    start: usize,
    count: usize,
    out: &mut [u8],
    out_offset: usize,
) {
    for i in 0..count {
        let bits = vec.get(start + i).wrapping_add(min_subtrahend);
        let dst = (out_offset + i) * type_size;
        out[dst..dst + type_size].copy_from_slice(&bits_to_le_bytes(bits, type_size)[..type_size]);
    }
}

/// Validity-masked append into the uncompressed page. Null source rows
/// store `int_width.null_sentinel_bits()` and never feed the returned
/// min/max. Returns `None` when every appended row was null.
pub(crate) fn uncompressed_append_loop(
    buffer_manager: &dyn BufferManager,
    block: &BlockHandle,
    target_offset: usize,
    int_width: IntWidth,
    data: &[u8],
    validity: Option<&[bool]>,
    offset: usize,
    count: usize,
) -> Option<(u64, u64)> {
    let type_size = int_width.type_size();
    let sentinel = int_width.null_sentinel_bits();
    let mut min_max: Option<(u64, u64)> = None;
    buffer_manager.pin_write(block, &mut |page: &mut [u8]| {
        for i in 0..count {
            let src_idx = offset + i;
            let dst = (target_offset + i) * type_size;
            let is_null = validity.map(|v| !v[src_idx]).unwrap_or(false);
            if is_null {
                page[dst..dst + type_size].copy_from_slice(&bits_to_le_bytes(sentinel, type_size)[..type_size]);
                continue;
            }
            let src = src_idx * type_size;
            page[dst..dst + type_size].copy_from_slice(&data[src..src + type_size]);
            let bits = bits_from_le_bytes(&data[src..src + type_size]);
            min_max = Some(match min_max {
                None => (bits, bits),
                Some((mn, mx)) => (mn.min(bits), mx.max(bits)),
            });
        }
    });
    min_max
}

/// Validity-masked append directly into a packed vector at its current
/// (full, uncompacted) width. Used only while the representation is
/// `Packed` and `compacted == false`, the "succinct mode, adaptive
/// disabled" creation path that starts a segment at `type_size * 8` bits
/// per element and compacts lazily.
pub(crate) fn packed_append_loop(
    vec: &mut BitPackedVector,
    target_offset: usize,
    int_width: IntWidth,
    data: &[u8],
    validity: Option<&[bool]>,
    offset: usize,
    count: usize,
) -> Option<(u64, u64)> {
    let type_size = int_width.type_size();
    let sentinel = int_width.null_sentinel_bits();
    let mut min_max: Option<(u64, u64)> = None;
    for i in 0..count {
        let src_idx = offset + i;
        let target_idx = target_offset + i;
        let is_null = validity.map(|v| !v[src_idx]).unwrap_or(false);
        if is_null {
            vec.set(target_idx, sentinel);
            continue;
        }
        let src = src_idx * type_size;
        let bits = bits_from_le_bytes(&data[src..src + type_size]);
        vec.set(target_idx, bits);
        min_max = Some(match min_max {
            None => (bits, bits),
            Some((mn, mx)) => (mn.min(bits), mx.max(bits)),
        });
    }
    min_max
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_round_trip_through_le_bytes() {
        let bytes = 0x1234_5678_u32.to_le_bytes();
        let bits = bits_from_le_bytes(&bytes);
        assert_eq!(bits, 0x1234_5678);
        assert_eq!(&bits_to_le_bytes(bits, 4)[..4], &bytes);
    }

    #[test]
    fn bits_to_le_bytes_zeroes_beyond_type_size() {
        let out = bits_to_le_bytes(u64::MAX, 2);
        assert_eq!(&out[..2], &[0xFF, 0xFF]);
        assert_eq!(&out[2..], &[0, 0, 0, 0, 0, 0]);
    }
}
