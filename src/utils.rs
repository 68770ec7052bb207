//! Helper functions for the allocator. These are functions that don't
//! particularly belong to any concrete module of the crate.

use std::mem;

/// Alignment required for every address handed to a caller. Matches the
/// machine word size, 8 bytes on the 64 bit targets we care about.
pub(crate) const ALIGNMENT: usize = mem::size_of::<usize>();

/// It aligns `to_be_aligned` upwards using `alignment`.
///
/// This is used to round user requests up to [`ALIGNMENT`] and to keep the
/// block header size a multiple of it, so the payload that follows every
/// header stays aligned as well. `alignment` must be a power of two.
pub(crate) const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}

/// Checked variant of [`align`]: `None` when rounding up would wrap around
/// the address space. A request that close to `usize::MAX` can never be
/// satisfied, so callers treat `None` as out of memory.
pub(crate) const fn checked_align(to_be_aligned: usize, alignment: usize) -> Option<usize> {
    match to_be_aligned.checked_add(alignment - 1) {
        Some(sum) => Some(sum & !(alignment - 1)),
        None => None,
    }
}
