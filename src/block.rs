use std::mem;

use crate::utils::{ALIGNMENT, align};

/// Header size of a block, rounded up so the payload that follows it keeps
/// the required alignment.
pub(crate) const BLOCK_HEADER_SIZE: usize = align(mem::size_of::<BlockHeader>(), ALIGNMENT);

/// Sentinel stored in [`BlockHeader::tag`] while a block is handed out to a
/// caller. It is cleared again on release, which is what lets us catch most
/// double frees and foreign pointers. A heuristic, not a guarantee.
pub(crate) const LIVE_TAG: u32 = 0x1234_5678;

/// "No block" value for [`BlockHeader::next`]. Links are byte offsets into
/// the heap segment, so `usize::MAX` can never be a real one.
pub(crate) const NIL: usize = usize::MAX;

/// This is the structure of a block. The fields of the block are its
/// metadata, content is placed right after this header:
///
/// ```text
/// +---------------------+ <------+
/// |        size         |        |
/// +---------------------+        |
/// |        next         |        | -> Header
/// +---------------------+        |
/// |    free  |  tag     |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Addressable content
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// Headers live inside the heap segment itself, directly in front of the
/// bytes they describe. Instead of chaining raw pointers, `next` holds the
/// byte offset of the successor header within the segment; the heap
/// translates offsets to addresses through a bounds check, so a corrupt link
/// trips an assertion instead of a wild read.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct BlockHeader {
    /// Usable size of the block in bytes. Always a multiple of
    /// [`ALIGNMENT`], never includes the header itself.
    pub size: usize,
    /// Offset of the next header in the segment, or [`NIL`] for the tail.
    pub next: usize,
    /// Whether the block is free to reuse.
    pub free: bool,
    /// [`LIVE_TAG`] while allocated, zero otherwise.
    pub tag: u32,
}

// The payload starts at `offset + BLOCK_HEADER_SIZE`, so the header size has
// to be a multiple of the alignment for payloads to come out aligned.
const _: () = assert!(BLOCK_HEADER_SIZE % ALIGNMENT == 0);
