use std::ptr;

use crate::block::{BLOCK_HEADER_SIZE, BlockHeader, LIVE_TAG, NIL};
use crate::grow::GrowHeap;
use crate::trace;
use crate::utils::{ALIGNMENT, align, checked_align};

/// First-fit heap allocator over one contiguous, growable segment.
///
/// Every allocation is a [`BlockHeader`] followed by its payload, and the
/// headers form a singly linked list ordered by strictly increasing offset:
///
/// ```text
///              +-------- next --------+    +------ next ------+
///              |                      |    |                  |
/// +--------+---|----+---------+    +--v----+------+    +------v-+-----------+
/// |  head--> Header | payload |    | Header | pay |    | Header |  payload  |
/// +--------+--------+---------+    +--------+-----+    +--------+-----------+
///  segment                                                          boundary ->
/// ```
///
/// `allocate` first scans the list for a free block big enough (first fit),
/// splitting off the tail of an oversized match, and only grows the segment
/// when nothing fits. `release` marks a block free and then merges every run
/// of touching free blocks, so no two adjacent blocks are ever left free.
///
/// The heap owns its segment and nothing else, so tests can run any number
/// of independent heaps side by side. The process-wide instance lives in
/// [`crate::ffi`].
pub struct Heap<G: GrowHeap> {
    segment: G,
    head: usize,
}

/// Snapshot of one block, as yielded by [`Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Byte offset of the block header within the segment.
    pub offset: usize,
    /// Usable size of the block in bytes.
    pub size: usize,
    /// Whether the block is currently free.
    pub free: bool,
}

/// Iterator over the block list. See [`Heap::blocks`].
pub struct Blocks<'a, G: GrowHeap> {
    heap: &'a Heap<G>,
    off: usize,
}

impl<G: GrowHeap> Heap<G> {
    /// Creates an empty heap over `segment`. Nothing is requested from the
    /// segment until the first allocation.
    pub const fn new(segment: G) -> Self {
        Self { segment, head: NIL }
    }

    /// Allocates `size` bytes and returns the address of the usable region,
    /// aligned to [`ALIGNMENT`].
    ///
    /// A zero `size` yields null without touching the heap. Null is also
    /// returned when the segment cannot grow any further; that condition is
    /// reported once and never retried.
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        trace::line(trace::ALLOCATING);

        if size == 0 {
            return ptr::null_mut();
        }

        // A size that cannot even be rounded up is unsatisfiable; report it
        // as out of memory instead of wrapping around.
        let Some(size) = checked_align(size, ALIGNMENT) else {
            return ptr::null_mut();
        };

        if self.head == NIL {
            return match self.request_space(NIL, size) {
                Some(off) => {
                    self.head = off;
                    self.payload(off)
                }
                None => ptr::null_mut(),
            };
        }

        match self.find_free(size) {
            Some(off) => {
                let mut header = self.load(off);

                // Split only when the leftover can hold a header and at
                // least one aligned byte of payload.
                if header.size > size + BLOCK_HEADER_SIZE {
                    self.split(off, size);
                    header = self.load(off);
                }

                header.free = false;
                header.tag = LIVE_TAG;
                self.store(off, header);

                self.payload(off)
            }
            None => {
                let tail = self.tail();

                match self.request_space(tail, size) {
                    Some(off) => self.payload(off),
                    None => ptr::null_mut(),
                }
            }
        }
    }

    /// Releases a block previously returned by [`Heap::allocate`].
    ///
    /// Null is a silent no-op. A pointer that does not carry the live tag,
    /// including one released twice, is reported and ignored; corruption
    /// must not take the process down, only be visible.
    pub fn release(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let Some(off) = self.block_offset(ptr) else {
            trace::line(trace::BAD_RELEASE);
            return;
        };

        let mut header = self.peek(off);

        if header.tag != LIVE_TAG || header.free {
            trace::line(trace::BAD_RELEASE);
            return;
        }

        header.free = true;
        header.tag = 0;
        self.store(off, header);

        self.coalesce();

        trace::line(trace::FREEING);
    }

    /// Thin wrapper over [`Heap::allocate`] that zeroes the usable region.
    pub fn allocate_zeroed(&mut self, size: usize) -> *mut u8 {
        let ptr = self.allocate(size);

        if !ptr.is_null() {
            unsafe { ptr.write_bytes(0, align(size, ALIGNMENT)) };
        }

        ptr
    }

    /// Resizes a block by allocating, copying and releasing; the block list
    /// invariants all come from the two core operations.
    ///
    /// A null `ptr` behaves like [`Heap::allocate`], a zero `new_size` like
    /// [`Heap::release`] (returning null). A request that still fits the
    /// existing block returns `ptr` unchanged. Invalid pointers get the same
    /// report-and-ignore treatment as release, yielding null.
    pub fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.allocate(new_size);
        }

        if new_size == 0 {
            self.release(ptr);
            return ptr::null_mut();
        }

        let Some(off) = self.block_offset(ptr) else {
            trace::line(trace::BAD_RELEASE);
            return ptr::null_mut();
        };

        let header = self.peek(off);

        if header.tag != LIVE_TAG || header.free {
            trace::line(trace::BAD_RELEASE);
            return ptr::null_mut();
        }

        if let Some(aligned) = checked_align(new_size, ALIGNMENT)
            && aligned <= header.size
        {
            return ptr;
        }

        let fresh = self.allocate(new_size);

        if fresh.is_null() {
            return ptr::null_mut();
        }

        // The old block is still allocated, so the two regions are disjoint.
        unsafe { ptr::copy_nonoverlapping(ptr, fresh, header.size) };
        self.release(ptr);

        fresh
    }

    /// Iterates over every block in list order. Debugging and test aid.
    pub fn blocks(&self) -> Blocks<'_, G> {
        Blocks {
            heap: self,
            off: self.head,
        }
    }

    /// First-fit scan: the first free block with at least `size` usable
    /// bytes wins, no matter how wasteful the fit is.
    fn find_free(&self, size: usize) -> Option<usize> {
        let mut off = self.head;

        while off != NIL {
            let header = self.load(off);

            if header.free && header.size >= size {
                return Some(off);
            }

            off = header.next;
        }

        None
    }

    /// Grows the segment by one header plus `size` bytes and formats the new
    /// block, allocated and tagged, at the pre-grow boundary. Links it after
    /// `prev` unless `prev` is [`NIL`].
    fn request_space(&mut self, prev: usize, size: usize) -> Option<usize> {
        let off = self.segment.grow(BLOCK_HEADER_SIZE.checked_add(size)?)?;

        self.store(
            off,
            BlockHeader {
                size,
                next: NIL,
                free: false,
                tag: LIVE_TAG,
            },
        );

        if prev != NIL {
            let mut header = self.load(prev);
            header.next = off;
            self.store(prev, header);
        }

        Some(off)
    }

    /// Truncates the block at `off` to exactly `size` usable bytes and
    /// splices the remainder in as a new free block right after it.
    fn split(&mut self, off: usize, size: usize) {
        let mut header = self.load(off);
        let rest_off = off + BLOCK_HEADER_SIZE + size;

        self.store(
            rest_off,
            BlockHeader {
                size: header.size - size - BLOCK_HEADER_SIZE,
                next: header.next,
                free: true,
                tag: 0,
            },
        );

        header.size = size;
        header.next = rest_off;
        self.store(off, header);
    }

    /// One linear pass merging every run of free blocks. At each position
    /// the current block keeps absorbing its successor until that is no
    /// longer possible, so runs of three or more collapse in a single pass.
    fn coalesce(&mut self) {
        let mut off = self.head;

        while off != NIL {
            let mut header = self.load(off);

            while header.free && header.next != NIL {
                let next = self.load(header.next);

                // Merge only blocks that actually touch; another brk user
                // can leave holes in the segment.
                if !next.free || off + BLOCK_HEADER_SIZE + header.size != header.next {
                    break;
                }

                header.size += BLOCK_HEADER_SIZE + next.size;
                header.next = next.next;
                self.store(off, header);
            }

            off = header.next;
        }
    }

    fn tail(&self) -> usize {
        let mut off = self.head;

        loop {
            let next = self.load(off).next;

            if next == NIL {
                return off;
            }

            off = next;
        }
    }

    /// Maps a caller pointer back to its header offset, rejecting anything
    /// outside the segment or off the alignment grid. This is the bounds
    /// check that keeps foreign pointers from ever being dereferenced.
    fn block_offset(&self, ptr: *mut u8) -> Option<usize> {
        let base = self.segment.base() as usize;
        let addr = ptr as usize;

        if addr < base + BLOCK_HEADER_SIZE || addr >= base + self.segment.committed() {
            return None;
        }

        let payload_off = addr - base;

        if payload_off % ALIGNMENT != 0 {
            return None;
        }

        Some(payload_off - BLOCK_HEADER_SIZE)
    }

    /// Reads a header that has not passed the tag check yet. An in-range
    /// pointer to the middle of some allocation lands on garbage bytes here,
    /// so no sanity assertion runs; the tag heuristic does the rejecting.
    fn peek(&self, off: usize) -> BlockHeader {
        unsafe { self.header_ptr(off).read() }
    }

    fn load(&self, off: usize) -> BlockHeader {
        let header = unsafe { self.header_ptr(off).read() };

        debug_assert!(
            off + BLOCK_HEADER_SIZE + header.size <= self.segment.committed(),
            "block at offset {off} extends past the segment boundary",
        );

        header
    }

    fn store(&mut self, off: usize, header: BlockHeader) {
        unsafe { self.header_ptr(off).write(header) };
    }

    /// Offset-to-address translation. Every list hop goes through here, so a
    /// corrupt link trips this assertion instead of a wild read.
    fn header_ptr(&self, off: usize) -> *mut BlockHeader {
        let committed = self.segment.committed();

        assert!(
            off % ALIGNMENT == 0 && off + BLOCK_HEADER_SIZE <= committed,
            "block offset {off} out of bounds for a {committed} byte segment",
        );

        unsafe { self.segment.base().add(off).cast() }
    }

    fn payload(&self, off: usize) -> *mut u8 {
        unsafe { self.segment.base().add(off + BLOCK_HEADER_SIZE) }
    }
}

impl<G: GrowHeap> Iterator for Blocks<'_, G> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.off == NIL {
            return None;
        }

        let header = self.heap.load(self.off);
        let info = BlockInfo {
            offset: self.off,
            size: header.size,
            free: header.free,
        };

        self.off = header.next;

        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grow::FixedArena;

    fn heap(capacity: usize) -> Heap<FixedArena> {
        Heap::new(FixedArena::with_capacity(capacity))
    }

    #[test]
    fn zero_size_request_yields_null() {
        let mut heap = heap(256);

        assert!(heap.allocate(0).is_null());
        assert_eq!(0, heap.blocks().count());
    }

    #[test]
    fn returned_addresses_are_aligned() {
        let mut heap = heap(4096);

        for size in [1, 3, 8, 13, 64, 100] {
            let ptr = heap.allocate(size);

            assert!(!ptr.is_null());
            assert_eq!(0, ptr as usize % ALIGNMENT);
        }
    }

    #[test]
    fn live_allocations_never_overlap() {
        let mut heap = heap(4096);
        let mut ranges: Vec<(usize, usize)> = Vec::new();

        for size in [24, 40, 8, 100] {
            let start = heap.allocate(size) as usize;
            ranges.push((start, start + align(size, ALIGNMENT)));
        }

        for (i, &(a_start, a_end)) in ranges.iter().enumerate() {
            for &(b_start, b_end) in &ranges[i + 1..] {
                assert!(a_end <= b_start || b_end <= a_start);
            }
        }
    }

    #[test]
    fn released_block_is_reused() {
        let mut heap = heap(4096);

        let first = heap.allocate(128);
        heap.release(first);

        assert_eq!(first, heap.allocate(128));
    }

    #[test]
    fn first_fit_skips_too_small_blocks() {
        let mut heap = heap(16384);

        let small = heap.allocate(8);
        let large = heap.allocate(4096);
        heap.release(small);

        let second_large = heap.allocate(4096);

        assert_ne!(small, second_large);
        assert_ne!(large, second_large);
        // The small block stays free for a later fitting request.
        assert!(heap.blocks().any(|block| block.free && block.size == 8));
    }

    #[test]
    fn adjacent_blocks_coalesce_and_split_again() {
        let mut heap = heap(4096);

        let a = heap.allocate(64);
        let b = heap.allocate(64);

        assert_eq!(a as usize + 64 + BLOCK_HEADER_SIZE, b as usize);

        heap.release(a);
        heap.release(b);

        let merged: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(1, merged.len());
        assert!(merged[0].free);
        assert_eq!(128 + BLOCK_HEADER_SIZE, merged[0].size);

        // First fit reuses the merged block and splits off the leftover.
        let c = heap.allocate(100);

        assert_eq!(a, c);

        let after: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(2, after.len());
        assert!(!after[0].free);
        assert_eq!(104, after[0].size);
        assert!(after[1].free);
        assert_eq!(128 + BLOCK_HEADER_SIZE - 104 - BLOCK_HEADER_SIZE, after[1].size);
    }

    #[test]
    fn split_remainder_serves_the_next_allocation() {
        let mut heap = heap(4096);

        let p = heap.allocate(512);
        heap.release(p);

        let q = heap.allocate(128);
        assert_eq!(p, q);

        let r = heap.allocate(128);
        assert!(p as usize <= r as usize);
        assert!((r as usize) < p as usize + 512);
        assert_eq!(p as usize + 128 + BLOCK_HEADER_SIZE, r as usize);
    }

    #[test]
    fn second_release_is_rejected() {
        let mut heap = heap(4096);

        let p = heap.allocate(64);
        heap.release(p);

        let before: Vec<BlockInfo> = heap.blocks().collect();
        heap.release(p);
        let after: Vec<BlockInfo> = heap.blocks().collect();

        assert_eq!(before, after);
        // The block is still usable afterwards.
        assert_eq!(p, heap.allocate(64));
    }

    #[test]
    fn release_of_foreign_pointer_is_ignored() {
        let mut heap = heap(4096);

        let p = heap.allocate(64);
        let mut local = 0u64;

        heap.release(&mut local as *mut u64 as *mut u8);
        heap.release(ptr::null_mut());

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(1, blocks.len());
        assert!(!blocks[0].free);

        heap.release(p);
    }

    #[test]
    fn huge_request_yields_null() {
        let mut heap = heap(4096);

        assert!(heap.allocate(usize::MAX).is_null());
        assert!(heap.allocate(usize::MAX - 2).is_null());
        // Survives rounding but cannot fit a header in front of it.
        assert!(heap.allocate(usize::MAX - BLOCK_HEADER_SIZE).is_null());
        // The heap stays usable afterwards.
        assert!(!heap.allocate(32).is_null());
    }

    #[test]
    fn reallocate_huge_request_yields_null() {
        let mut heap = heap(4096);

        let p = heap.allocate(16);

        assert!(heap.reallocate(p, usize::MAX - 2).is_null());
        // The original block is untouched and still live.
        assert!(heap.blocks().all(|block| !block.free));

        heap.release(p);
    }

    #[test]
    fn release_of_interior_pointer_is_ignored() {
        let mut heap = heap(4096);

        let p = heap.allocate(64);
        unsafe { p.write_bytes(0xff, 64) };

        // Aligned and inside the segment, but pointing into the payload, so
        // the bytes it would read as a header are garbage.
        let interior = unsafe { p.add(32) };
        heap.release(interior);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();
        assert_eq!(1, blocks.len());
        assert!(!blocks[0].free);

        heap.release(p);
        assert!(heap.blocks().all(|block| block.free));
    }

    #[test]
    fn allocation_fails_when_segment_exhausted() {
        let mut heap = heap(128);

        assert!(heap.allocate(1024).is_null());
        // The failed grow left the heap usable.
        assert!(!heap.allocate(32).is_null());
    }

    #[test]
    fn no_adjacent_free_blocks_after_release() {
        let mut heap = heap(8192);

        let a = heap.allocate(32);
        let b = heap.allocate(48);
        let c = heap.allocate(64);
        let d = heap.allocate(80);

        heap.release(b);
        heap.release(c);
        heap.release(a);

        let blocks: Vec<BlockInfo> = heap.blocks().collect();

        for pair in blocks.windows(2) {
            assert!(!(pair[0].free && pair[1].free));
            // Blocks tile the segment: each one ends where the next begins.
            assert_eq!(
                pair[0].offset + BLOCK_HEADER_SIZE + pair[0].size,
                pair[1].offset,
            );
        }

        heap.release(d);
        assert_eq!(1, heap.blocks().count());
    }

    #[test]
    fn allocate_zeroed_scrubs_recycled_memory() {
        let mut heap = heap(4096);

        let p = heap.allocate(32);
        unsafe { p.write_bytes(0xff, 32) };
        heap.release(p);

        let q = heap.allocate_zeroed(32);
        assert_eq!(p, q);

        let bytes = unsafe { std::slice::from_raw_parts(q, 32) };
        assert!(bytes.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn reallocate_preserves_contents() {
        let mut heap = heap(4096);

        let p = heap.allocate(16);
        for i in 0..16u8 {
            unsafe { p.add(i as usize).write(i) };
        }

        let q = heap.reallocate(p, 64);

        assert_ne!(p, q);
        let bytes = unsafe { std::slice::from_raw_parts(q, 16) };
        assert_eq!((0..16u8).collect::<Vec<u8>>(), bytes);
        // The old block went back to the free list.
        assert!(heap.blocks().next().is_some_and(|block| block.free));
    }

    #[test]
    fn reallocate_in_place_when_it_still_fits() {
        let mut heap = heap(4096);

        let p = heap.allocate(64);

        assert_eq!(p, heap.reallocate(p, 32));
        assert_eq!(p, heap.reallocate(p, 64));
    }

    #[test]
    fn reallocate_edge_cases() {
        let mut heap = heap(4096);

        // Null pointer behaves like a plain allocation.
        let p = heap.reallocate(ptr::null_mut(), 64);
        assert!(!p.is_null());

        // Zero size behaves like a release.
        assert!(heap.reallocate(p, 0).is_null());
        assert!(heap.blocks().all(|block| block.free));
    }
}
