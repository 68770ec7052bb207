use std::ptr::{self, NonNull};

use crate::utils::{ALIGNMENT, align};

/// A contiguous heap segment that can only grow forward.
///
/// This trait provides an abstraction to handle the low level memory
/// requests. The allocator, our top level view of this, has nothing to do
/// with the concrete APIs offered by each kernel; all it needs is one
/// boundary it can push forward.
///
/// ```text
///  base                        boundary
///   |                             |
///   v                             v
///   +-----------------------------+ - - - - - - - +
///   |       committed bytes       |  grow(extra)  |
///   +-----------------------------+ - - - - - - - +
/// ```
///
/// # Safety
///
/// Implementors must guarantee that `base` never moves once `committed` is
/// non zero, that `[base, base + committed)` stays readable and writable for
/// the lifetime of the value, and that a successful `grow` extends that
/// range contiguously. The heap writes block headers straight into this
/// memory based on those promises.
pub unsafe trait GrowHeap {
    /// Start address of the segment. Only meaningful once `committed() > 0`.
    fn base(&self) -> *mut u8;

    /// Bytes currently usable behind `base`.
    fn committed(&self) -> usize;

    /// Moves the heap boundary forward by `extra` bytes in one step.
    ///
    /// Returns the offset of the pre-move boundary, which is where the new
    /// space begins, or `None` when the underlying resource is exhausted.
    /// Never retried by the caller.
    fn grow(&mut self, extra: usize) -> Option<usize>;
}

/// Heap segment grown directly from the operating system.
///
/// On Unix this moves the program break with `sbrk`, on Windows it reserves
/// one large region up front and commits it forward, which gives the same
/// contiguous-segment behaviour.
pub struct OsHeap {
    base: *mut u8,
    committed: usize,
}

impl OsHeap {
    pub const fn new() -> Self {
        Self {
            base: ptr::null_mut(),
            committed: 0,
        }
    }
}

impl Default for OsHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GrowHeap for OsHeap {
    fn base(&self) -> *mut u8 {
        self.base
    }

    fn committed(&self) -> usize {
        self.committed
    }

    fn grow(&mut self, extra: usize) -> Option<usize> {
        self.extend(extra)
    }
}

#[cfg(unix)]
mod unix {
    use libc::{c_void, intptr_t, sbrk};

    use super::OsHeap;

    impl OsHeap {
        pub(super) fn extend(&mut self, extra: usize) -> Option<usize> {
            unsafe {
                let prev = sbrk(extra as intptr_t);

                if prev == usize::MAX as *mut c_void {
                    return None;
                }

                let prev = prev.cast::<u8>();

                if self.base.is_null() {
                    self.base = prev;
                }

                // Someone else may have moved the break since our last call,
                // so resync against the boundary the kernel actually gave us.
                let offset = prev as usize - self.base as usize;
                self.committed = offset + extra;

                Some(offset)
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::os::raw::c_void;

    use windows::Win32::System::Memory;

    use super::OsHeap;

    /// Address space reserved up front. Commit never goes past this, which
    /// is what keeps the segment contiguous without an sbrk equivalent.
    const RESERVE_LIMIT: usize = 1 << 30;

    impl OsHeap {
        pub(super) fn extend(&mut self, extra: usize) -> Option<usize> {
            unsafe {
                if self.base.is_null() {
                    let region = Memory::VirtualAlloc(
                        None,
                        RESERVE_LIMIT,
                        Memory::MEM_RESERVE,
                        Memory::PAGE_NOACCESS,
                    );

                    if region.is_null() {
                        return None;
                    }

                    self.base = region.cast();
                }

                if extra > RESERVE_LIMIT - self.committed {
                    return None;
                }

                let next = self.base.add(self.committed);
                let committed = Memory::VirtualAlloc(
                    Some(next as *const c_void),
                    extra,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                if committed.is_null() {
                    return None;
                }

                let offset = self.committed;
                self.committed += extra;

                Some(offset)
            }
        }
    }
}

/// Heap segment backed by one caller-owned buffer with a hard capacity.
///
/// Growing past the capacity fails the same way the OS failing to move the
/// break does, which makes the out-of-memory path deterministic. Because it
/// never touches the program break, any number of independent [`FixedArena`]
/// heaps can coexist in one process; the tests are all written against it.
pub struct FixedArena {
    base: NonNull<u8>,
    capacity: usize,
    committed: usize,
}

impl FixedArena {
    /// Creates an arena able to hold `capacity` bytes, rounded up to the
    /// alignment. The backing buffer is allocated once, here, through the
    /// system allocator; the arena itself never reallocates it.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = align(capacity, ALIGNMENT);
        // A u64 buffer so the base comes out 8-aligned.
        let words = Box::into_raw(vec![0u64; capacity / ALIGNMENT].into_boxed_slice());

        Self {
            // Box pointers are never null.
            base: unsafe { NonNull::new_unchecked(words.cast::<u8>()) },
            capacity,
            committed: 0,
        }
    }
}

unsafe impl GrowHeap for FixedArena {
    fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    fn committed(&self) -> usize {
        self.committed
    }

    fn grow(&mut self, extra: usize) -> Option<usize> {
        if extra > self.capacity - self.committed {
            return None;
        }

        let offset = self.committed;
        self.committed += extra;

        Some(offset)
    }
}

impl Drop for FixedArena {
    fn drop(&mut self) {
        let words = ptr::slice_from_raw_parts_mut(
            self.base.as_ptr().cast::<u64>(),
            self.capacity / ALIGNMENT,
        );

        unsafe { drop(Box::from_raw(words)) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_arena_hands_out_consecutive_offsets() {
        let mut arena = FixedArena::with_capacity(128);

        assert_eq!(Some(0), arena.grow(32));
        assert_eq!(Some(32), arena.grow(64));
        assert_eq!(96, arena.committed());
    }

    #[test]
    fn fixed_arena_refuses_past_capacity() {
        let mut arena = FixedArena::with_capacity(64);

        assert_eq!(Some(0), arena.grow(48));
        assert_eq!(None, arena.grow(32));
        // A failed grow commits nothing.
        assert_eq!(48, arena.committed());
        assert_eq!(Some(48), arena.grow(16));
    }

    #[test]
    fn fixed_arena_base_is_aligned() {
        let arena = FixedArena::with_capacity(64);

        assert_eq!(0, arena.base() as usize % ALIGNMENT);
    }
}
