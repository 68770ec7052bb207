//! The two binary-compatible exports over the process-wide heap.
//!
//! The heap singleton is created lazily by the first `allocate` call and is
//! never torn down; the OS reclaims the whole segment at process exit. There
//! is no locking anywhere in this crate, so these symbols must only ever be
//! called from one thread. Concurrent callers are undefined behaviour by
//! contract, not a bug to be fixed here.

use std::cell::UnsafeCell;
use std::ptr;

use crate::grow::OsHeap;
use crate::heap::Heap;
use crate::trace;

struct ProcessHeap(UnsafeCell<Option<Heap<OsHeap>>>);

// Single-threaded by contract; see the module docs.
unsafe impl Sync for ProcessHeap {}

static PROCESS_HEAP: ProcessHeap = ProcessHeap(UnsafeCell::new(None));

/// Allocates `size` bytes from the process-wide heap.
///
/// Returns null for a zero `size` and when the OS refuses to extend the
/// heap segment.
///
/// # Safety
///
/// Must not be called concurrently with itself or with [`release`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn allocate(size: usize) -> *mut u8 {
    let heap = unsafe { &mut *PROCESS_HEAP.0.get() };

    heap.get_or_insert_with(|| Heap::new(OsHeap::new()))
        .allocate(size)
}

/// Releases a pointer previously returned by [`allocate`]. Null is a silent
/// no-op; anything else the heap does not recognize is reported and ignored.
///
/// # Safety
///
/// Must not be called concurrently with itself or with [`allocate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn release(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    match unsafe { &mut *PROCESS_HEAP.0.get() } {
        Some(heap) => heap.release(ptr),
        // Nothing was ever allocated, so no pointer can be ours.
        None => trace::line(trace::BAD_RELEASE),
    }
}

// Keep the wrappers available over the C ABI as well; both are thin layers
// over the two core operations above.

/// Allocates `size` zeroed bytes from the process-wide heap.
///
/// # Safety
///
/// Same single-thread contract as [`allocate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn allocate_zeroed(size: usize) -> *mut u8 {
    let heap = unsafe { &mut *PROCESS_HEAP.0.get() };

    heap.get_or_insert_with(|| Heap::new(OsHeap::new()))
        .allocate_zeroed(size)
}

/// Resizes an allocation from the process-wide heap, copying its contents
/// into the new region when it has to move.
///
/// # Safety
///
/// Same single-thread contract as [`allocate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn reallocate(ptr: *mut u8, new_size: usize) -> *mut u8 {
    let heap = unsafe { &mut *PROCESS_HEAP.0.get() };

    match heap {
        Some(heap) => heap.reallocate(ptr, new_size),
        None if ptr.is_null() => heap
            .get_or_insert_with(|| Heap::new(OsHeap::new()))
            .reallocate(ptr, new_size),
        None => {
            trace::line(trace::BAD_RELEASE);
            ptr::null_mut()
        }
    }
}
