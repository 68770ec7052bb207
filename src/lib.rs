//! A drop-in replacement for the dynamic allocation pair of a
//! single-threaded native process.
//!
//! One contiguous heap segment is grown on demand from the operating system
//! and carved into blocks, each prefixed with a small header:
//!
//! ```text
//! +--------------------------------+
//! | Header | Actual memory block   |
//! +--------------------------------+
//! ```
//!
//! The returned pointer is at the start of the memory block. Released blocks
//! are kept on the same singly linked list and reused first-fit before the
//! segment grows again; oversized matches are split and adjacent free blocks
//! are merged back together on every release.
//!
//! The core lives in [`Heap`], which owns its segment and can therefore be
//! instantiated many times over independent [`FixedArena`] segments, the way
//! the tests do. The process-wide instance over [`OsHeap`] is only reachable
//! through the two exported C symbols, [`allocate`] and [`release`].
//!
//! Not covered on purpose: thread safety (single-threaded by contract,
//! nothing here locks), returning memory to the OS, and any defense against
//! deliberate corruption beyond the block tag heuristic.

mod block;
mod ffi;
mod grow;
mod heap;
mod trace;
mod utils;

pub use ffi::{allocate, allocate_zeroed, reallocate, release};
pub use grow::{FixedArena, GrowHeap, OsHeap};
pub use heap::{BlockInfo, Blocks, Heap};
