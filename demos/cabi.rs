//! Exercises the exported C symbols over the process-wide heap.
//!
//! The process-wide heap grows the real program break, so keep runs of this
//! short; it coexists with the system allocator but does not replace it.

use voidstar::{allocate, release};

fn main() {
    unsafe {
        let p = allocate(128) as *mut u64;
        *p = 42;
        println!("p = {p:?}, *p = {}", *p);

        release(p as *mut u8);

        // Same size right after the release lands on the same block.
        let q = allocate(128) as *mut u64;
        println!("q = {q:?} (reused: {})", q == p);

        release(q as *mut u8);

        // Not ours: reported and ignored, never fatal.
        let mut local = 0u8;
        release(&mut local);
    }
}
