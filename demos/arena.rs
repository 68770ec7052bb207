//! Walkthrough of the allocator over a self-contained arena segment, safe to
//! run alongside the normal program heap.

use voidstar::{FixedArena, Heap};

fn main() {
    let mut heap = Heap::new(FixedArena::with_capacity(4096));

    let a = heap.allocate(64);
    let b = heap.allocate(64);
    println!("a = {a:?}");
    println!("b = {b:?}");

    heap.release(a);
    heap.release(b);

    // Both blocks merged, so a request bigger than either fits at `a`.
    let c = heap.allocate(100);
    println!("c = {c:?} (reused: {})", c == a);

    for block in heap.blocks() {
        println!(
            "block at {:>4}: {:>4} bytes, {}",
            block.offset,
            block.size,
            if block.free { "free" } else { "allocated" },
        );
    }
}
