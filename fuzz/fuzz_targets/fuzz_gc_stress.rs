#![no_main]

use libfuzzer_sys::fuzz_target;
use seesaw_core::gc::handle::{GcRef, Handle};
use seesaw_core::gc::heap::Heap;
use seesaw_core::gc::trace::{Trace, Tracer};

struct Node {
    next: GcRef<Node>,
}

impl Trace for Node {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.next.trace(tracer);
    }
}

fn node() -> Node {
    Node {
        next: GcRef::null(),
    }
}

// Stress the collector with a byte-decoded op stream: interleave rooted
// allocations, handle drops, edge edits, and forced collections, checking
// heap invariants after every operation.
//
// Each input byte encodes one operation in its low bits:
//   0 – allocate a node and keep its handle
//   1 – drop one retained handle (selected by the high bits)
//   2 – force a collection
//   3 – link one retained node to another (selected by the high bits)
//   4 – clear one retained node's link
//   5 – clone a retained handle
//
// The retained-handle list is capped so the root set can never overflow.
fuzz_target!(|data: &[u8]| {
    const MAX_HANDLES: usize = 48;
    const MAX_OPS: usize = 512;

    let heap = Heap::with_capacity(4096);
    let mut handles: Vec<Handle<'_, Node>> = Vec::new();

    for &byte in data.iter().take(MAX_OPS) {
        let op = byte & 0x7;
        let pick = (byte >> 3) as usize;

        match op {
            0 => {
                if handles.len() < MAX_HANDLES {
                    // OOM is acceptable: the live set can exceed a semispace.
                    if let Ok(handle) = heap.allocate(node()) {
                        handles.push(handle);
                    }
                }
            }
            1 => {
                if !handles.is_empty() {
                    handles.swap_remove(pick % handles.len());
                }
            }
            2 => {
                heap.collect();
            }
            3 => {
                if handles.len() >= 2 {
                    let from = &handles[pick % handles.len()];
                    let to = &handles[(pick / 2) % handles.len()];
                    from.pin().next.store(to);
                }
            }
            4 => {
                if !handles.is_empty() {
                    handles[pick % handles.len()].pin().next.clear();
                }
            }
            _ => {
                if !handles.is_empty() && handles.len() < MAX_HANDLES {
                    let clone = handles[pick % handles.len()].clone();
                    handles.push(clone);
                }
            }
        }

        // Invariants that must hold after every operation.
        assert!(heap.used() <= heap.semispace_size(), "used exceeds semispace");
        assert_eq!(heap.root_count(), handles.len(), "root accounting drifted");
        for handle in &handles {
            let ptr = handle.as_ptr();
            assert!(!ptr.is_null(), "rooted handle lost its referent");
            assert!(
                heap.is_in_heap(ptr.cast()),
                "rooted referent escaped the heap region"
            );
        }
    }

    // Final cycle: every retained handle must still resolve afterwards.
    heap.collect();
    for handle in &handles {
        assert!(heap.is_in_heap(handle.as_ptr().cast()));
    }
    drop(handles);
    heap.collect();
    assert_eq!(heap.used(), 0, "empty root set must collect to an empty heap");
});
