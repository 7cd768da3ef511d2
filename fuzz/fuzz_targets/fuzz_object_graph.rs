#![no_main]

use std::cell::Cell;
use std::rc::Rc;

use libfuzzer_sys::fuzz_target;
use seesaw_core::gc::handle::{GcRef, Handle};
use seesaw_core::gc::heap::Heap;
use seesaw_core::gc::trace::{Trace, Tracer};

struct Node {
    drops: Rc<Cell<usize>>,
    left: GcRef<Node>,
    right: GcRef<Node>,
}

impl Trace for Node {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.left.trace(tracer);
        self.right.trace(tracer);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

// Build a random object graph (cycles included), drop a random subset of
// the handles, collect, and check reclamation against a shadow adjacency
// list: the finalizer count must equal the number of nodes unreachable
// from the retained roots, computed independently by a graph walk.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let node_count = (data[0] as usize % 24) + 2;

    let drops = Rc::new(Cell::new(0));
    let heap = Heap::with_capacity(8192);

    let mut handles: Vec<Handle<'_, Node>> = Vec::new();
    for _ in 0..node_count {
        let node = Node {
            drops: Rc::clone(&drops),
            left: GcRef::null(),
            right: GcRef::null(),
        };
        handles.push(heap.allocate(node).expect("graph fits in the heap"));
    }

    // Shadow adjacency: edges[i] = (left, right) indices.
    let mut edges: Vec<(Option<usize>, Option<usize>)> = vec![(None, None); node_count];
    let mut bytes = data[1..].iter().copied();
    for index in 0..node_count {
        let Some(byte) = bytes.next() else { break };
        let left = byte as usize % node_count;
        edges[index].0 = Some(left);
        handles[index].pin().left.store(&handles[left]);
        if let Some(byte) = bytes.next() {
            let right = byte as usize % node_count;
            edges[index].1 = Some(right);
            handles[index].pin().right.store(&handles[right]);
        }
    }

    // Retain a subset of the handles; the rest become garbage unless some
    // retained node reaches them.
    let keep_mask = data[1] as usize | 0x1;
    let mut retained: Vec<usize> = Vec::new();
    let mut kept_handles: Vec<Handle<'_, Node>> = Vec::new();
    for (index, handle) in handles.into_iter().enumerate() {
        if (keep_mask >> (index % 8)) & 1 == 1 {
            retained.push(index);
            kept_handles.push(handle);
        }
    }

    // Shadow reachability walk from the retained roots.
    let mut reachable = vec![false; node_count];
    let mut work: Vec<usize> = retained.clone();
    while let Some(index) = work.pop() {
        if reachable[index] {
            continue;
        }
        reachable[index] = true;
        if let Some(left) = edges[index].0 {
            work.push(left);
        }
        if let Some(right) = edges[index].1 {
            work.push(right);
        }
    }
    let expected_dead = reachable.iter().filter(|&&r| !r).count();

    heap.collect();

    assert_eq!(
        drops.get(),
        expected_dead,
        "finalizer count must match shadow reachability"
    );

    // Every retained node's edges must still resolve inside the heap.
    for handle in &kept_handles {
        let pinned = handle.pin();
        if !pinned.left.is_null() {
            assert!(heap.is_in_heap(pinned.left.as_ptr().cast()));
        }
        if !pinned.right.is_null() {
            assert!(heap.is_in_heap(pinned.right.as_ptr().cast()));
        }
    }

    drop(kept_handles);
    heap.collect();
    assert_eq!(drops.get(), node_count, "all nodes reclaimed in the end");
});
