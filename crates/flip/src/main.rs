//! `flip` — demonstration shell for the seesaw collector.
//!
//! Walks the collector through its characteristic states: reclamation of
//! an unreferenced temporary and an unreachable cycle, an object pinned
//! across collections, skip-record threading around the pinned island,
//! and compaction after the unpin.

use seesaw_core::gc::handle::GcRef;
use seesaw_core::gc::heap::Heap;
use seesaw_core::gc::trace::{Trace, Tracer};

struct Probe {
    name: &'static str,
    link: GcRef<Probe>,
}

impl Probe {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            link: GcRef::null(),
        }
    }
}

impl Trace for Probe {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        self.link.trace(tracer);
    }
}

impl Drop for Probe {
    fn drop(&mut self) {
        println!("finalized: {}", self.name);
    }
}

fn main() {
    let heap = Heap::new();

    // A two-node graph kept alive through one rooted handle.
    let root = heap.allocate(Probe::new("root")).expect("heap has room");
    {
        let child = heap.allocate(Probe::new("child")).expect("heap has room");
        root.pin().link.store(&child);
    }

    // A temporary with no retained handle.
    drop(heap.allocate(Probe::new("temp")).expect("heap has room"));

    // An unreachable two-node cycle.
    {
        let c1 = heap.allocate(Probe::new("cycle-1")).expect("heap has room");
        let c2 = heap.allocate(Probe::new("cycle-2")).expect("heap has room");
        c1.pin().link.store(&c2);
        c2.pin().link.store(&c1);
    }

    println!("used before collect: {} bytes", heap.used());
    heap.collect();
    println!("used after collect:  {} bytes", heap.used());

    // Pin an object and hold its raw payload pointer across a collection.
    let pinned = heap.allocate(Probe::new("pinned")).expect("heap has room");
    let raw = pinned.unscoped_pin();

    heap.collect();

    // The pinned object kept its address; the surviving address now lies
    // in the to-space half until the next collection threads around it.
    assert_eq!(pinned.as_ptr(), raw);
    assert!(pinned.is_pinned());
    assert!(!heap.is_in_from_space(raw.cast()));

    let foo = heap.allocate(Probe::new("foo")).expect("heap has room");

    heap.collect();

    // Survivors are now compacted around the pinned island, which has
    // rejoined the from-space at its original address.
    assert_eq!(pinned.as_ptr(), raw);
    assert!(heap.is_in_from_space(raw.cast()));
    assert!(heap.is_in_from_space(foo.as_ptr().cast()));
    println!("used with pinned island: {} bytes", heap.used());

    pinned.unscoped_unpin();
    heap.collect();

    // Unpinned, the object compacts to a fresh address.
    assert_ne!(pinned.as_ptr(), raw);
    println!("used after unpin:    {} bytes", heap.used());

    println!("end of demonstration");
}
