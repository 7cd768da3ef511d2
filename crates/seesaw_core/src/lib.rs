//! `seesaw_core` — a moving, copying garbage collector with object
//! pinning and finalizers.
//!
//! The heap is a fixed-size pair of semispaces collected with a variant of
//! Cheney's algorithm: allocation bumps a cursor through the from-space,
//! and a collection copies everything reachable from the rooted handles
//! into the to-space, finalizes what was left behind, and swaps the two
//! halves. Individual objects can be *pinned*, which exempts them from
//! relocation while the rest of the heap keeps compacting around them.
//!
//! # Crate layout
//!
//! - [`error`] — Error types and the `HeapResult` alias.
//! - [`gc`] — The collector: heap, headers, descriptors, handles, tracing.
//!
//! # Example
//!
//! ```
//! use seesaw_core::gc::handle::GcRef;
//! use seesaw_core::gc::heap::Heap;
//! use seesaw_core::gc::trace::{Trace, Tracer};
//!
//! struct Node {
//!     next: GcRef<Node>,
//! }
//! impl Trace for Node {
//!     fn trace(&self, tracer: &mut Tracer<'_>) {
//!         self.next.trace(tracer);
//!     }
//! }
//!
//! let heap = Heap::new();
//! let a = heap.allocate(Node { next: GcRef::null() }).unwrap();
//! let b = heap.allocate(Node { next: GcRef::null() }).unwrap();
//! a.pin().next.store(&b);
//!
//! heap.collect();
//! assert_eq!(a.pin().next.as_ptr(), b.as_ptr());
//! ```

/// Error types and the [`HeapResult`][error::HeapResult] alias.
pub mod error;
/// Garbage collector: heap, headers, descriptors, handles, and tracing.
pub mod gc;
