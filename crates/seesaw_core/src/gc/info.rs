//! Per-type descriptors driving evacuation, visiting, and finalization.
//!
//! Every managed type gets one statically-allocated [`GcInfo`] record,
//! obtained through [`GcInfo::of`]. The record carries the type's heap
//! footprint and the monomorphized thunks the collector dispatches through
//! while working over type-erased headers.

use std::cell::Cell;
use std::mem::{needs_drop, size_of};
use std::ptr;

use crate::gc::header::{GcBox, GcHeader};
use crate::gc::heap::Heap;
use crate::gc::trace::{Trace, Tracer};

/// Statically-allocated descriptor for one managed type.
pub struct GcInfo {
    /// Total byte size of an allocation of this type, header included.
    /// Invariant: a multiple of [`HEAP_ALIGN`][crate::gc::header::HEAP_ALIGN]
    /// and at least one header.
    pub(crate) size: usize,
    /// Evacuates the object a root slot points at (or recognizes it as
    /// already forwarded or pinned) and rewrites the slot.
    pub(crate) evacuate: unsafe fn(slot: &Cell<*mut GcHeader>, heap: &Heap),
    /// Invokes the collector's reference processing on every managed
    /// reference inside the object's payload.
    pub(crate) visit: unsafe fn(header: *mut GcHeader, heap: &Heap),
    /// Runs payload cleanup for an object the collection did not retain.
    /// Absent for types with nothing to clean up.
    pub(crate) finalize: Option<unsafe fn(header: *mut GcHeader)>,
}

impl GcInfo {
    /// The descriptor singleton for `T`.
    pub(crate) fn of<T: Trace>() -> &'static GcInfo {
        trait HasInfo {
            const INFO: GcInfo;
        }
        impl<T: Trace> HasInfo for T {
            const INFO: GcInfo = GcInfo {
                size: size_of::<GcBox<T>>(),
                evacuate: evacuate_root,
                visit: visit_payload::<T>,
                finalize: if needs_drop::<T>() {
                    Some(finalize_payload::<T>)
                } else {
                    None
                },
            };
        }
        &<T as HasInfo>::INFO
    }
}

/// Evacuation thunk for a registered root slot.
///
/// # Safety
/// `slot` must hold a non-null pointer to the header of a live managed
/// object, and a collection cycle must be in progress (the to-space is the
/// active evacuation target).
unsafe fn evacuate_root(slot: &Cell<*mut GcHeader>, heap: &Heap) {
    let header = slot.get();
    debug_assert!(!header.is_null(), "registered roots are never null");
    // SAFETY: caller guarantees `header` addresses a live object.
    slot.set(unsafe { heap.evacuate_or_forward(header) });
}

/// Visiting thunk: drives `T::trace` over the payload behind `header`.
///
/// # Safety
/// `header` must address a live `GcBox<T>` allocated for exactly this `T`.
unsafe fn visit_payload<T: Trace>(header: *mut GcHeader, heap: &Heap) {
    let obj = header as *mut GcBox<T>;
    let mut tracer = Tracer::new(heap);
    // SAFETY: caller guarantees the payload is a live, initialized T.
    unsafe { (*obj).value.trace(&mut tracer) };
}

/// Finalization thunk: runs the payload's destructor in place.
///
/// # Safety
/// `header` must address a `GcBox<T>` whose payload is initialized and has
/// not been finalized before. The header itself is left untouched.
unsafe fn finalize_payload<T: Trace>(header: *mut GcHeader) {
    let obj = header as *mut GcBox<T>;
    // SAFETY: caller guarantees a live, never-finalized payload.
    unsafe { ptr::drop_in_place(&raw mut (*obj).value) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::header::HEAP_ALIGN;

    struct Leaf {
        _x: u32,
    }
    impl Trace for Leaf {}

    struct WithCleanup {
        _s: String,
    }
    impl Trace for WithCleanup {}

    #[test]
    fn test_size_covers_header_and_payload() {
        let info = GcInfo::of::<Leaf>();
        assert_eq!(info.size, size_of::<GcBox<Leaf>>());
        assert_eq!(info.size % HEAP_ALIGN, 0);
    }

    #[test]
    fn test_finalizer_present_only_when_payload_needs_drop() {
        assert!(GcInfo::of::<Leaf>().finalize.is_none());
        assert!(GcInfo::of::<WithCleanup>().finalize.is_some());
    }
}
