//! Rooted handles, in-object references, pin guards, and the root set.
//!
//! Two reference types split the roles the collector has to tell apart:
//!
//! - [`Handle`] lives *outside* the heap (stack or ordinary owned memory).
//!   It occupies a slot in the heap's [`RootSet`] for its whole lifetime,
//!   which makes its referent a liveness root and gives the collector a
//!   stable place to rewrite the payload pointer after relocation.
//! - [`GcRef`] lives *inside* a managed payload. It is never registered;
//!   the collector finds it when the containing object's
//!   [`Trace`][crate::gc::trace::Trace] implementation reports it.
//!
//! A handle's payload pointer may be rewritten by any collection, so raw
//! pointers derived from one are only valid while the referent is pinned
//! (see [`Pinned`]) or while no allocation can intervene.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::{self, NonNull};

use smallvec::SmallVec;

use crate::gc::header::{GcBox, GcHeader};
use crate::gc::heap::Heap;
use crate::gc::info::GcInfo;
use crate::gc::trace::{Trace, Tracer};

/// Maximum number of simultaneously live rooted handles.
pub const MAX_ROOTS: usize = 1024;

/// How a managed reference keeps its referent alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    /// While the reference is live, the referent is retained and may be
    /// relocated; the reference is rewritten to follow it.
    Strong,
    /// Reserved. The collector implements no weak semantics; every
    /// reference is treated as strong.
    Weak,
}

/// One live root: the rewritable payload slot and the referent's
/// descriptor.
pub(crate) struct RootSlot {
    pub(crate) value: Cell<*mut GcHeader>,
    pub(crate) info: &'static GcInfo,
}

/// Registry of the heap's rooted handles.
///
/// Slot indices stay stable for the lifetime of the handle that owns them;
/// freed indices are recycled through a free list, so registration and
/// deregistration are both O(1). The live count is bounded by
/// [`MAX_ROOTS`]; exceeding it is a programming error.
pub(crate) struct RootSet {
    slots: RefCell<Vec<Option<RootSlot>>>,
    free: RefCell<Vec<usize>>,
    live: Cell<usize>,
}

/// Collection-time view of the live roots: a raw pointer to each slot's
/// rewritable cell plus the descriptor to drive evacuation with. Inline
/// capacity keeps small root sets allocation-free in the middle of a
/// collection.
pub(crate) type RootSnapshot = SmallVec<[(*const Cell<*mut GcHeader>, &'static GcInfo); 16]>;

impl RootSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            free: RefCell::new(Vec::new()),
            live: Cell::new(0),
        }
    }

    /// Register a root and return its slot index.
    ///
    /// # Panics
    /// Panics when [`MAX_ROOTS`] handles are already live.
    pub(crate) fn register(&self, value: *mut GcHeader, info: &'static GcInfo) -> usize {
        assert!(
            self.live.get() < MAX_ROOTS,
            "root set overflow: more than {MAX_ROOTS} live handles"
        );
        let slot = RootSlot {
            value: Cell::new(value),
            info,
        };
        let mut slots = self.slots.borrow_mut();
        let index = match self.free.borrow_mut().pop() {
            Some(index) => {
                debug_assert!(slots[index].is_none());
                slots[index] = Some(slot);
                index
            }
            None => {
                slots.push(Some(slot));
                slots.len() - 1
            }
        };
        self.live.set(self.live.get() + 1);
        index
    }

    /// Release the slot at `index`, making it available for reuse.
    pub(crate) fn unregister(&self, index: usize) {
        let prev = self.slots.borrow_mut()[index].take();
        debug_assert!(prev.is_some(), "root slot released twice");
        self.free.borrow_mut().push(index);
        self.live.set(self.live.get() - 1);
    }

    /// Current payload pointer of the root at `index`.
    pub(crate) fn value(&self, index: usize) -> *mut GcHeader {
        self.slots.borrow()[index]
            .as_ref()
            .expect("live handle owns its slot")
            .value
            .get()
    }

    /// Descriptor of the root at `index`.
    pub(crate) fn info(&self, index: usize) -> &'static GcInfo {
        self.slots.borrow()[index]
            .as_ref()
            .expect("live handle owns its slot")
            .info
    }

    /// Number of live roots.
    pub(crate) fn len(&self) -> usize {
        self.live.get()
    }

    /// Capture the live roots for a collection cycle.
    ///
    /// The returned raw slot pointers stay valid for the whole cycle
    /// because nothing registers or unregisters roots while the collector
    /// runs: no mutator code executes, and finalizers have no heap access.
    pub(crate) fn snapshot(&self) -> RootSnapshot {
        self.slots
            .borrow()
            .iter()
            .flatten()
            .map(|slot| (&slot.value as *const _, slot.info))
            .collect()
    }
}

/// A rooted reference to a managed `T`.
///
/// Created by [`Heap::allocate`] or by re-rooting through [`GcRef::load`].
/// Registers a [`RootSet`] slot on creation and releases it on drop;
/// cloning registers a fresh slot, so every handle owns exactly one. A
/// handle is never null.
///
/// The `'heap` lifetime ties the handle to its heap, so a handle cannot
/// outlive the heap that owns its referent.
pub struct Handle<'heap, T: Trace> {
    heap: &'heap Heap,
    index: usize,
    _ty: PhantomData<*mut T>,
}

impl<'heap, T: Trace> Handle<'heap, T> {
    /// Register a new root for the object at `header`.
    pub(crate) fn root(heap: &'heap Heap, header: *mut GcHeader) -> Self {
        debug_assert!(!header.is_null());
        let index = heap.roots().register(header, GcInfo::of::<T>());
        Self {
            heap,
            index,
            _ty: PhantomData,
        }
    }

    /// The heap this handle is rooted in.
    pub fn heap(&self) -> &'heap Heap {
        self.heap
    }

    /// Current address of the referent's box.
    pub(crate) fn gc_box(&self) -> *mut GcBox<T> {
        self.heap.roots().value(self.index) as *mut GcBox<T>
    }

    /// Raw pointer to the payload at its current address.
    ///
    /// The pointer is transient: any allocation may trigger a collection
    /// that moves the referent. Pin the referent to keep it stable.
    pub fn as_ptr(&self) -> *mut T {
        let obj = self.gc_box();
        // SAFETY: a rooted handle always addresses a live object.
        unsafe { &raw mut (*obj).value }
    }

    /// Pin the referent for the lifetime of the returned guard.
    ///
    /// While the guard is alive the collector will not move the referent,
    /// so the guard can hand out a direct `&T`.
    ///
    /// # Panics
    /// Panics if the referent is already pinned.
    pub fn pin(&self) -> Pinned<'_, T> {
        let obj = self.gc_box();
        // SAFETY: the handle's referent is live.
        unsafe { self.heap.pin(obj as *mut GcHeader) };
        Pinned {
            obj: NonNull::new(obj).expect("rooted handle is never null"),
            heap: self.heap,
        }
    }

    /// Pin the referent without a scope guard and return the raw payload
    /// pointer, which stays valid across collections until
    /// [`unscoped_unpin`][Self::unscoped_unpin] is called.
    ///
    /// # Panics
    /// Panics if the referent is already pinned.
    pub fn unscoped_pin(&self) -> *mut T {
        let obj = self.gc_box();
        // SAFETY: the handle's referent is live.
        unsafe { self.heap.pin(obj as *mut GcHeader) };
        // SAFETY: `obj` is non-null and addresses a live GcBox<T>.
        unsafe { &raw mut (*obj).value }
    }

    /// Release a pin taken with [`unscoped_pin`][Self::unscoped_pin].
    ///
    /// # Panics
    /// Panics if the referent is not pinned.
    pub fn unscoped_unpin(&self) {
        // SAFETY: the handle's referent is live.
        unsafe { self.heap.unpin(self.gc_box() as *mut GcHeader) };
    }

    /// Returns `true` while the referent is pinned.
    pub fn is_pinned(&self) -> bool {
        let header = self.gc_box() as *mut GcHeader;
        // SAFETY: the handle's referent is live.
        unsafe { (*header).forwardee == header }
    }
}

impl<T: Trace> Clone for Handle<'_, T> {
    fn clone(&self) -> Self {
        let roots = self.heap.roots();
        let index = roots.register(roots.value(self.index), roots.info(self.index));
        Self {
            heap: self.heap,
            index,
            _ty: PhantomData,
        }
    }
}

impl<T: Trace> Drop for Handle<'_, T> {
    fn drop(&mut self) {
        self.heap.roots().unregister(self.index);
    }
}

/// A scoped pin: the referent cannot move while this guard exists.
///
/// Dereferences to the payload. Managed fields of the payload are
/// [`GcRef`]s, which are interior-mutable, so a shared pinned view is
/// enough to edit the object graph.
pub struct Pinned<'a, T: Trace> {
    obj: NonNull<GcBox<T>>,
    heap: &'a Heap,
}

impl<T: Trace> Deref for Pinned<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the referent is pinned, so it is neither moved nor
        // reclaimed while the guard exists.
        unsafe { &self.obj.as_ref().value }
    }
}

impl<T: Trace> Drop for Pinned<'_, T> {
    fn drop(&mut self) {
        // SAFETY: this guard's constructor pinned exactly this header.
        unsafe { self.heap.unpin(self.obj.as_ptr() as *mut GcHeader) };
    }
}

/// A nullable managed reference stored *inside* a managed payload.
///
/// Starts null; the only way to make it non-null is to store a rooted
/// handle's referent through a pinned view of the containing object, so a
/// non-null `GcRef` can never sit outside the heap where the collector
/// would not find it. The collector rewrites the referent address during
/// collection, which is why the slot is interior-mutable.
pub struct GcRef<T: Trace> {
    slot: Cell<*mut GcBox<T>>,
}

impl<T: Trace> GcRef<T> {
    /// A null reference.
    pub const fn null() -> Self {
        Self {
            slot: Cell::new(ptr::null_mut()),
        }
    }

    /// Returns `true` if the reference is null.
    pub fn is_null(&self) -> bool {
        self.slot.get().is_null()
    }

    /// Point this reference at `target`'s referent.
    ///
    /// The reference itself must live inside a managed payload (reached
    /// through a pinned view); a reference outside the heap would never be
    /// found by the collector. The residence check compares integer
    /// addresses against the heap range.
    pub fn store(&self, target: &Handle<'_, T>) {
        debug_assert!(
            target.heap().is_in_heap(self as *const Self as *const u8),
            "GcRef written outside the heap; root objects with a Handle instead"
        );
        self.slot.set(target.gc_box());
    }

    /// Reset the reference to null.
    pub fn clear(&self) {
        self.slot.set(ptr::null_mut());
    }

    /// Raw pointer to the referent's payload, or null.
    ///
    /// Transient, like [`Handle::as_ptr`].
    pub fn as_ptr(&self) -> *mut T {
        let obj = self.slot.get();
        if obj.is_null() {
            ptr::null_mut()
        } else {
            // SAFETY: a non-null in-object reference addresses a live box.
            unsafe { &raw mut (*obj).value }
        }
    }

    /// Re-root the referent, returning a handle that keeps it alive
    /// independently of the containing object. Returns `None` for a null
    /// reference.
    pub fn load<'heap>(&self, heap: &'heap Heap) -> Option<Handle<'heap, T>> {
        let obj = self.slot.get();
        if obj.is_null() {
            None
        } else {
            Some(Handle::root(heap, obj as *mut GcHeader))
        }
    }

    pub(crate) fn gc_box(&self) -> *mut GcBox<T> {
        self.slot.get()
    }

    pub(crate) fn set_gc_box(&self, obj: *mut GcBox<T>) {
        self.slot.set(obj);
    }
}

impl<T: Trace> Default for GcRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Trace> Trace for GcRef<T> {
    fn trace(&self, tracer: &mut Tracer<'_>) {
        tracer.visit(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::heap::Heap;

    struct Leaf {
        _x: u64,
    }
    impl Trace for Leaf {}

    fn leaf() -> Leaf {
        Leaf { _x: 0 }
    }

    // ── RootSet bookkeeping ───────────────────────────────────────────────

    #[test]
    fn test_register_and_unregister_track_live_count() {
        let rs = RootSet::new();
        let mut header = GcHeader::sentinel();
        let idx = rs.register(&raw mut header, GcInfo::of::<Leaf>());
        assert_eq!(rs.len(), 1);
        rs.unregister(idx);
        assert_eq!(rs.len(), 0);
    }

    #[test]
    fn test_freed_slots_are_reused() {
        let rs = RootSet::new();
        let mut header = GcHeader::sentinel();
        let info = GcInfo::of::<Leaf>();
        let idx1 = rs.register(&raw mut header, info);
        rs.unregister(idx1);
        let idx2 = rs.register(&raw mut header, info);
        assert_eq!(idx1, idx2, "freed slot must be recycled");
    }

    #[test]
    fn test_snapshot_covers_only_live_slots() {
        let rs = RootSet::new();
        let mut h1 = GcHeader::sentinel();
        let mut h2 = GcHeader::sentinel();
        let info = GcInfo::of::<Leaf>();
        let idx1 = rs.register(&raw mut h1, info);
        let _idx2 = rs.register(&raw mut h2, info);
        rs.unregister(idx1);
        assert_eq!(rs.snapshot().len(), 1);
    }

    // ── Handle lifecycle ──────────────────────────────────────────────────

    #[test]
    fn test_allocate_registers_one_root_and_drop_releases_it() {
        let heap = Heap::new();
        {
            let _h = heap.allocate(leaf()).expect("heap has room");
            assert_eq!(heap.root_count(), 1);
        }
        assert_eq!(heap.root_count(), 0);
    }

    #[test]
    fn test_clone_registers_its_own_slot() {
        let heap = Heap::new();
        let h = heap.allocate(leaf()).expect("heap has room");
        let h2 = h.clone();
        assert_eq!(heap.root_count(), 2);
        assert_eq!(h.as_ptr(), h2.as_ptr());
        drop(h);
        // The clone keeps the object rooted on its own.
        assert_eq!(heap.root_count(), 1);
        heap.collect();
        assert!(!h2.as_ptr().is_null());
    }

    // ── GcRef basics ──────────────────────────────────────────────────────

    struct Holder {
        link: GcRef<Leaf>,
    }
    impl Trace for Holder {
        fn trace(&self, tracer: &mut Tracer<'_>) {
            self.link.trace(tracer);
        }
    }

    #[test]
    fn test_gc_ref_starts_null_and_round_trips_a_handle() {
        let heap = Heap::new();
        let target = heap.allocate(leaf()).expect("heap has room");
        let holder = heap
            .allocate(Holder {
                link: GcRef::null(),
            })
            .expect("heap has room");

        let pinned = holder.pin();
        assert!(pinned.link.is_null());
        assert!(pinned.link.load(&heap).is_none());

        pinned.link.store(&target);
        assert!(!pinned.link.is_null());
        assert_eq!(pinned.link.as_ptr(), target.as_ptr());

        let reloaded = pinned.link.load(&heap).expect("reference is non-null");
        assert_eq!(reloaded.as_ptr(), target.as_ptr());

        pinned.link.clear();
        assert!(pinned.link.is_null());
    }

    // ── Pin guard ─────────────────────────────────────────────────────────

    #[test]
    fn test_pin_guard_sets_and_clears_pin_state() {
        let heap = Heap::new();
        let h = heap.allocate(leaf()).expect("heap has room");
        assert!(!h.is_pinned());
        {
            let _p = h.pin();
            assert!(h.is_pinned());
        }
        assert!(!h.is_pinned());
    }

    #[test]
    #[should_panic(expected = "already pinned")]
    fn test_double_pin_panics() {
        let heap = Heap::new();
        let h = heap.allocate(leaf()).expect("heap has room");
        let _p = h.pin();
        let _q = h.pin();
    }

    #[test]
    fn test_unscoped_pin_survives_guardless() {
        let heap = Heap::new();
        let h = heap.allocate(leaf()).expect("heap has room");
        let raw = h.unscoped_pin();
        assert!(h.is_pinned());
        assert_eq!(raw, h.as_ptr());
        h.unscoped_unpin();
        assert!(!h.is_pinned());
    }
}
