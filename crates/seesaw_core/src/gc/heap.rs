//! Semispace heap: bump allocator and copying collector.
//!
//! # Design
//!
//! The heap owns one contiguous region split into two equal halves, the
//! *from-space* and the *to-space*. Allocation bumps a cursor through the
//! from-space. A collection copies every object reachable from the root
//! set into the to-space Cheney-style, finalizes what was left behind, and
//! swaps the two roles.
//!
//! Pinned objects complicate the picture: they must not move, so they stay
//! at their address while everything else compacts around them. The
//! machinery for that is the *skip record*: a header-sized marker
//! (`info == null, forwardee != null`) telling the allocator and the space
//! walks "nothing contiguous here, the next header is at `forwardee`".
//! The finalization sweep rebuilds the skip-record threading after every
//! collection, and the allocator carries the record it finds at the cursor
//! forward past each new allocation (the *preamble*), so the position at
//! the cursor always holds an end-of-space sentinel, a valid skip record,
//! or the header of an island sitting at the cursor itself (an object that
//! survived in place at its space's base).
//!
//! # Collection phases
//!
//! 1. **Flip prep** — the cursor moves to the to-space base.
//! 2. **Root evacuation** — every root slot's referent is copied into
//!    to-space (or recognized as already forwarded or pinned) and the slot
//!    is rewritten.
//! 3. **Pinned roots** — both spaces are walked and every pinned object's
//!    references are processed, since a pinned object can sit outside the
//!    scan window below and its referents must survive regardless.
//! 4. **Cheney scan** — a cursor walks the to-space visiting each copied
//!    object's references, evacuating referents on first contact; the walk
//!    follows skip records across pinned islands.
//! 5. **Sweep** — the old from-space is walked once: unreached objects are
//!    finalized (exactly once, enforced with a tombstone), pinned
//!    survivors get fresh skip records threaded to them, and a trailing
//!    sentinel terminates the layout.
//! 6. **Swap** — the spaces trade roles; the cursor is already parked
//!    after the last survivor in the new from-space.

use std::alloc::{Layout, alloc, dealloc};
use std::cell::Cell;
use std::ptr;

use crate::error::{HeapError, HeapResult};
use crate::gc::handle::{GcRef, Handle, RootSet};
use crate::gc::header::{FINALIZED, GcBox, GcHeader, HEADER_SIZE, HEAP_ALIGN};
use crate::gc::info::GcInfo;
use crate::gc::trace::Trace;

/// Total heap capacity in bytes (both semispaces together) used by
/// [`Heap::new`]. Production sizing goes through [`Heap::with_capacity`].
pub const DEFAULT_HEAP_SIZE: usize = 1024;

/// A contiguous, aligned, fixed-size memory region backing the two
/// semispaces. The region is zeroed on creation, which doubles as writing
/// an end-of-space sentinel at every position.
struct MemoryRegion {
    base: *mut u8,
    capacity: usize,
}

impl MemoryRegion {
    /// Allocate a zeroed region of `capacity` bytes.
    ///
    /// # Panics
    /// Panics if the system allocator returns a null pointer.
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "region capacity must be non-zero");
        let layout = Layout::from_size_align(capacity, HEAP_ALIGN).expect("valid layout");
        // SAFETY: the layout has non-zero size and power-of-two alignment.
        let base = unsafe { alloc(layout) };
        assert!(!base.is_null(), "heap region allocation failed");
        // SAFETY: `base` addresses `capacity` writable bytes.
        unsafe { ptr::write_bytes(base, 0, capacity) };
        Self { base, capacity }
    }

    fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated with the same layout in `new`.
        let layout = Layout::from_size_align(self.capacity, HEAP_ALIGN).expect("valid layout");
        unsafe { dealloc(self.base, layout) };
    }
}

/// Which semispace an allocation targets.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Space {
    From,
    To,
}

/// Whether running out of room may trigger a collection.
#[derive(Clone, Copy, PartialEq, Eq)]
enum CollectPolicy {
    /// Mutator allocations: collect once, then fail.
    CollectIfNeeded,
    /// Evacuations during a collection: never re-enter the collector.
    NeverCollect,
}

/// The garbage-collected heap.
///
/// Single-threaded by construction (`!Send`/`!Sync`); all operations take
/// `&self` because the collector rewrites root slots and in-object
/// references while the mutator holds shared views of them. Only
/// [`allocate`][Heap::allocate] can trigger a collection implicitly, so
/// raw payload pointers stay valid between allocations unless the object
/// is pinned.
pub struct Heap {
    region: MemoryRegion,
    semi_size: usize,
    from: Cell<*mut u8>,
    to: Cell<*mut u8>,
    alloc_ptr: Cell<*mut u8>,
    roots: RootSet,
}

impl Heap {
    /// A heap of [`DEFAULT_HEAP_SIZE`] bytes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HEAP_SIZE)
    }

    /// A heap of `capacity` total bytes, split into two equal semispaces.
    ///
    /// # Panics
    /// Panics unless `capacity` is a multiple of `2 * HEAP_ALIGN` with
    /// room for at least one header per semispace.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity % (2 * HEAP_ALIGN) == 0,
            "heap capacity must be a multiple of {}",
            2 * HEAP_ALIGN
        );
        assert!(capacity >= 4 * HEAP_ALIGN, "heap capacity too small");
        let region = MemoryRegion::new(capacity);
        let semi_size = capacity / 2;
        let from = region.base_ptr();
        // SAFETY: `semi_size < capacity`, so the offset stays in bounds.
        let to = unsafe { from.add(semi_size) };
        // The zeroed region already reads as a sentinel at every header
        // position; writing the two base sentinels spells the invariant out.
        unsafe {
            (from as *mut GcHeader).write(GcHeader::sentinel());
            (to as *mut GcHeader).write(GcHeader::sentinel());
        }
        Self {
            region,
            semi_size,
            from: Cell::new(from),
            to: Cell::new(to),
            alloc_ptr: Cell::new(from),
            roots: RootSet::new(),
        }
    }

    /// Bytes currently occupied in the from-space.
    pub fn used(&self) -> usize {
        self.alloc_ptr.get() as usize - self.from.get() as usize
    }

    /// Total heap capacity (both semispaces).
    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    /// Capacity of each semispace half.
    pub fn semispace_size(&self) -> usize {
        self.semi_size
    }

    /// Number of live rooted handles.
    pub fn root_count(&self) -> usize {
        self.roots.len()
    }

    /// Returns `true` if `ptr` points into the active from-space.
    ///
    /// The comparison is performed on integer addresses, which keeps it
    /// well-defined for pointers into either space.
    pub fn is_in_from_space(&self, ptr: *const u8) -> bool {
        let base = self.from.get() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.semi_size
    }

    /// Returns `true` if `ptr` points anywhere into the heap region.
    pub fn is_in_heap(&self, ptr: *const u8) -> bool {
        let base = self.region.base_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.region.capacity()
    }

    pub(crate) fn roots(&self) -> &RootSet {
        &self.roots
    }

    fn space_base(&self, space: Space) -> *mut u8 {
        match space {
            Space::From => self.from.get(),
            Space::To => self.to.get(),
        }
    }

    // ── Allocation ────────────────────────────────────────────────────────

    /// Construct `value` in the heap and return a rooted handle to it.
    ///
    /// When the from-space is exhausted a collection runs once and the
    /// allocation is retried; if there is still no room the allocation
    /// fails with [`HeapError::OutOfMemory`] and the heap stays
    /// consistent.
    ///
    /// Payload types must not be more aligned than [`HEAP_ALIGN`]
    /// (enforced at compile time).
    pub fn allocate<T: Trace>(&self, value: T) -> HeapResult<Handle<'_, T>> {
        const {
            assert!(
                std::mem::align_of::<T>() <= HEAP_ALIGN,
                "payload alignment exceeds the heap alignment"
            );
        }
        let info = GcInfo::of::<T>();
        let preamble = self.adjust_alloc_ptr(Space::From, info.size, CollectPolicy::CollectIfNeeded)?;

        let dest = self.alloc_ptr.get();
        let obj = dest as *mut GcBox<T>;
        // SAFETY: `adjust_alloc_ptr` reserved `info.size` bytes at `dest`.
        unsafe {
            ptr::write_bytes(dest, 0, info.size);
            (&raw mut (*obj).value).write(value);
            (&raw mut (*obj).header).write(GcHeader::live(info));
            self.alloc_ptr.set(dest.add(info.size));
        }
        self.restore_preamble(Space::From, preamble);

        Ok(Handle::root(self, obj as *mut GcHeader))
    }

    /// Position the cursor at a spot with `size` free bytes in `space` and
    /// return the header found there, so the caller can carry it past the
    /// new allocation.
    ///
    /// The cursor position always holds an end-of-space sentinel, a skip
    /// record, or the header of an island resident at the cursor itself.
    /// When a skip record is found and the gap before the pinned island
    /// cannot hold the allocation *plus* a carried record, the cursor hops
    /// past the island and tries again; a resident island is hopped
    /// unconditionally. Both hops stay valid even if the island's object
    /// has been unpinned since, because its header keeps its size.
    fn adjust_alloc_ptr(
        &self,
        space: Space,
        size: usize,
        policy: CollectPolicy,
    ) -> HeapResult<GcHeader> {
        let mut collected = false;
        loop {
            let base = self.space_base(space);
            let used = self.alloc_ptr.get() as usize - base as usize;
            if used + size > self.semi_size {
                if policy == CollectPolicy::CollectIfNeeded && !collected {
                    log::debug!("allocation of {size} bytes triggers a collection");
                    self.collect();
                    collected = true;
                    continue;
                }
                return Err(HeapError::OutOfMemory { requested: size });
            }

            // SAFETY: at least `size >= HEADER_SIZE` bytes remain at the
            // cursor, and the cursor is always header-aligned.
            let preamble = unsafe { (self.alloc_ptr.get() as *mut GcHeader).read() };
            if let Some(next_pinned) = preamble.skip_target() {
                let gap = next_pinned as usize - self.alloc_ptr.get() as usize;
                if gap < size + HEADER_SIZE {
                    // SAFETY: skip targets address a header whose `info`
                    // survives unpinning.
                    let hop = unsafe {
                        (next_pinned as *mut u8).add((*(*next_pinned).info).size)
                    };
                    self.alloc_ptr.set(hop);
                    continue;
                }
            } else if !preamble.info.is_null() {
                // A resident island sits exactly at the cursor: an object
                // that survived in place at its space's base (or abutting
                // the previous island), so no skip record precedes it.
                // Step over it as if it named itself.
                // SAFETY: the island header's `info` survives unpinning.
                let hop = unsafe {
                    self.alloc_ptr.get().add((*preamble.info).size)
                };
                self.alloc_ptr.set(hop);
                continue;
            }
            return Ok(preamble);
        }
    }

    /// Re-write the carried preamble at the advanced cursor, preserving
    /// the skip-record chain. Skipped when fewer than `HEADER_SIZE` bytes
    /// remain: the next allocation is then forced to collect before it
    /// could read past the end.
    fn restore_preamble(&self, space: Space, preamble: GcHeader) {
        let base = self.space_base(space);
        let used = self.alloc_ptr.get() as usize - base as usize;
        if used < self.semi_size - HEADER_SIZE {
            // SAFETY: a full header fits at the cursor.
            unsafe { (self.alloc_ptr.get() as *mut GcHeader).write(preamble) };
        }
    }

    // ── Evacuation ────────────────────────────────────────────────────────

    /// Resolve a root's referent for the current cycle: evacuate it on
    /// first contact, short-circuit through the forwarding pointer on
    /// later ones, and leave pinned objects where they are.
    ///
    /// # Safety
    /// `header` must address a live managed object and a collection cycle
    /// must be in progress.
    pub(crate) unsafe fn evacuate_or_forward(&self, header: *mut GcHeader) -> *mut GcHeader {
        // SAFETY: caller guarantees a live object header.
        let forwardee = unsafe { (*header).forwardee };
        if forwardee.is_null() {
            // SAFETY: live and unmoved; see above.
            unsafe { self.evacuate_header(header) }
        } else if forwardee == header {
            header // pinned: survives in place
        } else {
            debug_assert!(forwardee != FINALIZED, "root addresses a finalized object");
            forwardee
        }
    }

    /// Copy the object at `header` into the to-space and install the
    /// forwarding pointer at its old location.
    ///
    /// Relocation is a bitwise copy: every Rust value is trivially
    /// movable, and the abandoned bytes are never dropped (the forwarding
    /// pointer excludes them from every later sweep).
    ///
    /// # Safety
    /// `header` must address a live managed object and a collection cycle
    /// must be in progress.
    pub(crate) unsafe fn evacuate_header(&self, header: *mut GcHeader) -> *mut GcHeader {
        // SAFETY: caller guarantees a live object header.
        unsafe {
            if (*header).forwardee == header {
                return header; // pinned objects are never moved
            }
        }
        let info = unsafe { (*header).info };
        debug_assert!(!info.is_null());
        let size = unsafe { (*info).size };

        // `collect` is specified non-failing, so to-space exhaustion
        // (e.g. excessive pinned load) is unrecoverable.
        let preamble = match self.adjust_alloc_ptr(Space::To, size, CollectPolicy::NeverCollect) {
            Ok(preamble) => preamble,
            Err(_) => self.evacuation_overflow(size),
        };

        let dest = self.alloc_ptr.get();
        // SAFETY: `dest` addresses `size` free bytes. The ranges cannot
        // overlap: the allocator hops pinned islands instead of allocating
        // over them, and un-forwarded from-space objects lie outside the
        // to-space cursor range.
        unsafe {
            ptr::copy_nonoverlapping(header as *const u8, dest, size);
            let new_header = dest as *mut GcHeader;
            (*new_header).forwardee = ptr::null_mut();
            (*header).forwardee = new_header;
            self.alloc_ptr.set(dest.add(size));
            self.restore_preamble(Space::To, preamble);
            new_header
        }
    }

    fn evacuation_overflow(&self, requested: usize) -> ! {
        log::error!(
            "to-space cannot hold the live and pinned set ({requested} bytes requested); aborting"
        );
        std::process::abort();
    }

    /// Process one in-object reference during a collection cycle.
    ///
    /// Null references are ignored. A referent that has already been
    /// relocated this cycle is followed through its forwarding pointer
    /// regardless of which space it sat in (a root may re-evacuate an
    /// unpinned to-space survivor). An unmoved from-space referent is
    /// evacuated on the spot. Pinned referents and to-space residents keep
    /// their addresses, which survive the swap.
    pub(crate) fn process_reference<T: Trace>(&self, reference: &GcRef<T>) {
        let obj = reference.gc_box();
        if obj.is_null() {
            return;
        }
        let header = obj as *mut GcHeader;
        // SAFETY: a non-null in-object reference addresses a live object.
        let forwardee = unsafe { (*header).forwardee };
        if !forwardee.is_null() && forwardee != header {
            debug_assert!(forwardee != FINALIZED, "reference to a finalized object");
            reference.set_gc_box(forwardee as *mut GcBox<T>);
        } else if forwardee.is_null() && self.is_in_from_space(header as *const u8) {
            // SAFETY: live, unmoved from-space object.
            let new_header = unsafe { self.evacuate_header(header) };
            reference.set_gc_box(new_header as *mut GcBox<T>);
        }
    }

    // ── Collection ────────────────────────────────────────────────────────

    /// Run a full stop-the-world collection cycle.
    ///
    /// Non-failing: the only unrecoverable condition (to-space overflow
    /// from excessive pinned load) aborts the process.
    pub fn collect(&self) {
        let old_from = self.from.get();
        let old_to = self.to.get();
        log::trace!(
            "collect: {} bytes used, {} roots",
            self.used(),
            self.roots.len()
        );

        // Phase 1: evacuation targets the to-space.
        self.alloc_ptr.set(old_to);

        // Phase 2: evacuate every rooted object and rewrite its slot.
        let snapshot = self.roots.snapshot();
        for &(slot, info) in snapshot.iter() {
            // SAFETY: the snapshot's slot pointers stay valid for the whole
            // cycle (nothing registers or unregisters roots while the
            // collector runs), and every registered root is non-null.
            unsafe { (info.evacuate)(&*slot, self) };
        }
        drop(snapshot);

        // Phase 3: pinned objects act as roots wherever they sit; their
        // referents must survive even when the scan below never reaches
        // the pinned object itself.
        // SAFETY: both walks follow the header protocol of their space.
        unsafe {
            self.visit_pinned(old_from);
            self.visit_pinned(old_to);
        }

        // Phase 4: Cheney scan of the to-space. The window grows as
        // visiting evacuates more referents; skip records bridge pinned
        // islands that evacuation hopped over.
        let mut scan = old_to;
        while (scan as usize) < self.alloc_ptr.get() as usize {
            let header = scan as *mut GcHeader;
            // SAFETY: the scan cursor only lands on headers written by the
            // allocator, the evacuator, or the sweep threading.
            let info = unsafe { (*header).info };
            if info.is_null() {
                let target = unsafe { (*header).forwardee };
                debug_assert!(!target.is_null(), "sentinel inside the scan window");
                scan = target as *mut u8;
                continue;
            }
            unsafe {
                ((*info).visit)(header, self);
                scan = scan.add((*info).size);
            }
        }

        // Phase 5: sweep the old from-space, finalizing unreached objects
        // and rebuilding the pinned-record threading.
        // SAFETY: the old from-space holds a well-formed header layout.
        unsafe { self.sweep(old_from) };

        // Phase 6: swap the space roles. The cursor already sits after the
        // last survivor in the new from-space.
        self.from.set(old_to);
        self.to.set(old_from);
        log::trace!("collect done: {} bytes live", self.used());
    }

    /// Walk one semispace and process the references of every pinned
    /// object in it.
    ///
    /// # Safety
    /// `base` must be one of the two semispace bases, holding a
    /// well-formed header layout (objects, skip records, sentinel).
    unsafe fn visit_pinned(&self, base: *mut u8) {
        let mut cursor = base;
        while (cursor as usize - base as usize) < self.semi_size - HEADER_SIZE {
            let header = cursor as *mut GcHeader;
            // SAFETY: the walk only lands on protocol positions.
            let head = unsafe { header.read() };
            if head.is_sentinel() {
                break;
            }
            if let Some(target) = head.skip_target() {
                cursor = target as *mut u8;
                continue;
            }
            if head.forwardee == header {
                // SAFETY: pinned objects are live; dispatch their visitor.
                unsafe { ((*head.info).visit)(header, self) };
            }
            cursor = unsafe { cursor.add((*head.info).size) };
        }
    }

    /// Finalization sweep and pinned-record rebuild over the old
    /// from-space (collection phase 5).
    ///
    /// # Safety
    /// `base` must be the old from-space base, after evacuation has
    /// completed for the cycle.
    unsafe fn sweep(&self, base: *mut u8) {
        let mut pin_record_slot = base as *mut GcHeader;
        let mut cursor = base;
        while (cursor as usize - base as usize) < self.semi_size - HEADER_SIZE {
            let header = cursor as *mut GcHeader;
            // SAFETY: the walk only lands on protocol positions.
            let head = unsafe { header.read() };
            if head.is_sentinel() {
                break;
            }
            if let Some(target) = head.skip_target() {
                // Pre-collection skip record: no more contiguous objects
                // until the (possibly since-unpinned) island it names.
                cursor = target as *mut u8;
                continue;
            }
            let size = unsafe { (*head.info).size };
            let forwardee = head.forwardee;
            if forwardee == header {
                // Pinned survivor: stays exactly where it is. Thread a
                // skip record to it unless it abuts the previous island.
                if pin_record_slot != header {
                    // SAFETY: `pin_record_slot` is a header position that
                    // holds no live data this cycle.
                    unsafe { pin_record_slot.write(GcHeader::skip_to(header)) };
                }
                pin_record_slot = unsafe { cursor.add(size) } as *mut GcHeader;
            } else if forwardee.is_null() {
                // Live but unreached: finalize once, then stamp the corpse
                // so no later sweep runs the finalizer again.
                if let Some(finalize) = unsafe { (*head.info).finalize } {
                    // SAFETY: the payload is initialized and unreached; it
                    // is finalized exactly here.
                    unsafe { finalize(header) };
                }
                unsafe { (*header).forwardee = FINALIZED };
            }
            // Forwarded objects need no action: their copy lives on.
            cursor = unsafe { cursor.add(size) };
        }

        // Trailing sentinel, unless the threading already reached the
        // zone the walks never read.
        if (pin_record_slot as usize) < base as usize + self.semi_size - HEADER_SIZE {
            // SAFETY: in-bounds header position past the last survivor.
            unsafe { pin_record_slot.write(GcHeader::sentinel()) };
        }
    }

    // ── Pinning ───────────────────────────────────────────────────────────

    /// Pin the object at `header`: the collector will not move it until
    /// [`unpin`][Self::unpin].
    ///
    /// # Safety
    /// `header` must address a live managed object.
    ///
    /// # Panics
    /// Panics if the object is already pinned (or mid-evacuation).
    pub(crate) unsafe fn pin(&self, header: *mut GcHeader) {
        // SAFETY: caller guarantees a live object header.
        unsafe {
            assert!(
                (*header).forwardee.is_null(),
                "object is already pinned or forwarded"
            );
            (*header).forwardee = header;
        }
    }

    /// Release a pin taken with [`pin`][Self::pin]. The freed slot is
    /// compacted by the next collection, not immediately.
    ///
    /// # Safety
    /// `header` must address a live managed object.
    ///
    /// # Panics
    /// Panics if the object is not pinned.
    pub(crate) unsafe fn unpin(&self, header: *mut GcHeader) {
        // SAFETY: caller guarantees a live object header.
        unsafe {
            assert!(
                (*header).forwardee == header,
                "object is not pinned"
            );
            (*header).forwardee = ptr::null_mut();
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Run the finalizer of every live, un-forwarded object in both
    /// spaces. Already-swept corpses and pinned objects are skipped.
    fn finalize_all(&mut self) {
        debug_assert_eq!(self.roots.len(), 0, "handles must not outlive the heap");
        for base in [self.from.get(), self.to.get()] {
            let mut cursor = base;
            while (cursor as usize - base as usize) < self.semi_size - HEADER_SIZE {
                let header = cursor as *mut GcHeader;
                // SAFETY: both spaces hold well-formed header layouts.
                let head = unsafe { header.read() };
                if head.is_sentinel() {
                    break;
                }
                if let Some(target) = head.skip_target() {
                    cursor = target as *mut u8;
                    continue;
                }
                if head.forwardee.is_null() {
                    if let Some(finalize) = unsafe { (*head.info).finalize } {
                        // SAFETY: live, never-finalized payload.
                        unsafe { finalize(header) };
                    }
                }
                cursor = unsafe { cursor.add((*head.info).size) };
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        self.finalize_all();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::trace::{Trace, Tracer};
    use std::cell::Cell;
    use std::mem::size_of;
    use std::rc::Rc;

    /// Payload with a finalizer-visible drop and one managed edge.
    struct Counted {
        drops: Rc<Cell<usize>>,
        link: GcRef<Counted>,
    }
    impl Trace for Counted {
        fn trace(&self, tracer: &mut Tracer<'_>) {
            self.link.trace(tracer);
        }
    }
    impl Drop for Counted {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn counted(drops: &Rc<Cell<usize>>) -> Counted {
        Counted {
            drops: Rc::clone(drops),
            link: GcRef::null(),
        }
    }

    /// Finalizer-free leaf payload.
    struct Leaf {
        _x: u64,
    }
    impl Trace for Leaf {}

    fn leaf() -> Leaf {
        Leaf { _x: 0 }
    }

    const BOX: usize = size_of::<GcBox<Counted>>();

    // ── Allocation basics ─────────────────────────────────────────────────

    #[test]
    fn test_allocate_bumps_used() {
        let heap = Heap::new();
        assert_eq!(heap.used(), 0);
        let h = heap.allocate(leaf()).expect("heap has room");
        assert_eq!(heap.used(), size_of::<GcBox<Leaf>>());
        assert!(heap.is_in_from_space(h.as_ptr().cast()));
    }

    #[test]
    fn test_used_is_monotonic_between_collections() {
        let heap = Heap::new();
        let mut last = heap.used();
        let mut handles = Vec::new();
        for _ in 0..4 {
            handles.push(heap.allocate(leaf()).expect("heap has room"));
            assert!(heap.used() > last);
            last = heap.used();
        }
    }

    // ── Basic reclamation ─────────────────────────────────────────────────

    #[test]
    fn test_collect_reclaims_unreferenced_object() {
        let drops = Rc::new(Cell::new(0));
        let heap = Heap::new();

        let a1 = heap.allocate(counted(&drops)).expect("heap has room");
        let a2 = heap.allocate(counted(&drops)).expect("heap has room");
        a1.pin().link.store(&a2);
        {
            // Temporary with no retained handle.
            let _a3 = heap.allocate(counted(&drops)).expect("heap has room");
        }

        heap.collect();

        assert_eq!(drops.get(), 1, "only the temporary is finalized");
        // a1's edge still resolves to a2's (relocated) object.
        let linked = a1.pin().link.load(&heap).expect("edge survives");
        assert_eq!(linked.as_ptr(), a2.as_ptr());
        assert_eq!(heap.used(), 2 * BOX);
    }

    // ── Cycles ────────────────────────────────────────────────────────────

    #[test]
    fn test_collect_reclaims_unreachable_cycle() {
        let drops = Rc::new(Cell::new(0));
        let heap = Heap::new();
        {
            let c1 = heap.allocate(counted(&drops)).expect("heap has room");
            let c2 = heap.allocate(counted(&drops)).expect("heap has room");
            c1.pin().link.store(&c2);
            c2.pin().link.store(&c1);
        }
        heap.collect();
        assert_eq!(drops.get(), 2, "both cycle members finalize exactly once");
        assert_eq!(heap.used(), 0);
    }

    #[test]
    fn test_rooted_cycle_survives_and_scan_terminates() {
        let drops = Rc::new(Cell::new(0));
        let heap = Heap::new();
        let c1 = heap.allocate(counted(&drops)).expect("heap has room");
        let c2 = heap.allocate(counted(&drops)).expect("heap has room");
        c1.pin().link.store(&c2);
        c2.pin().link.store(&c1);

        heap.collect();
        heap.collect();

        assert_eq!(drops.get(), 0);
        assert_eq!(c1.pin().link.as_ptr(), c2.as_ptr());
        assert_eq!(c2.pin().link.as_ptr(), c1.as_ptr());
        assert_eq!(heap.used(), 2 * BOX, "cycle is copied exactly once");
    }

    // ── Evacuation identity ───────────────────────────────────────────────

    #[test]
    fn test_evacuation_moves_survivor_into_the_other_half() {
        let heap = Heap::new();
        let h = heap.allocate(leaf()).expect("heap has room");
        let pre = h.as_ptr();
        assert!(heap.is_in_from_space(pre.cast()));

        heap.collect();

        let post = h.as_ptr();
        assert_ne!(pre, post, "survivor must have been copied");
        assert!(heap.is_in_from_space(post.cast()));
        assert!(
            !heap.is_in_from_space(pre.cast()),
            "the old address lies in the new to-space"
        );
    }

    #[test]
    fn test_shared_object_is_copied_once() {
        let heap = Heap::new();
        let h1 = heap.allocate(leaf()).expect("heap has room");
        let h2 = h1.clone();
        heap.collect();
        assert_eq!(
            h1.as_ptr(),
            h2.as_ptr(),
            "both roots must converge on the single copy"
        );
        assert_eq!(heap.used(), size_of::<GcBox<Leaf>>());
    }

    #[test]
    fn test_repeated_collections_are_stable() {
        let heap = Heap::new();
        let h = heap.allocate(leaf()).expect("heap has room");
        for _ in 0..3 {
            heap.collect();
            assert!(!h.as_ptr().is_null());
            assert_eq!(heap.used(), size_of::<GcBox<Leaf>>());
        }
    }

    // ── Pinning across collections ────────────────────────────────────────

    #[test]
    fn test_pin_survives_collection_and_rejoins_from_space() {
        let drops = Rc::new(Cell::new(0));
        let heap = Heap::new();

        let a = heap.allocate(counted(&drops)).expect("heap has room");
        let p = heap.allocate(counted(&drops)).expect("heap has room");
        let rp = p.unscoped_pin();

        // The pinned object keeps its address through the flip; the
        // surviving address now lies in the new to-space.
        heap.collect();
        assert_eq!(p.as_ptr(), rp);
        assert!(p.is_pinned());
        assert!(!heap.is_in_from_space(rp.cast()));
        assert_eq!(heap.used(), BOX, "only `a` was evacuated");

        // Allocate past the flip, then collect into the half holding
        // the pinned island: survivors thread around it via skip records.
        let foo = heap.allocate(counted(&drops)).expect("heap has room");
        heap.collect();
        assert_eq!(p.as_ptr(), rp);
        assert!(heap.is_in_from_space(rp.cast()));
        assert!(heap.is_in_from_space(a.as_ptr().cast()));
        assert!(heap.is_in_from_space(foo.as_ptr().cast()));
        // Live + pinned bytes, plus the one island gap too small to reuse.
        assert_eq!(heap.used(), 4 * BOX);
        assert_eq!(drops.get(), 0);

        // After unpinning, the next collection compacts the object
        // to a fresh address and reclaims the gap; no finalizer runs
        // because the handle is still live.
        p.unscoped_unpin();
        heap.collect();
        assert_ne!(p.as_ptr(), rp, "unpinned object is relocated");
        assert_eq!(heap.used(), 3 * BOX);
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn test_allocation_hops_a_pinned_island() {
        let heap = Heap::new();
        let p = heap.allocate(leaf()).expect("heap has room");
        let rp = p.unscoped_pin();
        heap.collect(); // pinned island now sits in the to-space
        heap.collect(); // and rejoins the from-space, threaded by a skip record

        // The from-space now starts with the island itself (it was the
        // first allocation, so no skip record precedes it); a fresh
        // allocation must land beyond it, not on top of it.
        let q = heap.allocate(leaf()).expect("heap has room");
        let island = rp as usize;
        let fresh = q.as_ptr() as usize;
        assert!(
            fresh >= island + size_of::<GcBox<Leaf>>(),
            "allocation must hop past the pinned island"
        );
        assert_eq!(p.as_ptr(), rp);
    }

    // ── Pinned objects keep their referents alive ─────────────────────────

    #[test]
    fn test_pinned_object_edges_are_traced() {
        let drops = Rc::new(Cell::new(0));
        let heap = Heap::new();

        let p = heap.allocate(counted(&drops)).expect("heap has room");
        {
            let child = heap.allocate(counted(&drops)).expect("heap has room");
            p.pin().link.store(&child);
        }
        let _guard = p.pin();

        // The child is reachable only through the pinned object.
        heap.collect();
        assert_eq!(drops.get(), 0, "pinned object's referent must survive");
        assert!(!_guard.link.is_null());

        heap.collect();
        assert_eq!(drops.get(), 0);
    }

    // ── Out-of-memory and recovery ────────────────────────────────────────

    #[test]
    fn test_oom_is_reported_and_heap_recovers() {
        let heap = Heap::new();
        let slots = heap.semispace_size() / size_of::<GcBox<Leaf>>();

        let mut handles = Vec::new();
        loop {
            match heap.allocate(leaf()) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    assert!(matches!(e, HeapError::OutOfMemory { .. }));
                    break;
                }
            }
        }
        assert_eq!(handles.len(), slots);

        // Dropping half the handles makes the next (collecting) allocation
        // succeed again.
        handles.truncate(slots / 2);
        let h = heap.allocate(leaf()).expect("heap must recover after OOM");
        assert!(heap.is_in_from_space(h.as_ptr().cast()));
    }

    // ── Finalizers run exactly once, including teardown ───────────────────

    #[test]
    fn test_teardown_finalizes_live_objects() {
        let drops = Rc::new(Cell::new(0));
        {
            let heap = Heap::new();
            let _a = heap.allocate(counted(&drops)).expect("heap has room");
            let _b = heap.allocate(counted(&drops)).expect("heap has room");
        }
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_swept_corpse_is_not_finalized_again_at_teardown() {
        let drops = Rc::new(Cell::new(0));
        {
            let heap = Heap::new();
            {
                let _t = heap.allocate(counted(&drops)).expect("heap has room");
            }
            heap.collect();
            assert_eq!(drops.get(), 1, "sweep finalizes the garbage");
            let _live = heap.allocate(counted(&drops)).expect("heap has room");
        }
        // Teardown finalizes only the live object; the corpse in the
        // to-space was already swept.
        assert_eq!(drops.get(), 2);
    }

    #[test]
    fn test_implicit_collection_finalizes_garbage() {
        let drops = Rc::new(Cell::new(0));
        let heap = Heap::new();
        let slots = heap.semispace_size() / BOX;
        // Fill the from-space with garbage, then allocate one more object:
        // the implicit collection must reclaim everything else.
        for _ in 0..slots {
            let _t = heap.allocate(counted(&drops)).expect("heap has room");
        }
        let kept = heap.allocate(counted(&drops)).expect("implicit GC frees room");
        assert_eq!(drops.get(), slots);
        assert_eq!(heap.used(), BOX);
        assert!(!kept.as_ptr().is_null());
    }
}
