#![no_main]

use libfuzzer_sys::fuzz_target;
use seesaw_core::gc::handle::Handle;
use seesaw_core::gc::heap::Heap;
use seesaw_core::gc::trace::Trace;

struct Slab {
    _payload: u64,
}

impl Trace for Slab {}

// Exercise the pin lifecycle against the collector: pinned objects must
// keep their raw payload address across any number of collections, and
// unpinned objects must be compacted away from their old address without
// breaking the handles of their pinned neighbours.
//
// Each input byte encodes one operation in its low bits:
//   0 – allocate a slab and keep its handle
//   1 – pin a retained, unpinned slab (recording its raw address)
//   2 – unpin a retained, pinned slab
//   3 – force a collection
//   4 – drop an unpinned slab's handle
//
// Pinned state is shadowed locally so the target never double-pins.
fuzz_target!(|data: &[u8]| {
    const MAX_HANDLES: usize = 24;
    const MAX_OPS: usize = 256;

    let heap = Heap::with_capacity(4096);
    // (handle, Some(raw payload address) while pinned)
    let mut slabs: Vec<(Handle<'_, Slab>, Option<*mut Slab>)> = Vec::new();

    for &byte in data.iter().take(MAX_OPS) {
        let op = byte & 0x7;
        let pick = (byte >> 3) as usize;

        match op {
            0 => {
                if slabs.len() < MAX_HANDLES {
                    if let Ok(handle) = heap.allocate(Slab { _payload: 0 }) {
                        slabs.push((handle, None));
                    }
                }
            }
            1 => {
                if !slabs.is_empty() {
                    let slot = &mut slabs[pick % slabs.len()];
                    if slot.1.is_none() {
                        slot.1 = Some(slot.0.unscoped_pin());
                    }
                }
            }
            2 => {
                if !slabs.is_empty() {
                    let slot = &mut slabs[pick % slabs.len()];
                    if slot.1.take().is_some() {
                        slot.0.unscoped_unpin();
                    }
                }
            }
            3 => {
                heap.collect();
            }
            _ => {
                if !slabs.is_empty() {
                    let index = pick % slabs.len();
                    if slabs[index].1.is_none() {
                        slabs.swap_remove(index);
                    }
                }
            }
        }

        // Pin stability: a pinned slab's payload address never changes,
        // and its header keeps reporting the pinned state.
        for (handle, pinned_at) in &slabs {
            if let Some(raw) = pinned_at {
                assert_eq!(handle.as_ptr(), *raw, "pinned object moved");
                assert!(handle.is_pinned(), "pin state lost");
            } else {
                assert!(!handle.is_pinned(), "stray pin state");
            }
        }
        assert!(heap.used() <= heap.semispace_size());
    }

    // Release every pin, then check that the survivors end up compacted
    // into one contiguous prefix of the from-space. Two cycles are needed:
    // the first may still thread evacuees around the stale island slots,
    // the second targets a fully swept half.
    for (handle, pinned_at) in &mut slabs {
        if pinned_at.take().is_some() {
            handle.unscoped_unpin();
        }
    }
    heap.collect();
    heap.collect();
    let survivors = slabs.len();
    assert_eq!(
        heap.used(),
        survivors * core::mem::size_of::<seesaw_core::gc::header::GcBox<Slab>>(),
        "fully unpinned heap must compact without gaps"
    );
    slabs.clear();
});
