//! Lock-free CAS freelist for the thread-safe LIFO policy.
//!
//! The freelist head is a single `u32` packing `(tag, index)`: the low
//! `index_bits` bits hold the next slot to pop, the remaining high bits hold
//! a tag bumped on every successful pop, so a concurrent thread that popped
//! and pushed the same index back (ABA) still forces a retry rather than a
//! silently-accepted stale compare-exchange. Slot `0` is a dedicated
//! end-of-list sentinel and is never linked into the chain, which is also
//! what keeps the freelist from ever being driven fully empty by a release
//! racing a concurrent acquire (see `handle::usable_capacity`).
//!
//! Modeled on a Treiber stack: CAS-retry loop with `compare_exchange_weak`,
//! `Acquire`/`Release` ordering on the head word, and a `core::hint::spin_loop`
//! backoff between retries.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::bits::{self, DerivedLayout, InitFlags};
use crate::handle::internal::{Header, debug_validate, header, read_slot, write_slot};

#[inline]
pub(crate) fn pack(index: u32, tag: u32, index_bits: u32) -> u32 {
    (tag << index_bits) | index
}

#[inline]
fn unpack_index(word: u32, index_bits: u32) -> u32 {
    word & ((1u32 << index_bits) - 1)
}

#[inline]
fn index_bits_of(h: &Header) -> u32 {
    // capacity_rounded is a power of two in [2, 2^31], so this never
    // overflows the shift below.
    h.capacity_mask.count_ones()
}

#[inline]
fn head_atomic(base: *mut u8) -> &'static AtomicU32 {
    unsafe {
        let ptr = core::ptr::addr_of_mut!((*base.cast::<Header>()).freelist_head);
        AtomicU32::from_ptr(ptr)
    }
}

#[inline]
fn size_atomic(base: *mut u8) -> &'static AtomicU32 {
    unsafe {
        let ptr = core::ptr::addr_of_mut!((*base.cast::<Header>()).size);
        AtomicU32::from_ptr(ptr)
    }
}

/// # Safety
/// `base` must point to an initialized, thread-safe-LIFO allocator. May be
/// called concurrently from any number of threads.
pub(crate) unsafe fn acquire(base: *mut u8, userflags: u32) -> Option<(u32, u32)> {
    unsafe {
        let index_bits = index_bits_of(header(base));
        let head = head_atomic(base);
        let mut old = head.load(Ordering::Acquire);

        loop {
            let i = unpack_index(old, index_bits);
            if i == 0 {
                return None;
            }

            let h = header(base);
            let w = read_slot(base, h, i);
            let next = w & h.capacity_mask;
            let tag = old >> index_bits;
            let new_head = pack(next, tag.wrapping_add(1), index_bits);

            match head.compare_exchange_weak(old, new_head, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    let uf = userflags & h.userflags_mask;
                    let derived = DerivedLayout {
                        capacity: h.capacity,
                        capacity_rounded: h.capacity_rounded,
                        capacity_mask: h.capacity_mask,
                        index_bits,
                        generation_bits: h.generation_mask.count_ones(),
                        generation_mask: h.generation_mask,
                        userflags_mask: h.userflags_mask,
                        in_use_bit: h.in_use_bit,
                        gen_add: h.gen_add,
                        alt_layout: InitFlags::from_bits_truncate(h.flags)
                            .contains(InitFlags::DONT_USE_MSB_AS_IN_USE_BIT),
                    };
                    let new_gen = bits::bump_generation(w, &derived);
                    let handle = uf | new_gen | h.in_use_bit | i;
                    write_slot(base, h, i, handle);
                    size_atomic(base).fetch_add(1, Ordering::Relaxed);
                    return Some((i, handle));
                }
                Err(observed) => {
                    old = observed;
                    core::hint::spin_loop();
                }
            }
        }
    }
}

/// # Safety
/// `base` must point to an initialized, thread-safe-LIFO allocator. May be
/// called concurrently from any number of threads.
pub(crate) unsafe fn release(base: *mut u8, handle: u32) -> Option<u32> {
    unsafe {
        debug_validate(base);
        let index_bits = index_bits_of(header(base));
        let h = header(base);
        let i = handle & h.capacity_mask;
        if i == 0 || i >= h.capacity {
            return None;
        }
        if read_slot(base, h, i) != handle || handle & h.in_use_bit == 0 {
            return None;
        }

        let preserved_generation = handle & h.generation_mask;
        let head = head_atomic(base);
        let mut old = head.load(Ordering::Acquire);

        loop {
            let next = unpack_index(old, index_bits);
            let tag = old >> index_bits;
            // Publish this slot's link before it becomes reachable.
            write_slot(base, h, i, preserved_generation | next);
            let new_head = pack(i, tag.wrapping_add(1), index_bits);

            match head.compare_exchange_weak(old, new_head, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    size_atomic(base).fetch_sub(1, Ordering::Relaxed);
                    return Some(i);
                }
                Err(observed) => {
                    old = observed;
                    core::hint::spin_loop();
                }
            }
        }
    }
}
