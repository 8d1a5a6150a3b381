//! The core 32-bit handle allocator.
//!
//! # Memory layout
//!
//! ```text
//! [ Header (52B) | Record 0 | Record 1 | ... | Record (capacity_rounded-1) ]
//!
//! Header:
//!   magic, capacity, capacity_rounded, size,
//!   capacity_mask, generation_mask, userflags_mask, in_use_bit, gen_add,
//!   freelist_head, freelist_tail, descriptor, flags
//!
//! Record i (stride bytes, from the packed descriptor):
//!   handle word (4B) at `handle_offset`, plus optional payload bytes
//! ```
//!
//! # Handles
//!
//! A 32-bit word packing `in_use | userflags | generation | index` (or the
//! alternate bit order - see [`crate::bits`]). A handle is valid when:
//! - `index(h) < capacity`
//! - `h & in_use_bit != 0`
//! - the word stored at slot `index(h)` equals `h` bit-for-bit
//!
//! # Operations
//!
//! - **Acquire**: pop a slot from the freelist (LIFO top, FIFO front, or a
//!   lock-free CAS pop), bump its generation, mark it in-use.
//! - **Release**: validate the handle, clear its `in_use` bit, splice the
//!   slot back into the freelist.
//!
//! # Invariants
//!
//! - `size <= capacity` for LIFO, `size <= capacity - 1` for FIFO and the
//!   lock-free LIFO (one slot is permanently set aside so the freelist is
//!   never driven to empty by bookkeeping alone).
//! - No acquired handle is ever `0`: the `in_use` bit is always set in a
//!   live handle, so the whole word can never be zero.
//! - When the generation field is at least 2 bits wide, it also never
//!   equals `0` or its own all-ones sentinel while live - see
//!   [`crate::bits::bump_generation`].

use core::sync::atomic::{AtomicU32, Ordering};

use crate::atomic;
use crate::bits::{
    self, DerivedLayout, InitError, InitFlags, Policy, RecordLayout, descriptor_handle_offset,
    descriptor_stride, descriptor_userdata_offset,
};

const MAGIC: u32 = 0x4833_4832; // "H3H2"

/// Internal-only flag bits, stored alongside the validated [`InitFlags`] in
/// the header. Kept out of the public bitmask so callers can't set them.
const NO_PAYLOAD_BIT: u32 = 1 << 4;

#[repr(C)]
pub(crate) struct Header {
    pub(crate) magic: u32,
    pub(crate) capacity: u32,
    pub(crate) capacity_rounded: u32,
    pub(crate) size: u32,
    pub(crate) capacity_mask: u32,
    pub(crate) generation_mask: u32,
    pub(crate) userflags_mask: u32,
    pub(crate) in_use_bit: u32,
    pub(crate) gen_add: u32,
    pub(crate) freelist_head: u32,
    pub(crate) freelist_tail: u32,
    pub(crate) descriptor: u32,
    pub(crate) flags: u32,
}

const HEADER_SIZE: usize = core::mem::size_of::<Header>();

/// Configuration for [`init`].
pub struct HandleConfig {
    pub max_handles: u32,
    pub userflag_bits: u32,
    pub record_layout: RecordLayout,
    pub flags: InitFlags,
}

/// Bytes required for `config`. `base` passed to [`init`] must point to a
/// region of at least this many bytes.
#[must_use]
pub fn layout_size(config: &HandleConfig) -> usize {
    let capacity_rounded = config.max_handles.max(1).next_power_of_two() as usize;
    let stride = match config.record_layout {
        RecordLayout::NoPayload => 4,
        RecordLayout::NonInline {
            handle_area_size,
            payload_size,
        } => (handle_area_size + payload_size) as usize,
        RecordLayout::Inline { record_size, .. } => record_size as usize,
    };
    HEADER_SIZE + capacity_rounded * stride
}

/// Required base alignment, in bytes.
#[must_use]
pub const fn alignment() -> usize {
    4
}

#[inline]
unsafe fn header(base: *const u8) -> &'static Header {
    unsafe { &*base.cast::<Header>() }
}

#[inline]
#[allow(clippy::mut_from_ref)]
unsafe fn header_mut(base: *mut u8) -> &'static mut Header {
    unsafe { &mut *base.cast::<Header>() }
}

#[inline]
fn decode_policy(h: &Header) -> Policy {
    let flags = InitFlags::from_bits_truncate(h.flags);
    bits::resolve_policy(flags).expect("header flags were validated at init")
}

/// Usable acquisitions before the pool reports full: `capacity` for serial
/// LIFO, `capacity - 1` for FIFO and the lock-free LIFO (see module docs).
#[inline]
fn usable_capacity(h: &Header, policy: Policy) -> u32 {
    match policy {
        Policy::Lifo => h.capacity,
        Policy::Fifo | Policy::ThreadSafeLifo => h.capacity - 1,
    }
}

#[inline]
unsafe fn record_ptr(base: *mut u8, index: u32, stride: u32) -> *mut u8 {
    unsafe { base.add(HEADER_SIZE + index as usize * stride as usize) }
}

#[inline]
unsafe fn slot_word_ptr(base: *mut u8, h: &Header, index: u32) -> *mut u32 {
    let stride = descriptor_stride(h.descriptor);
    let handle_offset = descriptor_handle_offset(h.descriptor);
    unsafe { record_ptr(base, index, stride).add(handle_offset as usize).cast::<u32>() }
}

#[inline]
unsafe fn read_slot(base: *mut u8, h: &Header, index: u32) -> u32 {
    unsafe { slot_word_ptr(base, h, index).read() }
}

#[inline]
unsafe fn write_slot(base: *mut u8, h: &Header, index: u32, word: u32) {
    unsafe { slot_word_ptr(base, h, index).write(word) }
}

/// Debug-only corruption check, in the spirit of `debug_validate_slotmap`.
#[inline]
fn debug_validate(base: *const u8) {
    #[cfg(debug_assertions)]
    unsafe {
        let h = header(base);
        debug_assert_eq!((base as usize) & 3, 0, "base must be 4-byte aligned");
        debug_assert_eq!(h.magic, MAGIC, "missing or corrupted handle allocator header");
        debug_assert!(
            h.size <= h.capacity,
            "size ({}) must not exceed capacity ({})",
            h.size,
            h.capacity
        );
    }
}

/// Initialize a handle allocator in caller-supplied memory.
///
/// # Safety
/// - `base` must point to at least `layout_size(config)` writable bytes.
/// - `base` must be 4-byte aligned.
/// - The memory must not be accessed concurrently during `init`.
///
/// # Errors
/// Returns the configuration problems found, without touching memory beyond
/// validating the request, if the config cannot be realized.
pub unsafe fn init(base: *mut u8, config: &HandleConfig) -> Result<(), InitError> {
    let flags = InitFlags::from_bits(config.flags.bits()).ok_or(InitError::INVALID_INPUT_FLAGS)?;
    let policy = bits::resolve_policy(flags)?;
    let alt_layout = flags.contains(InitFlags::DONT_USE_MSB_AS_IN_USE_BIT);
    let derived = bits::derive_layout(config.max_handles, config.userflag_bits, alt_layout)?;

    if matches!(policy, Policy::ThreadSafeLifo) && derived.capacity_rounded < 2 {
        return Err(InitError::CONFIGURATION_UNSUPPORTED);
    }

    let no_payload = matches!(config.record_layout, RecordLayout::NoPayload);
    let (stride, handle_offset, userdata_offset) =
        bits::resolve_record_layout(config.record_layout)?;

    unsafe {
        let h = header_mut(base);
        h.magic = MAGIC;
        h.capacity = derived.capacity;
        h.capacity_rounded = derived.capacity_rounded;
        h.size = 0;
        h.capacity_mask = derived.capacity_mask;
        h.generation_mask = derived.generation_mask;
        h.userflags_mask = derived.userflags_mask;
        h.in_use_bit = derived.in_use_bit;
        h.gen_add = derived.gen_add;
        h.descriptor = bits::pack_descriptor(stride, handle_offset, userdata_offset);
        h.flags = flags.bits() | if no_payload { NO_PAYLOAD_BIT } else { 0 };
        h.freelist_head = 0;
        h.freelist_tail = 0;
    }

    unsafe { reset(base) };
    Ok(())
}

/// Reset the allocator to its post-init state. All outstanding handles
/// become invalid (their generations are not replayed).
///
/// # Safety
/// `base` must point to a previously-`init`ed allocator.
pub unsafe fn reset(base: *mut u8) {
    unsafe {
        debug_validate(base);
        let h = header_mut(base);
        let policy = decode_policy(h);
        let gen_mask = h.generation_mask;
        h.size = 0;

        match policy {
            Policy::ThreadSafeLifo => {
                // Slot 0 is the permanent end-of-list sentinel and never
                // enters the chain.
                write_slot(base, h, 0, gen_mask);
                for i in 1..h.capacity {
                    let next = if i + 1 == h.capacity { 0 } else { i + 1 };
                    write_slot(base, h, i, gen_mask | next);
                }
                h.freelist_head = atomic::pack(1, 0, h.capacity_mask.count_ones());
            }
            Policy::Lifo | Policy::Fifo => {
                for i in 0..h.capacity {
                    let next = if i + 1 == h.capacity { 0 } else { i + 1 };
                    write_slot(base, h, i, gen_mask | next);
                }
                h.freelist_head = 0;
                h.freelist_tail = h.capacity - 1;
            }
        }
    }
}

/// Usable handle count (`capacity` passed to `init`, minus one for FIFO and
/// the lock-free LIFO).
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn capacity(base: *const u8) -> u32 {
    unsafe {
        let h = header(base);
        usable_capacity(h, decode_policy(h))
    }
}

/// Current number of live handles.
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn len(base: *const u8) -> u32 {
    unsafe {
        if matches!(decode_policy(header(base)), Policy::ThreadSafeLifo) {
            AtomicU32::from_ptr(core::ptr::addr_of!((*base.cast::<Header>()).size).cast_mut())
                .load(Ordering::Relaxed)
        } else {
            header(base).size
        }
    }
}

/// Acquire a handle with userflags `0`.
///
/// # Safety
/// `base` must point to an initialized allocator; serial policies require
/// the caller to serialize access.
pub unsafe fn acquire(base: *mut u8) -> Option<(u32, u32)> {
    unsafe { acquire_userflags(base, 0) }
}

/// Acquire a handle, stamping `userflags` (masked to the configured width)
/// into it.
///
/// # Safety
/// `base` must point to an initialized allocator; serial policies require
/// the caller to serialize access. The lock-free LIFO may be called
/// concurrently from any number of threads.
pub unsafe fn acquire_userflags(base: *mut u8, userflags: u32) -> Option<(u32, u32)> {
    unsafe {
        debug_validate(base);
        let policy = decode_policy(header(base));
        if matches!(policy, Policy::ThreadSafeLifo) {
            return atomic::acquire(base, userflags);
        }

        let h = header_mut(base);
        let uf = userflags & h.userflags_mask;

        if h.size == usable_capacity(h, policy) {
            return None;
        }

        let i = h.freelist_head;
        let w = read_slot(base, h, i);
        let next = w & h.capacity_mask;

        let derived_for_bump = bump_params(h);
        let new_gen = bits::bump_generation(w, &derived_for_bump);
        let handle = uf | new_gen | h.in_use_bit | i;
        write_slot(base, h, i, handle);

        match policy {
            Policy::Lifo => h.freelist_head = next,
            Policy::Fifo => h.freelist_head = next,
            Policy::ThreadSafeLifo => unreachable!("handled above"),
        }
        h.size += 1;

        Some((i, handle))
    }
}

/// Release a handle, returning its sparse index, or `None` if it was
/// already invalid (double-free, wrong allocator, or stale generation).
///
/// # Safety
/// `base` must point to an initialized allocator; serial policies require
/// the caller to serialize access. The lock-free LIFO may be called
/// concurrently from any number of threads.
pub unsafe fn release(base: *mut u8, handle: u32) -> Option<u32> {
    unsafe {
        debug_validate(base);
        let policy = decode_policy(header(base));
        if matches!(policy, Policy::ThreadSafeLifo) {
            return atomic::release(base, handle);
        }

        let h = header_mut(base);
        let i = handle & h.capacity_mask;
        if i >= h.capacity {
            return None;
        }
        if read_slot(base, h, i) != handle || handle & h.in_use_bit == 0 {
            return None;
        }

        let preserved_generation = handle & h.generation_mask;

        match policy {
            Policy::Lifo => {
                write_slot(base, h, i, preserved_generation | h.freelist_head);
                h.freelist_head = i;
            }
            Policy::Fifo => {
                write_slot(base, h, i, preserved_generation);
                let tail = h.freelist_tail;
                let tail_word = read_slot(base, h, tail);
                write_slot(base, h, tail, (tail_word & h.generation_mask) | i);
                h.freelist_tail = i;
            }
            Policy::ThreadSafeLifo => unreachable!("handled above"),
        }
        h.size -= 1;

        Some(i)
    }
}

/// Whether `handle` currently refers to a live slot.
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn valid(base: *const u8, handle: u32) -> bool {
    unsafe {
        let h = header(base);
        let i = handle & h.capacity_mask;
        i < h.capacity && handle & h.in_use_bit != 0 && read_slot(base.cast_mut(), h, i) == handle
    }
}

/// Whether the `in_use` bit is set in `handle` - a cheap check using only
/// the bits of `handle` itself, with no memory read.
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn in_use(base: *const u8, handle: u32) -> bool {
    unsafe { handle & header(base).in_use_bit != 0 }
}

/// The stable sparse index encoded in `handle`.
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn index(base: *const u8, handle: u32) -> u32 {
    unsafe { handle & header(base).capacity_mask }
}

/// The userflags currently stored for `handle`'s slot (may differ from the
/// flags `handle` itself carries if they were changed via
/// [`userflags_set`]).
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn userflags(base: *const u8, handle: u32) -> u32 {
    unsafe {
        let h = header(base);
        let i = handle & h.capacity_mask;
        read_slot(base.cast_mut(), h, i) & h.userflags_mask
    }
}

/// Overwrite the userflags for `handle`'s slot, returning the old value.
/// Undefined if `handle` is stale.
///
/// # Safety
/// `base` must point to an initialized allocator; `handle` must be valid.
pub unsafe fn userflags_set(base: *mut u8, handle: u32, new_userflags: u32) -> u32 {
    unsafe {
        let h = header_mut(base);
        let i = handle & h.capacity_mask;
        let old = read_slot(base, h, i);
        let new_word = (old & !h.userflags_mask) | (new_userflags & h.userflags_mask);
        write_slot(base, h, i, new_word);
        old & h.userflags_mask
    }
}

/// Pointer to `handle`'s payload bytes, or `None` if this allocator has no
/// payload (`RecordLayout::NoPayload`).
///
/// # Safety
/// `base` must point to an initialized allocator; `handle` must be valid.
#[must_use]
pub unsafe fn userdata(base: *mut u8, handle: u32) -> Option<*mut u8> {
    unsafe {
        let h = header(base);
        if h.flags & NO_PAYLOAD_BIT != 0 {
            return None;
        }
        let i = handle & h.capacity_mask;
        let stride = descriptor_stride(h.descriptor);
        let userdata_offset = descriptor_userdata_offset(h.descriptor);
        Some(record_ptr(base, i, stride).add(userdata_offset as usize))
    }
}

#[inline]
fn bump_params(h: &Header) -> DerivedLayout {
    // `DerivedLayout` caches a handful of values also kept in the header;
    // the generation bit count isn't stored separately, only the mask, so
    // rederive it for `bump_generation`'s skip-logic threshold.
    let generation_bits = h.generation_mask.count_ones();
    let alt_layout = InitFlags::from_bits_truncate(h.flags).contains(InitFlags::DONT_USE_MSB_AS_IN_USE_BIT);
    DerivedLayout {
        capacity: h.capacity,
        capacity_rounded: h.capacity_rounded,
        capacity_mask: h.capacity_mask,
        index_bits: h.capacity_mask.count_ones(),
        generation_bits,
        generation_mask: h.generation_mask,
        userflags_mask: h.userflags_mask,
        in_use_bit: h.in_use_bit,
        gen_add: h.gen_add,
        alt_layout,
    }
}

/// Pointer to record `index`'s userdata region, regardless of whether that
/// slot is currently acquired. Used by [`crate::dense`] to maintain its
/// `dense_index`/`sparse_index` side tables, which span every record the
/// same way `sparse_set`'s arrays do, live or free.
///
/// # Safety
/// `base` must point to an initialized allocator with a payload; `index`
/// must be `< capacity_rounded`.
pub(crate) unsafe fn raw_userdata_ptr(base: *mut u8, index: u32) -> *mut u8 {
    unsafe {
        let h = header(base);
        let stride = descriptor_stride(h.descriptor);
        let userdata_offset = descriptor_userdata_offset(h.descriptor);
        record_ptr(base, index, stride).add(userdata_offset as usize)
    }
}

pub(crate) mod internal {
    //! Plumbing shared with [`crate::atomic`] and [`crate::dense`] so they
    //! can reuse this module's header/slot access without duplicating the
    //! pointer arithmetic.
    pub use super::{
        Header, HEADER_SIZE, debug_validate, decode_policy, header, header_mut, raw_userdata_ptr,
        read_slot, record_ptr, slot_word_ptr, usable_capacity, write_slot,
    };
}
