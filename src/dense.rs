//! Dense/sparse handle allocator: a [`crate::handle`] allocator augmented
//! with a `dense_index`/`sparse_index` side table per record, so callers can
//! keep an external packed array (of their own payload) in lockstep with the
//! set of live handles.
//!
//! A `dense` record is `[handle word | dense_index: u32 | sparse_index: u32
//! | caller payload…]`, all still addressed through `handle`'s own stride
//! machinery - `dense` never moves a byte of its own record array. What it
//! tracks is the *permutation* describing where each live handle would sit
//! if the records were packed, and reports the single swap needed to keep
//! an external dense array in sync on every `release` (the byte motion
//! itself is the caller's responsibility, as they own that array).

use crate::bits::{InitError, InitFlags, RecordLayout};
use crate::handle::{self, internal::raw_userdata_ptr};

const INVALID_INDEX: u32 = u32::MAX;
const BOOKKEEPING_SIZE: u32 = 8; // dense_index: u32, sparse_index: u32

/// Configuration for [`init`].
pub struct DenseConfig {
    pub max_handles: u32,
    pub userflag_bits: u32,
    /// Bytes of caller payload per record, beyond this module's own
    /// bookkeeping fields. May be `0`.
    pub payload_size: u32,
    pub flags: InitFlags,
}

fn to_handle_config(config: &DenseConfig) -> handle::HandleConfig {
    handle::HandleConfig {
        max_handles: config.max_handles,
        userflag_bits: config.userflag_bits,
        record_layout: RecordLayout::NonInline {
            handle_area_size: 4,
            payload_size: BOOKKEEPING_SIZE + config.payload_size,
        },
        flags: config.flags,
    }
}

/// Bytes required for `config`.
#[must_use]
pub fn layout_size(config: &DenseConfig) -> usize {
    handle::layout_size(&to_handle_config(config))
}

/// Initialize a dense/sparse allocator in caller-supplied memory.
///
/// # Safety
/// Same preconditions as [`handle::init`].
///
/// # Errors
/// See [`handle::init`].
pub unsafe fn init(base: *mut u8, config: &DenseConfig) -> Result<(), InitError> {
    unsafe { handle::init(base, &to_handle_config(config)) }
}

/// # Safety
/// `base` must point to a previously-`init`ed allocator.
pub unsafe fn reset(base: *mut u8) {
    unsafe { handle::reset(base) }
}

/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn capacity(base: *const u8) -> u32 {
    unsafe { handle::capacity(base) }
}

/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn len(base: *const u8) -> u32 {
    unsafe { handle::len(base) }
}

#[inline]
unsafe fn dense_index_ptr(base: *mut u8, record_index: u32) -> *mut u32 {
    unsafe { raw_userdata_ptr(base, record_index).cast::<u32>() }
}

#[inline]
unsafe fn sparse_index_ptr(base: *mut u8, record_index: u32) -> *mut u32 {
    unsafe { raw_userdata_ptr(base, record_index).cast::<u32>().add(1) }
}

/// Result of a successful [`acquire`]/[`acquire_userflags`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquired {
    /// The stable sparse index, i.e. `handle::index(handle)`.
    pub index: u32,
    pub handle: u32,
    /// Position in the conceptual packed ordering; changes over time.
    pub dense_index: u32,
}

/// # Safety
/// `base` must point to an initialized allocator; serial policies require
/// the caller to serialize access.
pub unsafe fn acquire(base: *mut u8) -> Option<Acquired> {
    unsafe { acquire_userflags(base, 0) }
}

/// # Safety
/// `base` must point to an initialized allocator; serial policies require
/// the caller to serialize access.
pub unsafe fn acquire_userflags(base: *mut u8, userflags: u32) -> Option<Acquired> {
    unsafe {
        let (s, h) = handle::acquire_userflags(base, userflags)?;
        let d = handle::len(base) - 1;
        dense_index_ptr(base, s).write(d);
        sparse_index_ptr(base, d).write(s);
        Some(Acquired {
            index: s,
            handle: h,
            dense_index: d,
        })
    }
}

/// Result of a successful [`release`]: the single swap the caller must
/// mirror in any external packed array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Released {
    /// The sparse index that was freed.
    pub index: u32,
    /// Dense position the back element moved from.
    pub move_from: u32,
    /// Dense position that now needs the element from `move_from` (equal
    /// to `move_from` when `is_back_index` is `true`, i.e. nothing moves).
    pub move_to: u32,
    pub is_back_index: bool,
}

/// # Safety
/// `base` must point to an initialized allocator; serial policies require
/// the caller to serialize access.
pub unsafe fn release(base: *mut u8, handle_word: u32) -> Option<Released> {
    unsafe {
        let s = handle::release(base, handle_word)?;
        let size_after = handle::len(base);

        let d_removed = dense_index_ptr(base, s).read();
        let is_back = d_removed == size_after;

        if !is_back {
            let back_s = sparse_index_ptr(base, size_after).read();
            dense_index_ptr(base, back_s).write(d_removed);
            sparse_index_ptr(base, d_removed).write(back_s);
        }
        dense_index_ptr(base, s).write(INVALID_INDEX);

        Some(Released {
            index: s,
            move_from: size_after,
            move_to: d_removed,
            is_back_index: is_back,
        })
    }
}

/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn valid(base: *const u8, handle_word: u32) -> bool {
    unsafe { handle::valid(base, handle_word) }
}

/// The packed position of `handle_word`, or `None` if stale.
///
/// # Safety
/// `base` must point to an initialized allocator.
#[must_use]
pub unsafe fn dense_index(base: *mut u8, handle_word: u32) -> Option<u32> {
    unsafe {
        if !handle::valid(base, handle_word) {
            return None;
        }
        let s = handle::index(base, handle_word);
        match dense_index_ptr(base, s).read() {
            INVALID_INDEX => None,
            d => Some(d),
        }
    }
}

/// Pointer to `handle_word`'s caller payload bytes (after this module's own
/// bookkeeping fields), or `None` if `payload_size` was configured as `0`.
///
/// # Safety
/// `base` must point to an initialized allocator; `handle_word` must be
/// valid.
#[must_use]
pub unsafe fn payload(base: *mut u8, handle_word: u32) -> Option<*mut u8> {
    unsafe { handle::userdata(base, handle_word).map(|p| p.add(BOOKKEEPING_SIZE as usize)) }
}
