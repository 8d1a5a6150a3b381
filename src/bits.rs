//! Bit-packing helpers shared by the allocator layers: handle-word field
//! layout, the record descriptor, and the init-time flag/error bitmasks.
//!
//! The field layout is ABI-independent and must be reproduced verbatim by
//! any caller that reads handle bits directly, so the arithmetic here is
//! kept in one place rather than re-derived per module.

use bitflags::bitflags;

bitflags! {
    /// Policy and layout selection passed to `init`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InitFlags: u32 {
        /// Reuse freed slots most-recently-freed-first.
        const LIFO = 1 << 0;
        /// Reuse freed slots in the order they were freed.
        const FIFO = 1 << 1;
        /// Use the lock-free CAS freelist. Only valid combined with `LIFO`.
        const THREADSAFE = 1 << 2;
        /// Put the `in_use` bit below userflags/generation instead of at the MSB.
        const DONT_USE_MSB_AS_IN_USE_BIT = 1 << 3;
    }
}

bitflags! {
    /// Configuration problems reported by `init`. Nonzero means the
    /// allocator was not initialized and must not be used.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct InitError: u32 {
        /// The requested capacity and userflag width leave no room for a
        /// generation field (or overflow the 32-bit word entirely).
        const CONFIGURATION_UNSUPPORTED = 1 << 0;
        /// `THREADSAFE` was requested together with `FIFO`.
        const THREADSAFE_UNSUPPORTED = 1 << 1;
        /// Payload (userdata) size does not fit the record stride's 16 bits.
        const USERDATA_TOO_BIG = 1 << 2;
        /// Inline handle offset exceeds 255.
        const HANDLE_OFFSET_TOO_BIG = 1 << 3;
        /// Non-inline handle area size exceeds 255.
        const HANDLE_NON_INLINE_SIZE_TOO_BIG = 1 << 4;
        /// `flags` contains bits outside `InitFlags`, or a nonsensical
        /// combination (e.g. both `LIFO` and `FIFO`).
        const INVALID_INPUT_FLAGS = 1 << 5;
    }
}

/// How payload and handle share a record's bytes. See the crate-level docs
/// for the three layouts this maps onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordLayout {
    /// Records are just the 4-byte handle word.
    NoPayload,
    /// `[handle | payload]`; `handle_area_size` is normally 4 but may be
    /// padded by the caller for payload alignment.
    NonInline {
        handle_area_size: u32,
        payload_size: u32,
    },
    /// The handle lives inside the payload struct at `handle_offset`;
    /// records are exactly `record_size` bytes.
    Inline {
        handle_offset: u32,
        record_size: u32,
    },
}

/// Run-time reuse policy, decoded once from `InitFlags` and cached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    Lifo,
    Fifo,
    ThreadSafeLifo,
}

/// The derived, immutable per-allocator constants: everything `init`
/// computes from `(capacity, userflag_bits, alt_layout)` before it ever
/// touches memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedLayout {
    pub capacity: u32,
    pub capacity_rounded: u32,
    pub capacity_mask: u32,
    pub index_bits: u32,
    pub generation_bits: u32,
    pub generation_mask: u32,
    pub userflags_mask: u32,
    pub in_use_bit: u32,
    pub gen_add: u32,
    pub alt_layout: bool,
}

/// Derive the handle bit layout for `capacity` slots and `userflag_bits`
/// userflag bits, under the chosen variant. Pure function, no I/O -
/// reusable standalone and from `handle::init`.
pub fn derive_layout(
    capacity: u32,
    userflag_bits: u32,
    alt_layout: bool,
) -> Result<DerivedLayout, InitError> {
    if capacity == 0 {
        return Err(InitError::CONFIGURATION_UNSUPPORTED);
    }

    let capacity_rounded = capacity.next_power_of_two();
    let index_bits = capacity_rounded.trailing_zeros();

    // +1 reserves the in_use bit.
    let used_bits = index_bits + userflag_bits + 1;
    if used_bits > 32 {
        return Err(InitError::CONFIGURATION_UNSUPPORTED);
    }
    let generation_bits = 32 - used_bits;

    let capacity_mask = capacity_rounded - 1;
    let userflags_mask = mask(userflag_bits);
    let generation_mask_unshifted = mask(generation_bits);

    let (in_use_bit, generation_mask, userflags_mask, gen_add) = if alt_layout {
        // userflags(K) | generation(G) | in_use(1) | index(S)
        let in_use_bit = 1u32 << index_bits;
        let generation_mask = generation_mask_unshifted << (index_bits + 1);
        let userflags_mask = userflags_mask << (index_bits + 1 + generation_bits);
        let gen_add = capacity_rounded << 1;
        (in_use_bit, generation_mask, userflags_mask, gen_add)
    } else {
        // in_use(1) | userflags(K) | generation(G) | index(S)
        let in_use_bit = 1u32 << 31;
        let generation_mask = generation_mask_unshifted << index_bits;
        let userflags_mask = userflags_mask << (index_bits + generation_bits);
        let gen_add = capacity_rounded;
        (in_use_bit, generation_mask, userflags_mask, gen_add)
    };

    Ok(DerivedLayout {
        capacity,
        capacity_rounded,
        capacity_mask,
        index_bits,
        generation_bits,
        generation_mask,
        userflags_mask,
        in_use_bit,
        gen_add,
        alt_layout,
    })
}

#[inline]
const fn mask(bits: u32) -> u32 {
    if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 }
}

/// Advance a stored generation sub-field by one reuse. When
/// `generation_bits >= 2`, the values `0` and `generation_mask` (the
/// pre-first-use sentinel) are skipped so that no live handle's generation
/// field is ever all-zero or all-one; this is what keeps a fully-formed
/// handle word from ever equalling `0` or `0xFFFF_FFFF` (see crate docs).
#[inline]
pub fn bump_generation(current_word: u32, layout: &DerivedLayout) -> u32 {
    let mut new_gen = current_word.wrapping_add(layout.gen_add) & layout.generation_mask;
    if layout.generation_bits >= 2 {
        while new_gen == 0 || new_gen == layout.generation_mask {
            new_gen = new_gen.wrapping_add(layout.gen_add) & layout.generation_mask;
        }
    }
    new_gen
}

/// Pack stride/handle-offset/userdata-offset into the 32-bit record
/// descriptor: `stride | handle_offset<<16 | userdata_offset<<24`.
#[inline]
pub const fn pack_descriptor(stride: u16, handle_offset: u8, userdata_offset: u8) -> u32 {
    (stride as u32) | ((handle_offset as u32) << 16) | ((userdata_offset as u32) << 24)
}

#[inline]
pub const fn descriptor_stride(descriptor: u32) -> u32 {
    descriptor & 0xFFFF
}

#[inline]
pub const fn descriptor_handle_offset(descriptor: u32) -> u32 {
    (descriptor >> 16) & 0xFF
}

#[inline]
pub const fn descriptor_userdata_offset(descriptor: u32) -> u32 {
    (descriptor >> 24) & 0xFF
}

/// Resolve a [`RecordLayout`] into `(stride, handle_offset, userdata_offset)`
/// and validate it against the packed descriptor's field widths.
pub fn resolve_record_layout(layout: RecordLayout) -> Result<(u16, u8, u8), InitError> {
    match layout {
        RecordLayout::NoPayload => Ok((4, 0, 0)),
        RecordLayout::NonInline {
            handle_area_size,
            payload_size,
        } => {
            if handle_area_size > 255 {
                return Err(InitError::HANDLE_NON_INLINE_SIZE_TOO_BIG);
            }
            let stride = handle_area_size + payload_size;
            if stride > u16::MAX as u32 {
                return Err(InitError::USERDATA_TOO_BIG);
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok((stride as u16, 0, handle_area_size as u8))
        }
        RecordLayout::Inline {
            handle_offset,
            record_size,
        } => {
            if handle_offset > 255 {
                return Err(InitError::HANDLE_OFFSET_TOO_BIG);
            }
            if record_size > u16::MAX as u32 {
                return Err(InitError::USERDATA_TOO_BIG);
            }
            if handle_offset + 4 > record_size {
                return Err(InitError::CONFIGURATION_UNSUPPORTED);
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok((record_size as u16, handle_offset as u8, 0))
        }
    }
}

/// Decode the reuse policy from validated `InitFlags`.
///
/// # Errors
/// Returns an error if the flag combination is unsupported or contains
/// unknown bits.
pub fn resolve_policy(flags: InitFlags) -> Result<Policy, InitError> {
    let lifo = flags.contains(InitFlags::LIFO);
    let fifo = flags.contains(InitFlags::FIFO);
    let threadsafe = flags.contains(InitFlags::THREADSAFE);

    if lifo == fifo {
        // Neither or both set: exactly one of LIFO/FIFO is required.
        return Err(InitError::INVALID_INPUT_FLAGS);
    }
    if threadsafe && fifo {
        return Err(InitError::THREADSAFE_UNSUPPORTED);
    }

    Ok(match (fifo, threadsafe) {
        (true, false) => Policy::Fifo,
        (false, true) => Policy::ThreadSafeLifo,
        (false, false) => Policy::Lifo,
        (true, true) => unreachable!("rejected above"),
    })
}
