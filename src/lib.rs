//! Fixed-capacity 32-bit handle allocators over caller-owned memory.
//!
//! ```text
//! handle      - single allocator: FIFO / LIFO / lock-free LIFO reuse,
//!               bit-packed handles, arbitrary interleaved payload.
//! atomic      - the lock-free CAS freelist backing handle's thread-safe
//!               LIFO policy.
//! dense       - handle, augmented with a dense_index/sparse_index side
//!               table so callers can keep an external packed array in
//!               sync as handles come and go.
//! sparse_set  - the minimal dense<->sparse index-mapping primitive dense
//!               is built from; also usable standalone as a LIFO allocator.
//! bits        - shared bit-packing: handle field layout, descriptor
//!               packing, init flags/errors.
//! ```
//!
//! Every allocator here owns no memory: callers allocate a byte buffer
//! (`layout_size`), hand it to `init`, and keep it alive for as long as the
//! allocator is used. There is no dynamic resizing; capacity is fixed at
//! `init` time. All operations fail in-band (`Option`/`Result`), never by
//! panicking in release builds - `debug_assert!`-gated checks catch
//! corruption and misuse in debug builds only.
#![cfg_attr(not(test), no_std)]

mod atomic;
pub mod bits;
pub mod dense;
pub mod handle;
pub mod sparse_set;

pub use bits::{InitError, InitFlags, Policy, RecordLayout};
pub use handle::HandleConfig;
