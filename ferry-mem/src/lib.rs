//! Ferry memory model
//!
//! Device-safe primitives shared between host marshalling code and compute
//! kernels: fixed-size memory units, the bit-packed far/near memory-reference
//! codec, typed scalar/vector access to unit buffers, and IEEE binary16
//! conversion.
//!
//! Everything in this crate is a synchronous, deterministic transformation
//! over caller-supplied memory. Precondition violations are checked with
//! `debug_assert!` only; release builds are the assertion-free "device"
//! compilation mode.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)] // Allowed only where raw typed access is inherent, with safety proofs

pub mod access;
pub mod bits;
pub mod float16;
pub mod refs;
pub mod unit;

pub use crate::refs::{
    memory_at, MemoryRef, MemoryRefHalf, MemoryRefQuarter, RefFormat, RefInt,
};
pub use crate::unit::{MemoryUnit, MemoryUnitDouble};
