//! Kernel-argument marshalling
//!
//! Host-side orchestration that prepares the memory a compute kernel runs
//! against: pluggable allocation/mapping operations, the construction of
//! relocatable segmented memory images out of parsed data-storage
//! containers, and the alloc/copy/free lifecycles of the two kernel
//! argument families (computation state and computation parameters).
//!
//! Every multi-step constructor here tears down exactly the steps it
//! completed when a later step fails; handle arrays null their entries on
//! free so a double free is structurally visible rather than silent.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)] // Allowed only for raw device-buffer access, with safety proofs

pub mod error;
pub mod kargs;
pub mod ops;
pub mod segmented;

pub use crate::error::{KargsError, Result};
pub use crate::kargs::{CparamPtrs, CparamSizes, CstatePtrs, CstateSizes};
pub use crate::ops::{map_copy_unmap, HostMemory, MemoryOperations};
pub use crate::segmented::{
    SegmentedMemory, SegmentedMemoryLayout, SegmentedMemoryPtrs, SegmentedMemorySizes,
    SymbolLocation,
};
