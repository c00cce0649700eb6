//! Binary data-storage container
//!
//! A container is a header followed by four tables (strings, sections,
//! symbols, properties) and their contents blobs. Sections carry the raw
//! bytes that become memory segments, symbols name positions inside
//! sections, and properties are small named values. The whole format uses
//! native-endian 32-bit fields and is meant for local files and shared
//! memory, not for interchange between hosts.
//!
//! Headers are fully validated before any derived offset is trusted; a
//! parse either yields a complete [`DataStorage`] or an error, never a
//! partial one.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod error;
pub mod format;
pub mod storage;

pub use crate::error::{Result, StorageError};
pub use crate::format::FileHeader;
pub use crate::storage::{DataStorage, FormatFilter, Property, Section, Symbol};
