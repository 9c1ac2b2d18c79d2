//! # Byte encodings
//!
//! Serialization of records into the bytes stored in block files.

pub mod record;
