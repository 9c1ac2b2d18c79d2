//! # Errors
//!
//! Every fallible operation in this crate returns [`Error`]. File system errors are generic over
//! the [`FileSystem`](crate::storage::vfs::FileSystem) in use, so they are captured as text
//! together with the block file they concern.
//!
//! Releasing a block that is no longer cached is a bug in the caller, not an error, and panics.

use std::fmt;

/// Error type for deque, cache and block store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The file system failed to read, write, delete or lock a file.
  #[error("storage error on {path}: {detail}")]
  Storage { path: String, detail: String },

  /// A block file does not hold a whole number of records.
  #[error("block {path} holds {len} bytes, which is not a multiple of the {record_size}-byte record size")]
  Corrupt { path: String, len: u64, record_size: usize },

  /// A block file holds more records than a block may contain.
  #[error("block {path} holds {records} records, more than the block capacity of {capacity}")]
  Overfull { path: String, records: usize, capacity: usize },

  /// Another deque already owns the storage namespace.
  #[error("namespace {namespace} is owned by another deque: {detail}")]
  NamespaceLocked { namespace: String, detail: String },

  /// The deque holds no records.
  #[error("deque is empty")]
  Empty,

  /// The configuration cannot describe a usable deque.
  #[error("invalid configuration: {0}")]
  Config(String),
}

impl Error {
  pub(crate) fn storage(path: impl Into<String>, detail: impl fmt::Display) -> Self {
    Error::Storage { path: path.into(), detail: detail.to_string() }
  }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
