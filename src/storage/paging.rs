//! # Block files
//!
//! This module persists blocks of records as individual files inside a storage namespace.

#![doc = include_str!("../../doc/block_format.md")]

use super::vfs::{self, File as _};
use super::BlockNumber;
use crate::encoding::record::{self, Record};
use crate::error::{Error, Result};
use std::borrow::Borrow;
use std::collections;
use std::marker;
use std::process;
use std::sync::atomic;
use tracing::{debug, warn};

const DELIMITER: &str = "data";
const LOCK_SUFFIX: &str = ".lock";

static NEXT_TOKEN: atomic::AtomicU64 = atomic::AtomicU64::new(0);

/// Returns a namespace token that no other call in any running process returns.
pub fn unique_token() -> String {
  format!("{}-{}", process::id(), NEXT_TOKEN.fetch_add(1, atomic::Ordering::Relaxed))
}

/// # Block store
///
/// Reads and writes whole blocks under their block numbers. A block whose file does not exist is
/// simply empty.
///
/// Opening a store takes an exclusive lock on the namespace, released by [`BlockStore::close`]
/// or on drop.
pub struct BlockStore<R: Record, F: vfs::FileSystem> {
  fs: F,
  root: <F::Path as ToOwned>::Owned,
  prefix: String,
  lock: Option<F::File>,
  _record: marker::PhantomData<R>,
}

impl<R: Record, F: vfs::FileSystem> BlockStore<R, F> {
  /// Opens the namespace `token` inside the directory `root`.
  pub fn open(mut fs: F, root: &F::Path, token: &str) -> Result<Self> {
    if R::SIZE == 0 {
      return Err(Error::Config("records must occupy at least one byte".to_owned()));
    }
    let prefix = format!("{token}{DELIMITER}");
    let lock_name = format!("{prefix}{LOCK_SUFFIX}");
    let lock_path = fs.join(root, &lock_name);
    let mut lock = fs.open(lock_path.borrow()).map_err(|err| Error::storage(&lock_name, err))?;
    lock
      .try_lock()
      .map_err(|err| Error::NamespaceLocked { namespace: prefix.clone(), detail: err.to_string() })?;
    debug!(namespace = %prefix, "opened block namespace");
    Ok(BlockStore { fs, root: root.to_owned(), prefix, lock: Some(lock), _record: marker::PhantomData })
  }

  /// Returns the common prefix of every file name in this namespace.
  pub fn namespace(&self) -> &str {
    &self.prefix
  }

  /// Returns the file name of block `number`.
  pub fn block_name(&self, number: BlockNumber) -> String {
    format!("{}{number}", self.prefix)
  }

  fn block_path(&self, name: &str) -> <F::Path as ToOwned>::Owned {
    self.fs.join(self.root.borrow(), name)
  }

  fn open_block(&mut self, number: BlockNumber) -> Result<(String, F::File)> {
    let name = self.block_name(number);
    let path = self.block_path(&name);
    let file = self.fs.open(path.borrow()).map_err(|err| Error::storage(&name, err))?;
    Ok((name, file))
  }

  fn read_bytes(name: &str, file: &mut F::File) -> Result<Vec<u8>> {
    let bytes = file.read_all().map_err(|err| Error::storage(name, err))?;
    if bytes.len() % R::SIZE != 0 {
      return Err(Error::Corrupt { path: name.to_owned(), len: bytes.len() as u64, record_size: R::SIZE });
    }
    Ok(bytes)
  }

  fn write_bytes(name: &str, file: &mut F::File, bytes: &[u8]) -> Result<()> {
    file.write_at(0, bytes).map_err(|err| Error::storage(name, err))?;
    file.set_size(bytes.len() as u64).map_err(|err| Error::storage(name, err))
  }

  /// Returns the number of whole records in `file`.
  fn record_count(name: &str, file: &mut F::File) -> Result<u64> {
    let size = file.size().map_err(|err| Error::storage(name, err))?;
    if size % R::SIZE as u64 != 0 {
      return Err(Error::Corrupt { path: name.to_owned(), len: size, record_size: R::SIZE });
    }
    Ok(size / R::SIZE as u64)
  }

  /// Returns whether block `number` has a file.
  pub fn contains(&mut self, number: BlockNumber) -> Result<bool> {
    let name = self.block_name(number);
    let path = self.block_path(&name);
    self.fs.exists(path.borrow()).map_err(|err| Error::storage(&name, err))
  }

  /// Reads every record of block `number`. An absent block is empty, and stays absent.
  pub fn load(&mut self, number: BlockNumber) -> Result<collections::VecDeque<R>> {
    if !self.contains(number)? {
      return Ok(collections::VecDeque::new());
    }
    let (name, mut file) = self.open_block(number)?;
    let bytes = Self::read_bytes(&name, &mut file)?;
    let records = record::decode_block(&bytes).ok_or_else(|| Error::Corrupt {
      path: name.clone(),
      len: bytes.len() as u64,
      record_size: R::SIZE,
    })?;
    debug!(block = %name, records = records.len(), "loaded block");
    Ok(records)
  }

  /// Replaces the contents of block `number` with `records`.
  pub fn save(&mut self, number: BlockNumber, records: &collections::VecDeque<R>) -> Result<()> {
    let (name, mut file) = self.open_block(number)?;
    Self::write_bytes(&name, &mut file, &record::encode_block(records))?;
    debug!(block = %name, records = records.len(), "saved block");
    Ok(())
  }

  /// Deletes the file of block `number`. Returns whether it existed.
  pub fn delete(&mut self, number: BlockNumber) -> Result<bool> {
    let name = self.block_name(number);
    let path = self.block_path(&name);
    let existed = self.fs.delete(path.borrow()).map_err(|err| Error::storage(&name, err))?;
    if existed {
      debug!(block = %name, "deleted block");
    }
    Ok(existed)
  }

  /// Adds `record` after the last record of block `number`.
  pub fn append(&mut self, number: BlockNumber, record: &R) -> Result<()> {
    let (name, mut file) = self.open_block(number)?;
    let present = Self::record_count(&name, &mut file)?;
    let mut bytes = vec![0; R::SIZE];
    record.encode(&mut bytes);
    file.write_at(present * R::SIZE as u64, &bytes).map_err(|err| Error::storage(&name, err))
  }

  /// Removes up to `count` records from the start of block `number`. Returns how many were
  /// removed.
  pub fn truncate_front(&mut self, number: BlockNumber, count: usize) -> Result<usize> {
    if !self.contains(number)? {
      return Ok(0);
    }
    let (name, mut file) = self.open_block(number)?;
    let bytes = Self::read_bytes(&name, &mut file)?;
    let removed = count.min(bytes.len() / R::SIZE);
    Self::write_bytes(&name, &mut file, &bytes[removed * R::SIZE..])?;
    Ok(removed)
  }

  /// Removes up to `count` records from the end of block `number`. Returns how many were removed.
  pub fn truncate_back(&mut self, number: BlockNumber, count: usize) -> Result<usize> {
    if !self.contains(number)? {
      return Ok(0);
    }
    let (name, mut file) = self.open_block(number)?;
    let present = Self::record_count(&name, &mut file)?;
    let removed = present.min(count as u64);
    file.set_size((present - removed) * R::SIZE as u64).map_err(|err| Error::storage(&name, err))?;
    Ok(removed as usize)
  }

  /// Returns the numbers of all blocks that have a file, in ascending order.
  pub fn blocks(&mut self) -> Result<Vec<BlockNumber>> {
    let names = self.fs.list(self.root.borrow()).map_err(|err| Error::storage(&self.prefix, err))?;
    let mut numbers: Vec<BlockNumber> = names
      .iter()
      .filter_map(|name| name.strip_prefix(self.prefix.as_str()))
      .filter_map(|suffix| suffix.parse().ok())
      .collect();
    numbers.sort_unstable();
    Ok(numbers)
  }

  /// Releases the namespace lock and deletes the lock file.
  pub fn close(&mut self) -> Result<()> {
    let Some(mut lock) = self.lock.take() else {
      return Ok(());
    };
    let lock_name = format!("{}{LOCK_SUFFIX}", self.prefix);
    lock.unlock().map_err(|err| Error::storage(&lock_name, err))?;
    drop(lock);
    let path = self.block_path(&lock_name);
    self.fs.delete(path.borrow()).map_err(|err| Error::storage(&lock_name, err))?;
    debug!(namespace = %self.prefix, "closed block namespace");
    Ok(())
  }
}

impl<R: Record, F: vfs::FileSystem> Drop for BlockStore<R, F> {
  fn drop(&mut self) {
    if let Err(err) = self.close() {
      warn!(namespace = %self.prefix, error = %err, "failed to close block namespace");
    }
  }
}
