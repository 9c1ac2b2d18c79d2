//! # Disk-backed deque
//!
//! [`Deque`] keeps its records in block files and holds in memory only the blocks at its two
//! ends, plus whatever blocks live [`Cursor`]s are positioned in. Pushes and pops touch the disk
//! only when an end crosses into a block that is not already cached.

mod cursor;
mod edge;

pub use cursor::{Cursor, Iter, Position};

use crate::config::Config;
use crate::encoding::record::Record;
use crate::error::{Error, Result};
use crate::storage::cache::BlockCache;
use crate::storage::paging::{self, BlockStore};
use crate::storage::vfs;
use crate::storage::ORIGIN;
use edge::{EdgeBuffers, Side};
use num_bigint::BigUint;
use num_traits::Zero;
use std::cell;
use std::path;
use tracing::{debug, warn};

/// # Disk-backed double-ended queue
///
/// Records are grouped into blocks of [`Deque::block_capacity`] records, each stored as one file
/// named after the deque's namespace inside the root directory. The length is unbounded and
/// reported as a [`BigUint`].
///
/// The deque owns its namespace: opening it removes leftovers of an earlier owner, and dropping
/// or [closing](Deque::close) it deletes every file it created. Cursors borrow the deque, so it
/// can neither be modified nor dropped while one is alive.
pub struct Deque<R: Record, F: vfs::FileSystem = vfs::StandardFileSystem> {
  cache: cell::RefCell<BlockCache<R, F>>,
  edges: EdgeBuffers,
  len: BigUint,
  closed: bool,
}

impl<R: Record> Deque<R> {
  /// Creates a deque with the default configuration in the directory `root`.
  pub fn create(root: &path::Path) -> Result<Self> {
    Self::with_config(vfs::StandardFileSystem, root, Config::default())
  }
}

impl<R: Record, F: vfs::FileSystem> Deque<R, F> {
  /// Creates a deque with the default configuration in the directory `root` of `fs`.
  pub fn new(fs: F, root: &F::Path) -> Result<Self> {
    Self::with_config(fs, root, Config::default())
  }

  /// Creates a deque in the directory `root` of `fs`.
  pub fn with_config(fs: F, root: &F::Path, config: Config) -> Result<Self> {
    let capacity = config.block_capacity(R::SIZE)?;
    let token = config.namespace.unwrap_or_else(paging::unique_token);
    let mut store = BlockStore::open(fs, root, &token)?;
    for number in store.blocks()? {
      store.delete(number)?;
    }
    let mut cache = BlockCache::new(store, capacity);
    let edges = EdgeBuffers::new(&mut cache, ORIGIN)?;
    debug!(namespace = %cache.store().namespace(), capacity, "created deque");
    Ok(Deque { cache: cell::RefCell::new(cache), edges, len: BigUint::zero(), closed: false })
  }

  /// Returns the number of records.
  pub fn len(&self) -> &BigUint {
    &self.len
  }

  /// Returns whether the deque holds no records.
  pub fn is_empty(&self) -> bool {
    self.len.is_zero()
  }

  /// Returns the number of records per block.
  pub fn block_capacity(&self) -> usize {
    self.cache.borrow().capacity()
  }

  /// Returns the prefix shared by the names of all files of this deque.
  pub fn namespace(&self) -> String {
    self.cache.borrow().store().namespace().to_owned()
  }

  /// Returns the number of blocks currently held in memory.
  pub fn cached_blocks(&self) -> usize {
    self.cache.borrow().len()
  }

  fn push(&mut self, side: Side, record: R) -> Result<()> {
    self.edges.push(self.cache.get_mut(), side, record)?;
    self.len += 1u32;
    Ok(())
  }

  fn pop(&mut self, side: Side) -> Result<R> {
    if self.is_empty() {
      return Err(Error::Empty);
    }
    let record = self.edges.pop(self.cache.get_mut(), side)?;
    self.len -= 1u32;
    Ok(record)
  }

  fn peek(&mut self, side: Side) -> Result<R> {
    if self.is_empty() {
      return Err(Error::Empty);
    }
    self.edges.peek(self.cache.get_mut(), side)
  }

  /// Adds a record before the first one.
  pub fn push_front(&mut self, record: R) -> Result<()> {
    self.push(Side::Front, record)
  }

  /// Adds a record after the last one.
  pub fn push_back(&mut self, record: R) -> Result<()> {
    self.push(Side::Back, record)
  }

  /// Removes and returns the first record, or fails with [`Error::Empty`].
  pub fn pop_front(&mut self) -> Result<R> {
    self.pop(Side::Front)
  }

  /// Removes and returns the last record, or fails with [`Error::Empty`].
  pub fn pop_back(&mut self) -> Result<R> {
    self.pop(Side::Back)
  }

  /// Returns a copy of the first record, or fails with [`Error::Empty`].
  ///
  /// Takes `&mut self` because the front edge may have to move into the next block to reach the
  /// record.
  pub fn front(&mut self) -> Result<R> {
    self.peek(Side::Front)
  }

  /// Returns a copy of the last record, or fails with [`Error::Empty`].
  ///
  /// Takes `&mut self` because the back edge may have to move into the previous block to reach
  /// the record.
  pub fn back(&mut self) -> Result<R> {
    self.peek(Side::Back)
  }

  /// Returns a cursor positioned at the first record.
  pub fn cursor_front(&self) -> Result<Cursor<'_, R, F>> {
    Cursor::at_front(self)
  }

  /// Returns a cursor positioned past the last record.
  pub fn cursor_back(&self) -> Result<Cursor<'_, R, F>> {
    Cursor::at_back(self)
  }

  /// Returns an iterator over copies of all records, from front to back.
  pub fn iter(&self) -> Result<Iter<'_, R, F>> {
    Ok(Iter::new(self.cursor_front()?, self.cursor_back()?))
  }

  /// Deletes every file of the deque, reporting the first failure.
  pub fn close(mut self) -> Result<()> {
    self.teardown()
  }

  fn teardown(&mut self) -> Result<()> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;

    let low = self.edges.edge(Side::Front).saturating_sub(1);
    let high = self.edges.edge(Side::Back).saturating_add(1);
    let cache = self.cache.get_mut();
    let mut doomed = cache.discard();
    doomed.retain(|number| !(low..=high).contains(number));

    let store = cache.store_mut();
    let mut result = Ok(());
    for number in (low..=high).chain(doomed) {
      if let Err(err) = store.delete(number) {
        result = result.and(Err(err));
      }
    }
    if let Err(err) = store.close() {
      result = result.and(Err(err));
    }
    debug!(namespace = %store.namespace(), "removed deque");
    result
  }
}

impl<R: Record, F: vfs::FileSystem> Drop for Deque<R, F> {
  fn drop(&mut self) {
    if let Err(err) = self.teardown() {
      warn!(error = %err, "failed to remove deque files");
    }
  }
}
