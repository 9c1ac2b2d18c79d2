//! # Block cache
//!
//! A reference-counted arena holding the only live copy of every block that some holder
//! currently uses. Holders name blocks through [`BlockHandle`]s, which are plain block-number
//! tokens; the records themselves never leave the arena.
//!
//! An entry exists exactly while its reference count is positive. When the last handle is
//! released, a non-empty block is written back to the [`BlockStore`] and an empty one has its file
//! deleted.

use super::paging::BlockStore;
use super::vfs;
use super::BlockNumber;
use crate::encoding::record::Record;
use crate::error::{Error, Result};
use std::collections;
use tracing::{debug, trace};

/// # Block handle
///
/// Proof of one reference to a cached block. Handles are created only by
/// [`BlockCache::acquire`] and cannot be cloned, so every acquire is matched by at most one
/// [`BlockCache::release`] of the same handle.
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub struct BlockHandle {
  number: BlockNumber,
}

impl BlockHandle {
  /// Returns the number of the block this handle refers to.
  pub fn number(&self) -> BlockNumber {
    self.number
  }
}

struct Entry<R> {
  refcount: usize,
  records: collections::VecDeque<R>,
}

/// # Block cache
pub struct BlockCache<R: Record, F: vfs::FileSystem> {
  store: BlockStore<R, F>,
  capacity: usize,
  entries: collections::HashMap<BlockNumber, Entry<R>>,
}

impl<R: Record, F: vfs::FileSystem> BlockCache<R, F> {
  /// Creates an empty cache in front of `store` for blocks of at most `capacity` records.
  pub fn new(store: BlockStore<R, F>, capacity: usize) -> Self {
    BlockCache { store, capacity, entries: collections::HashMap::new() }
  }

  /// Returns the maximum number of records in a block.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Takes a reference to block `number`, loading it from the store if nobody holds it yet.
  /// A block without a file starts out empty.
  pub fn acquire(&mut self, number: BlockNumber) -> Result<BlockHandle> {
    if let Some(entry) = self.entries.get_mut(&number) {
      entry.refcount += 1;
      trace!(block = number, refcount = entry.refcount, "shared cached block");
      return Ok(BlockHandle { number });
    }
    let records = self.store.load(number)?;
    if records.len() > self.capacity {
      return Err(Error::Overfull {
        path: self.store.block_name(number),
        records: records.len(),
        capacity: self.capacity,
      });
    }
    self.entries.insert(number, Entry { refcount: 1, records });
    debug!(block = number, cached = self.entries.len(), "cached block");
    Ok(BlockHandle { number })
  }

  /// Gives up the reference `handle`. The caller must not use `handle` again once this succeeds.
  ///
  /// If this is the last reference, the block is written back (or its file deleted, if empty)
  /// and evicted. When that I/O fails the entry stays cached with its reference intact, so the
  /// caller still owns a valid handle.
  ///
  /// # Panics
  ///
  /// Panics if the block is not cached, which means `handle` was already released.
  pub fn release(&mut self, handle: &BlockHandle) -> Result<()> {
    let number = handle.number;
    let Some(entry) = self.entries.get_mut(&number) else {
      panic!("released block {number}, which holds no references");
    };
    if entry.refcount > 1 {
      entry.refcount -= 1;
      trace!(block = number, refcount = entry.refcount, "dropped reference to cached block");
      return Ok(());
    }
    if entry.records.is_empty() {
      self.store.delete(number)?;
    } else {
      self.store.save(number, &entry.records)?;
    }
    self.entries.remove(&number);
    debug!(block = number, cached = self.entries.len(), "evicted block");
    Ok(())
  }

  fn entry(&self, handle: &BlockHandle) -> &Entry<R> {
    match self.entries.get(&handle.number) {
      Some(entry) => entry,
      None => panic!("block {} is used after its last release", handle.number),
    }
  }

  /// Returns the records of the block behind `handle`.
  pub fn records(&self, handle: &BlockHandle) -> &collections::VecDeque<R> {
    &self.entry(handle).records
  }

  /// Returns the records of the block behind `handle` for in-place modification. The change is
  /// seen through every handle to the same block.
  pub fn records_mut(&mut self, handle: &BlockHandle) -> &mut collections::VecDeque<R> {
    match self.entries.get_mut(&handle.number) {
      Some(entry) => &mut entry.records,
      None => panic!("block {} is used after its last release", handle.number),
    }
  }

  /// Returns the records of block `number` if it is cached, without taking a reference.
  pub fn cached(&self, number: BlockNumber) -> Option<&collections::VecDeque<R>> {
    self.entries.get(&number).map(|entry| &entry.records)
  }

  /// Returns the number of references held to block `number`, zero if it is not cached.
  pub fn refcount(&self, number: BlockNumber) -> usize {
    self.entries.get(&number).map_or(0, |entry| entry.refcount)
  }

  /// Returns the number of blocks held in memory.
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Returns whether no blocks are held in memory.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Returns the underlying block store.
  pub fn store(&self) -> &BlockStore<R, F> {
    &self.store
  }

  /// Returns the underlying block store.
  pub fn store_mut(&mut self) -> &mut BlockStore<R, F> {
    &mut self.store
  }

  /// Forgets every cached block without writing anything back, invalidating all outstanding
  /// handles. Returns the numbers of the forgotten blocks.
  pub fn discard(&mut self) -> Vec<BlockNumber> {
    let numbers: Vec<BlockNumber> = self.entries.drain().map(|(number, _)| number).collect();
    if !numbers.is_empty() {
      debug!(blocks = numbers.len(), "discarded cached blocks");
    }
    numbers
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use vfs::{MemoryFileSystem, StandardFileSystem};

  fn memory_cache(capacity: usize) -> (MemoryFileSystem, BlockCache<u32, MemoryFileSystem>) {
    let fs = MemoryFileSystem::default();
    let store = BlockStore::open(fs.clone(), "root", "t").unwrap();
    (fs, BlockCache::new(store, capacity))
  }

  #[test]
  fn test_acquire_missing_block_is_empty() {
    let (fs, mut cache) = memory_cache(4);
    let handle = cache.acquire(10).unwrap();
    assert!(cache.records(&handle).is_empty());
    assert_eq!(cache.refcount(10), 1);

    cache.release(&handle).unwrap();
    assert_eq!(cache.refcount(10), 0);
    assert!(cache.is_empty());
    // Only the namespace lock: an empty block never gets a file.
    assert_eq!(fs.len(), 1);
  }

  #[test]
  fn test_handles_share_one_block() {
    let (_fs, mut cache) = memory_cache(4);
    let first = cache.acquire(1).unwrap();
    let second = cache.acquire(1).unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.refcount(1), 2);

    cache.records_mut(&first).push_back(7);
    assert_eq!(cache.records(&second), &collections::VecDeque::from(vec![7]));

    cache.release(&first).unwrap();
    assert_eq!(cache.records(&second)[0], 7);
    cache.release(&second).unwrap();
  }

  #[test]
  fn test_last_release_writes_back() {
    let (_fs, mut cache) = memory_cache(4);
    let handle = cache.acquire(1).unwrap();
    cache.records_mut(&handle).extend([1, 2, 3]);
    cache.release(&handle).unwrap();
    assert!(cache.store_mut().contains(1).unwrap());

    let handle = cache.acquire(1).unwrap();
    assert_eq!(cache.records(&handle), &collections::VecDeque::from(vec![1, 2, 3]));
    cache.records_mut(&handle).clear();
    cache.release(&handle).unwrap();
    assert!(!cache.store_mut().contains(1).unwrap());
  }

  #[test]
  fn test_overfull_block_is_rejected() {
    let (_fs, mut cache) = memory_cache(2);
    cache.store_mut().save(3, &collections::VecDeque::from(vec![1, 2, 3])).unwrap();
    assert!(matches!(cache.acquire(3), Err(Error::Overfull { records: 3, capacity: 2, .. })));
    assert!(cache.is_empty());
  }

  #[test]
  #[should_panic(expected = "holds no references")]
  fn test_double_release_panics() {
    let (_fs, mut cache) = memory_cache(4);
    let handle = cache.acquire(1).unwrap();
    cache.release(&handle).unwrap();
    let _ = cache.release(&handle);
  }

  #[test]
  fn test_discard_forgets_without_writing() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = BlockStore::<u32, _>::open(StandardFileSystem, tempdir.path(), "t").unwrap();
    let mut cache = BlockCache::new(store, 4);
    let handle = cache.acquire(5).unwrap();
    cache.records_mut(&handle).push_back(1);
    assert_eq!(cache.discard(), vec![5]);
    assert!(cache.is_empty());
    assert!(!cache.store_mut().contains(5).unwrap());
  }
}
