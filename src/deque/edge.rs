//! # Edge buffers
//!
//! Each end of the deque works on one *current* block and may keep one *prefetch* block: the
//! block on the other side of the most recent boundary crossing. Keeping it means that pushes
//! and pops oscillating around a block boundary swap two cached blocks instead of writing one
//! out and reading one in every time. The prefetch is given up once the current block has moved
//! half a block away from the boundary.

use crate::encoding::record::Record;
use crate::error::{Error, Result};
use crate::storage::cache::{BlockCache, BlockHandle};
use crate::storage::vfs;
use crate::storage::BlockNumber;
use std::mem;
use tracing::trace;

/// Fill level (or cursor offset) at which a block reached by a crossing lets go of the block it
/// came from.
pub(crate) fn release_threshold(capacity: usize) -> usize {
  (capacity / 2).max(1)
}

/// Number of records at which an edge block counts as full and pushes move on to a new block.
/// One slot short of the capacity, except that a block always takes at least one record.
pub(crate) fn fill_limit(capacity: usize) -> usize {
  capacity.saturating_sub(1).max(1)
}

/// One end of the deque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
  Front,
  Back,
}

impl Side {
  /// The neighbouring block further away from the middle of the deque.
  fn outward(self, number: BlockNumber) -> BlockNumber {
    match self {
      Side::Front => number - 1,
      Side::Back => number + 1,
    }
  }

  /// The neighbouring block closer to the middle of the deque.
  fn inward(self, number: BlockNumber) -> BlockNumber {
    match self {
      Side::Front => number + 1,
      Side::Back => number - 1,
    }
  }
}

/// # Anchor
///
/// A current block plus at most one prefetched neighbour. Used by both ends of the deque and by
/// every cursor.
#[derive(Debug)]
pub(crate) struct Anchor {
  current: BlockHandle,
  prefetch: Option<BlockHandle>,
}

impl Anchor {
  pub(crate) fn new(current: BlockHandle) -> Self {
    Anchor { current, prefetch: None }
  }

  pub(crate) fn number(&self) -> BlockNumber {
    self.current.number()
  }

  pub(crate) fn current(&self) -> &BlockHandle {
    &self.current
  }

  #[cfg(test)]
  pub(crate) fn prefetch(&self) -> Option<BlockNumber> {
    self.prefetch.as_ref().map(BlockHandle::number)
  }

  /// Makes block `target` current, keeping the old current block as the prefetch.
  ///
  /// If `target` is the prefetched block the two are swapped without I/O. Otherwise a stale
  /// prefetch is released first and `target` is acquired. On failure the current block is
  /// unchanged.
  pub(crate) fn cross<R: Record, F: vfs::FileSystem>(
    &mut self,
    cache: &mut BlockCache<R, F>,
    target: BlockNumber,
  ) -> Result<()> {
    let incoming = match self.prefetch.take() {
      Some(prefetch) if prefetch.number() == target => prefetch,
      stale => {
        if let Some(prefetch) = &stale {
          if let Err(err) = cache.release(prefetch) {
            self.prefetch = stale;
            return Err(err);
          }
        }
        cache.acquire(target)?
      }
    };
    let outgoing = mem::replace(&mut self.current, incoming);
    trace!(from = outgoing.number(), to = target, "crossed block boundary");
    self.prefetch = Some(outgoing);
    Ok(())
  }

  /// Holds block `target` as the prefetch without making it current, releasing a different
  /// prefetched block first.
  pub(crate) fn prefetch_block<R: Record, F: vfs::FileSystem>(
    &mut self,
    cache: &mut BlockCache<R, F>,
    target: BlockNumber,
  ) -> Result<()> {
    if self.prefetch.as_ref().is_some_and(|prefetch| prefetch.number() == target) {
      return Ok(());
    }
    self.release_prefetch(cache)?;
    self.prefetch = Some(cache.acquire(target)?);
    trace!(block = target, current = self.number(), "prefetched block");
    Ok(())
  }

  /// Releases the prefetched block, if any.
  pub(crate) fn release_prefetch<R: Record, F: vfs::FileSystem>(&mut self, cache: &mut BlockCache<R, F>) -> Result<()> {
    if let Some(prefetch) = &self.prefetch {
      cache.release(prefetch)?;
      trace!(block = prefetch.number(), current = self.number(), "released prefetched block");
      self.prefetch = None;
    }
    Ok(())
  }

  /// Releases every block this anchor holds. The anchor must not be used afterwards.
  pub(crate) fn release_all<R: Record, F: vfs::FileSystem>(&mut self, cache: &mut BlockCache<R, F>) -> Result<()> {
    self.release_prefetch(cache)?;
    cache.release(&self.current)
  }
}

/// # Edge buffers
///
/// The anchors of both ends of the deque. The front edge block holds the first records of the
/// deque and the back edge block the last; the two may be the same block.
#[derive(Debug)]
pub(crate) struct EdgeBuffers {
  front: Anchor,
  back: Anchor,
  limit: usize,
  threshold: usize,
}

impl EdgeBuffers {
  /// Anchors both ends on block `origin`.
  pub(crate) fn new<R: Record, F: vfs::FileSystem>(cache: &mut BlockCache<R, F>, origin: BlockNumber) -> Result<Self> {
    let front = Anchor::new(cache.acquire(origin)?);
    let back = match cache.acquire(origin) {
      Ok(handle) => Anchor::new(handle),
      Err(err) => {
        cache.release(front.current())?;
        return Err(err);
      }
    };
    let capacity = cache.capacity();
    Ok(EdgeBuffers { front, back, limit: fill_limit(capacity), threshold: release_threshold(capacity) })
  }

  fn anchor(&self, side: Side) -> &Anchor {
    match side {
      Side::Front => &self.front,
      Side::Back => &self.back,
    }
  }

  fn anchor_mut(&mut self, side: Side) -> &mut Anchor {
    match side {
      Side::Front => &mut self.front,
      Side::Back => &mut self.back,
    }
  }

  /// Returns the number of the edge block at `side`.
  pub(crate) fn edge(&self, side: Side) -> BlockNumber {
    self.anchor(side).number()
  }

  /// Returns the handle of the edge block at `side`.
  pub(crate) fn current(&self, side: Side) -> &BlockHandle {
    self.anchor(side).current()
  }

  /// Returns the fill level at which a prefetched block is released.
  pub(crate) fn threshold(&self) -> usize {
    self.threshold
  }

  /// Lets go of the prefetch at `side` if the edge block is about to reach the release
  /// threshold. Runs before the mutation so that a failed write-back leaves the records as they
  /// were.
  fn release_if_reaching<R: Record, F: vfs::FileSystem>(
    &mut self,
    cache: &mut BlockCache<R, F>,
    side: Side,
    upcoming_len: usize,
  ) -> Result<()> {
    let threshold = self.threshold;
    let anchor = self.anchor_mut(side);
    if anchor.prefetch.is_some() && upcoming_len == threshold {
      anchor.release_prefetch(cache)?;
    }
    Ok(())
  }

  /// Adds `record` at `side`, moving the edge outward first if its block is full.
  pub(crate) fn push<R: Record, F: vfs::FileSystem>(
    &mut self,
    cache: &mut BlockCache<R, F>,
    side: Side,
    record: R,
  ) -> Result<()> {
    let limit = self.limit;
    let anchor = self.anchor_mut(side);
    if cache.records(anchor.current()).len() >= limit {
      let target = side.outward(anchor.number());
      anchor.cross(cache, target)?;
    }
    let len = cache.records(self.current(side)).len();
    self.release_if_reaching(cache, side, len + 1)?;

    let records = cache.records_mut(self.current(side));
    match side {
      Side::Front => records.push_front(record),
      Side::Back => records.push_back(record),
    }
    Ok(())
  }

  /// Moves the edge at `side` inward if its block is empty, so that the edge block holds the
  /// record at that end. The deque must not be empty.
  fn settle<R: Record, F: vfs::FileSystem>(&mut self, cache: &mut BlockCache<R, F>, side: Side) -> Result<()> {
    let anchor = self.anchor_mut(side);
    if cache.records(anchor.current()).is_empty() {
      let target = side.inward(anchor.number());
      anchor.cross(cache, target)?;
    }
    Ok(())
  }

  /// Copies the record at `side`. The deque must not be empty.
  pub(crate) fn peek<R: Record, F: vfs::FileSystem>(&mut self, cache: &mut BlockCache<R, F>, side: Side) -> Result<R> {
    self.settle(cache, side)?;
    let records = cache.records(self.current(side));
    let record = match side {
      Side::Front => records.front(),
      Side::Back => records.back(),
    };
    record.copied().ok_or(Error::Empty)
  }

  /// Removes and returns the record at `side`. The deque must not be empty.
  pub(crate) fn pop<R: Record, F: vfs::FileSystem>(&mut self, cache: &mut BlockCache<R, F>, side: Side) -> Result<R> {
    self.settle(cache, side)?;
    let len = cache.records(self.current(side)).len();
    if len == 0 {
      return Err(Error::Empty);
    }
    self.release_if_reaching(cache, side, len - 1)?;

    let records = cache.records_mut(self.current(side));
    let record = match side {
      Side::Front => records.pop_front(),
      Side::Back => records.pop_back(),
    };
    record.ok_or(Error::Empty)
  }

  /// Returns the prefetched block number at `side`, if any.
  #[cfg(test)]
  pub(crate) fn prefetch(&self, side: Side) -> Option<BlockNumber> {
    self.anchor(side).prefetch()
  }
}
