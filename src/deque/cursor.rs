//! # Paging cursors
//!
//! A [`Cursor`] walks the records of a [`Deque`] in either direction. It holds the block it is
//! positioned in (plus one prefetched neighbour, like the ends of the deque do) through the
//! deque's block cache, so blocks that the deque itself holds are shared rather than read again,
//! and blocks in the middle are paged in and out as the cursor passes them.

use super::edge::{fill_limit, Anchor, Side};
use super::Deque;
use crate::encoding::record::Record;
use crate::error::Result;
use crate::storage::cache::BlockCache;
use crate::storage::vfs;
use crate::storage::BlockNumber;
use std::collections;
use std::fmt;
use std::ptr;
use tracing::warn;

/// Location of a cursor: the record at `offset` within block `block`.
///
/// Positions are canonical: a cursor is either at an existing record, or at the end position,
/// which is offset 0 of the block after the back edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
  pub block: BlockNumber,
  pub offset: usize,
}

/// Blocks strictly between the two edges are always filled up to the fill limit, so only cached
/// blocks need looking at.
fn block_len<R: Record, F: vfs::FileSystem>(cache: &BlockCache<R, F>, number: BlockNumber) -> usize {
  cache.cached(number).map_or(fill_limit(cache.capacity()), collections::VecDeque::len)
}

/// Moves `position` forward until it is at a record or at the end position.
fn settle_forward<R: Record, F: vfs::FileSystem>(
  deque: &Deque<R, F>,
  cache: &BlockCache<R, F>,
  mut position: Position,
) -> Position {
  let back = deque.edges.edge(Side::Back);
  while position.block <= back && position.offset >= block_len(cache, position.block) {
    position = Position { block: position.block + 1, offset: 0 };
  }
  position
}

/// The block a cursor at `position` holds. The end position holds the back edge block.
fn home<R: Record, F: vfs::FileSystem>(deque: &Deque<R, F>, position: Position) -> BlockNumber {
  position.block.min(deque.edges.edge(Side::Back))
}

/// # Cursor
///
/// A position between records of a [`Deque`]. [`Cursor::next`] reads the record after the
/// position and moves past it; [`Cursor::prev`] moves back over the record before the position
/// and reads it.
///
/// The cursor borrows the deque, so the deque cannot change under it. Blocks held by the cursor
/// are released when it is dropped.
pub struct Cursor<'a, R: Record, F: vfs::FileSystem> {
  deque: &'a Deque<R, F>,
  position: Position,
  anchor: Anchor,
}

impl<'a, R: Record, F: vfs::FileSystem> Cursor<'a, R, F> {
  fn bind(deque: &'a Deque<R, F>, position: Position) -> Result<Self> {
    let handle = deque.cache.borrow_mut().acquire(home(deque, position))?;
    Ok(Cursor { deque, position, anchor: Anchor::new(handle) })
  }

  /// Creates a cursor before the first record.
  pub(crate) fn at_front(deque: &'a Deque<R, F>) -> Result<Self> {
    let start = Position { block: deque.edges.edge(Side::Front), offset: 0 };
    let position = settle_forward(deque, &deque.cache.borrow(), start);
    Self::bind(deque, position)
  }

  /// Creates a cursor after the last record.
  pub(crate) fn at_back(deque: &'a Deque<R, F>) -> Result<Self> {
    let end = Position { block: deque.edges.edge(Side::Back) + 1, offset: 0 };
    Self::bind(deque, end)
  }

  /// Returns where the cursor stands.
  pub fn position(&self) -> Position {
    self.position
  }

  /// Returns whether there is no record after the cursor.
  pub fn is_end(&self) -> bool {
    self.position.block > self.deque.edges.edge(Side::Back)
  }

  fn predecessor(&self) -> Option<Position> {
    let Position { block, offset } = self.position;
    if offset > 0 {
      return Some(Position { block, offset: offset - 1 });
    }
    let cache = self.deque.cache.borrow();
    (self.deque.edges.edge(Side::Front)..block).rev().find_map(|block| {
      let len = block_len(&cache, block);
      (len > 0).then(|| Position { block, offset: len - 1 })
    })
  }

  /// Moves to `target`, crossing into its block if needed. On failure the cursor stays where it
  /// was.
  fn seek(&mut self, target: Position) -> Result<()> {
    let deque = self.deque;
    let mut cache = deque.cache.borrow_mut();
    let block = home(deque, target);
    if block != self.anchor.number() {
      self.anchor.cross(&mut cache, block)?;
    }
    self.position = target;
    if target.offset == deque.edges.threshold() {
      if let Err(err) = self.anchor.release_prefetch(&mut cache) {
        warn!(block = self.anchor.number(), error = %err, "cursor keeps prefetched block after failed release");
      }
    }
    Ok(())
  }

  /// Returns a copy of the record after the cursor without moving.
  pub fn peek_next(&self) -> Result<Option<R>> {
    if self.is_end() {
      return Ok(None);
    }
    let cache = self.deque.cache.borrow();
    Ok(cache.records(self.anchor.current()).get(self.position.offset).copied())
  }

  /// Returns a copy of the record after the cursor and moves past it.
  #[allow(clippy::should_implement_trait)]
  pub fn next(&mut self) -> Result<Option<R>> {
    let Some(record) = self.peek_next()? else {
      return Ok(None);
    };
    let successor = {
      let cache = self.deque.cache.borrow();
      let position = Position { offset: self.position.offset + 1, ..self.position };
      settle_forward(self.deque, &cache, position)
    };
    self.seek(successor)?;
    Ok(Some(record))
  }

  /// Moves back over the record before the cursor and returns a copy of it.
  pub fn prev(&mut self) -> Result<Option<R>> {
    let Some(target) = self.predecessor() else {
      return Ok(None);
    };
    self.seek(target)?;
    self.peek_next()
  }

  /// Returns a copy of the record before the cursor without moving. If that record lives in a
  /// block nobody holds, the cursor keeps the block as its prefetch, so a following
  /// [`Cursor::prev`] or `peek_prev` does not read it again.
  pub fn peek_prev(&mut self) -> Result<Option<R>> {
    let Some(target) = self.predecessor() else {
      return Ok(None);
    };
    let deque = self.deque;
    let mut cache = deque.cache.borrow_mut();
    if cache.cached(target.block).is_none() {
      self.anchor.prefetch_block(&mut cache, target.block)?;
    }
    Ok(cache.cached(target.block).and_then(|records| records.get(target.offset)).copied())
  }
}

impl<R: Record, F: vfs::FileSystem> Drop for Cursor<'_, R, F> {
  fn drop(&mut self) {
    let deque = self.deque;
    match deque.cache.try_borrow_mut() {
      Ok(mut cache) => {
        if let Err(err) = self.anchor.release_all(&mut cache) {
          warn!(block = self.anchor.number(), error = %err, "failed to release blocks held by cursor");
        }
      }
      Err(_) => warn!(block = self.anchor.number(), "block cache busy, cursor leaves its blocks cached"),
    }
  }
}

/// Cursors are equal when they walk the same deque and stand at the same position.
impl<R: Record, F: vfs::FileSystem> PartialEq for Cursor<'_, R, F> {
  fn eq(&self, other: &Self) -> bool {
    ptr::eq(self.deque, other.deque) && self.position == other.position
  }
}

impl<R: Record, F: vfs::FileSystem> Eq for Cursor<'_, R, F> {}

impl<R: Record, F: vfs::FileSystem> fmt::Debug for Cursor<'_, R, F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Cursor").field("position", &self.position).field("anchor", &self.anchor).finish()
  }
}

/// # Record iterator
///
/// Yields copies of the records between two cursors, from either end. After the first error the
/// iterator is exhausted.
pub struct Iter<'a, R: Record, F: vfs::FileSystem> {
  front: Cursor<'a, R, F>,
  back: Cursor<'a, R, F>,
  failed: bool,
}

impl<'a, R: Record, F: vfs::FileSystem> Iter<'a, R, F> {
  pub(crate) fn new(front: Cursor<'a, R, F>, back: Cursor<'a, R, F>) -> Self {
    Iter { front, back, failed: false }
  }

  fn step(&mut self, side: Side) -> Option<Result<R>> {
    if self.failed || self.front == self.back {
      return None;
    }
    let item = match side {
      Side::Front => self.front.next(),
      Side::Back => self.back.prev(),
    };
    let item = item.transpose();
    self.failed = matches!(item, Some(Err(_)));
    item
  }
}

impl<R: Record, F: vfs::FileSystem> Iterator for Iter<'_, R, F> {
  type Item = Result<R>;

  fn next(&mut self) -> Option<Self::Item> {
    self.step(Side::Front)
  }
}

impl<R: Record, F: vfs::FileSystem> DoubleEndedIterator for Iter<'_, R, F> {
  fn next_back(&mut self) -> Option<Self::Item> {
    self.step(Side::Back)
  }
}

impl<R: Record, F: vfs::FileSystem> std::iter::FusedIterator for Iter<'_, R, F> {}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::Config;
  use crate::storage::vfs::MemoryFileSystem;
  use crate::storage::ORIGIN;

  fn memory_deque(capacity: usize, records: std::ops::Range<u64>) -> Deque<u64, MemoryFileSystem> {
    let config = Config { block_capacity: Some(capacity), ..Config::default() };
    let mut deque = Deque::with_config(MemoryFileSystem::default(), "root", config).unwrap();
    for record in records {
      deque.push_back(record).unwrap();
    }
    deque
  }

  fn collect<I: Iterator<Item = Result<u64>>>(iter: I) -> Vec<u64> {
    iter.map(|record| record.unwrap()).collect()
  }

  #[test]
  fn test_iterate_both_directions() {
    let mut deque = memory_deque(3, 0..10);
    for record in 100..104 {
      deque.push_front(record).unwrap();
    }
    let expected: Vec<u64> = (100..104).rev().chain(0..10).collect();
    assert_eq!(collect(deque.iter().unwrap()), expected);
    assert_eq!(collect(deque.iter().unwrap().rev()), expected.iter().rev().copied().collect::<Vec<_>>());
  }

  #[test]
  fn test_iterate_from_both_ends_meets_in_the_middle() {
    let deque = memory_deque(2, 0..7);
    let mut iter = deque.iter().unwrap();
    let mut seen = Vec::new();
    loop {
      match iter.next() {
        Some(record) => seen.push(record.unwrap()),
        None => break,
      }
      match iter.next_back() {
        Some(record) => seen.push(record.unwrap()),
        None => break,
      }
    }
    assert_eq!(seen, vec![0, 6, 1, 5, 2, 4, 3]);
    assert!(iter.next().is_none());
    assert!(iter.next_back().is_none());
  }

  #[test]
  fn test_step_and_peek() {
    let deque = memory_deque(4, 0..6);
    let mut cursor = deque.cursor_front().unwrap();
    assert_eq!(cursor.position(), Position { block: ORIGIN, offset: 0 });
    assert_eq!(cursor.peek_prev().unwrap(), None);
    assert_eq!(cursor.prev().unwrap(), None);
    assert_eq!(cursor.peek_next().unwrap(), Some(0));

    for expected in 0..5 {
      assert_eq!(cursor.next().unwrap(), Some(expected));
    }
    assert_eq!(cursor.position(), Position { block: ORIGIN + 1, offset: 2 });
    assert_eq!(cursor.peek_prev().unwrap(), Some(4));
    assert_eq!(cursor.prev().unwrap(), Some(4));
    assert_eq!(cursor.prev().unwrap(), Some(3));
    assert_eq!(cursor.prev().unwrap(), Some(2));
    assert_eq!(cursor.position(), Position { block: ORIGIN, offset: 2 });

    let mut end = deque.cursor_back().unwrap();
    assert!(end.is_end());
    assert_eq!(end.peek_next().unwrap(), None);
    assert_eq!(end.next().unwrap(), None);
    assert_eq!(end.peek_prev().unwrap(), Some(5));
    assert_eq!(end.prev().unwrap(), Some(5));
    assert!(!end.is_end());
  }

  #[test]
  fn test_cursor_equality() {
    let deque = memory_deque(3, 0..5);
    let mut cursor = deque.cursor_front().unwrap();
    assert_eq!(cursor, deque.cursor_front().unwrap());
    while cursor.next().unwrap().is_some() {}
    assert_eq!(cursor, deque.cursor_back().unwrap());

    let other = memory_deque(3, 0..5);
    assert_ne!(deque.cursor_front().unwrap(), other.cursor_front().unwrap());
  }

  #[test]
  fn test_empty_deque_begin_is_end() {
    let mut deque = memory_deque(2, 0..0);
    assert_eq!(deque.cursor_front().unwrap(), deque.cursor_back().unwrap());
    assert!(deque.iter().unwrap().next().is_none());

    deque.push_back(1).unwrap();
    deque.push_back(2).unwrap();
    deque.push_back(3).unwrap();
    for _ in 0..3 {
      deque.pop_back().unwrap();
    }
    assert!(deque.cursor_front().unwrap().is_end());
    assert!(deque.iter().unwrap().next_back().is_none());
  }

  #[test]
  fn test_skips_emptied_edge_blocks() {
    let mut deque = memory_deque(4, 0..10);
    for _ in 0..3 {
      deque.pop_front().unwrap();
    }
    deque.pop_back().unwrap();
    assert_eq!(deque.edges.edge(Side::Front), ORIGIN);
    assert_eq!(deque.edges.edge(Side::Back), ORIGIN + 3);

    let mut cursor = deque.cursor_front().unwrap();
    assert_eq!(cursor.position(), Position { block: ORIGIN + 1, offset: 0 });
    assert_eq!(cursor.peek_prev().unwrap(), None);
    assert_eq!(deque.cursor_back().unwrap().peek_prev().unwrap(), Some(8));
    assert_eq!(collect(deque.iter().unwrap()), (3..9).collect::<Vec<_>>());
  }

  #[test]
  fn test_cursors_share_cached_blocks() {
    let deque = memory_deque(4, 0..6);
    let cached = deque.cache.borrow().len();
    assert_eq!(deque.cache.borrow().refcount(ORIGIN), 1);

    let first = deque.cursor_front().unwrap();
    let second = deque.cursor_front().unwrap();
    let end = deque.cursor_back().unwrap();
    assert_eq!(deque.cache.borrow().refcount(ORIGIN), 3);
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 2);
    assert_eq!(deque.cache.borrow().len(), cached);

    drop((first, second, end));
    assert_eq!(deque.cache.borrow().refcount(ORIGIN), 1);
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 1);
  }

  #[test]
  fn test_peek_prev_keeps_unheld_block() {
    let mut deque = memory_deque(4, 0..9);
    for _ in 0..3 {
      deque.pop_back().unwrap();
    }
    assert_eq!(deque.edges.edge(Side::Back), ORIGIN + 2);
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 0);

    let mut cursor = deque.cursor_back().unwrap();
    assert_eq!(cursor.peek_prev().unwrap(), Some(5));
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 1);
    assert_eq!(cursor.peek_prev().unwrap(), Some(5));
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 1);

    assert_eq!(cursor.prev().unwrap(), Some(5));
    assert_eq!(cursor.position(), Position { block: ORIGIN + 1, offset: 2 });
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 1);
    drop(cursor);
    assert_eq!(deque.cache.borrow().refcount(ORIGIN + 1), 0);
  }

  #[test]
  fn test_walk_pages_blocks_in_and_out() {
    let mut deque = memory_deque(3, 0..20);
    let cached = deque.cache.borrow().len();
    let stored = deque.cache.get_mut().store_mut().blocks().unwrap();
    assert_eq!(stored, (ORIGIN + 1..=ORIGIN + 8).collect::<Vec<_>>());

    let mut cursor = deque.cursor_front().unwrap();
    let mut walked = Vec::new();
    while let Some(record) = cursor.next().unwrap() {
      walked.push(record);
      assert!(deque.cache.borrow().len() <= cached + 2);
    }
    assert_eq!(walked, (0..20).collect::<Vec<_>>());
    while cursor.prev().unwrap().is_some() {
      assert!(deque.cache.borrow().len() <= cached + 2);
    }
    assert_eq!(cursor.position(), Position { block: ORIGIN, offset: 0 });
    drop(cursor);

    assert_eq!(deque.cache.borrow().len(), cached);
    assert_eq!(deque.cache.get_mut().store_mut().blocks().unwrap(), stored);
  }
}
