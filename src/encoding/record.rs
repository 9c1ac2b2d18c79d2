//! # Fixed-size records
//!
//! A record is stored as its exact in-memory byte layout, and a block file is the plain
//! concatenation of its records. Only fixed-size, trivially copyable types qualify.

use std::collections;
use std::mem;

/// # Record interface
///
/// Implementations must write and read exactly [`Record::SIZE`] bytes.
pub trait Record: Copy {
  /// The number of bytes one record occupies on disk.
  const SIZE: usize;

  /// Writes the record into `buf`, which is exactly [`Record::SIZE`] bytes long.
  fn encode(&self, buf: &mut [u8]);

  /// Reads a record from `buf`, which is exactly [`Record::SIZE`] bytes long.
  fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_record_for_number {
  ($($t:ty),*) => {
    $(
      impl Record for $t {
        const SIZE: usize = mem::size_of::<$t>();

        fn encode(&self, buf: &mut [u8]) {
          buf.copy_from_slice(&self.to_ne_bytes());
        }

        fn decode(buf: &[u8]) -> Self {
          let mut bytes = [0u8; mem::size_of::<$t>()];
          bytes.copy_from_slice(buf);
          <$t>::from_ne_bytes(bytes)
        }
      }
    )*
  };
}

impl_record_for_number!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64);

impl<const N: usize> Record for [u8; N] {
  const SIZE: usize = N;

  fn encode(&self, buf: &mut [u8]) {
    buf.copy_from_slice(self);
  }

  fn decode(buf: &[u8]) -> Self {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(buf);
    bytes
  }
}

/// Encodes a sequence of records into the contents of a block file.
pub fn encode_block<'a, R: Record + 'a>(records: impl IntoIterator<Item = &'a R>) -> Vec<u8> {
  let records = records.into_iter();
  let mut bytes = Vec::with_capacity(records.size_hint().0 * R::SIZE);
  for record in records {
    let start = bytes.len();
    bytes.resize(start + R::SIZE, 0);
    record.encode(&mut bytes[start..]);
  }
  bytes
}

/// Decodes the contents of a block file. Returns `None` if `bytes` is not a whole number of
/// records.
pub fn decode_block<R: Record>(bytes: &[u8]) -> Option<collections::VecDeque<R>> {
  if R::SIZE == 0 || bytes.len() % R::SIZE != 0 {
    return None;
  }
  Some(bytes.chunks_exact(R::SIZE).map(R::decode).collect())
}
