//! # Spilldeque
//!
//! A double-ended queue whose contents live in a directory of fixed-size block files, with only
//! the blocks near the two ends (and near any live cursor) kept in memory.
//!
//! ```no_run
//! use spilldeque::Deque;
//!
//! # fn main() -> spilldeque::Result<()> {
//! let mut deque = Deque::<u64>::create(std::path::Path::new("/tmp"))?;
//! deque.push_back(1)?;
//! deque.push_front(0)?;
//! assert_eq!(deque.front()?, 0);
//! for record in deque.iter()? {
//!   println!("{}", record?);
//! }
//! deque.close()
//! # }
//! ```

pub mod config;
pub mod deque;
pub mod encoding;
pub mod error;
pub mod storage;

pub use config::Config;
pub use deque::{Cursor, Deque, Iter, Position};
pub use encoding::record::Record;
pub use error::{Error, Result};
