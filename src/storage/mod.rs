//! # Block storage
//!
//! Files, block files and the in-memory cache of blocks in front of them.

pub mod cache;
pub mod paging;
pub mod vfs;

/// Number identifying a block within a storage namespace.
pub type BlockNumber = u64;

/// The block that a freshly created deque starts in.
///
/// Front blocks are numbered downwards from here and back blocks upwards, so both ends have
/// 2<sup>63</sup> blocks of room.
pub const ORIGIN: BlockNumber = 1 << 63;
