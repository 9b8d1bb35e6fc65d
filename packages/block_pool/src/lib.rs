#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! An object pool that reserves storage for values of one type in fixed-capacity blocks.
//!
//! This crate provides [`BlockPool`], which amortizes allocation cost by reserving storage for
//! `BLOCK_CAPACITY` objects at a time. Vacant slots in a block are chained into an intrusive
//! freelist stored in the slots themselves, so obtaining and releasing an object is a matter of
//! popping or pushing that list.
//!
//! # Key features
//!
//! - **Stable addresses**: objects never move once placed in the pool.
//! - **Explicit block management**: grow, shrink and resize the pool by whole blocks. Blocks
//!   holding live objects are never removed.
//! - **Compact slots**: a vacant slot stores its freelist link in the object's own storage, using
//!   the narrowest integer able to index the block.
//! - **Teardown without destructors**: dropping the pool frees its memory but does not drop live
//!   objects. [`DropPolicy::MustNotLeakItems`] turns that situation into a panic.
//!
//! The pool is single-threaded and hands out raw pointers. It never creates references to the
//! objects it holds, so the caller decides how to access them.
//!
//! # Example
//!
//! ```rust
//! use block_pool::BlockPool;
//!
//! // Blocks of 4 slots, one block reserved up front.
//! let mut pool = BlockPool::<u64, 4>::new();
//!
//! let items = (0..5).map(|i| pool.get(i)).collect::<Vec<_>>();
//!
//! // The fifth object did not fit in the first block, so a second block was added.
//! assert_eq!(pool.block_count(), 2);
//! assert_eq!(pool.capacity(), 8);
//!
//! for item in items {
//!     // SAFETY: Every pointer came from this pool and is released exactly once.
//!     unsafe { pool.release(item) }.unwrap();
//! }
//!
//! // With all objects released, every block can be removed.
//! assert_eq!(pool.resize(0), 0);
//! ```

mod block;
mod builder;
mod drop_policy;
mod error;
mod index_width;
mod pool;

pub(crate) use block::*;
pub use builder::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use index_width::*;
pub use pool::{BlockPool, DEFAULT_BLOCK_CAPACITY};
