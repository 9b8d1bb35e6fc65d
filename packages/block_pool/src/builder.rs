use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{BlockPool, DEFAULT_BLOCK_CAPACITY, DropPolicy, Result};

/// Builder for creating an instance of [`BlockPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`BlockPool::new()`][1] reserves a single block and
/// leaks any objects still live when the pool is dropped.
///
/// # Examples
///
/// ```
/// use block_pool::{BlockPool, DropPolicy};
///
/// let pool = BlockPool::<u32, 64>::builder()
///     .initial_blocks(4)
///     .drop_policy(DropPolicy::MustNotLeakItems)
///     .build()
///     .unwrap();
///
/// assert_eq!(pool.block_count(), 4);
/// ```
///
/// [1]: BlockPool::new
#[must_use]
pub struct BlockPoolBuilder<T, const BLOCK_CAPACITY: usize = DEFAULT_BLOCK_CAPACITY> {
    initial_blocks: usize,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T, const BLOCK_CAPACITY: usize> fmt::Debug for BlockPoolBuilder<T, BLOCK_CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPoolBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("block_capacity", &BLOCK_CAPACITY)
            .field("initial_blocks", &self.initial_blocks)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T, const BLOCK_CAPACITY: usize> BlockPoolBuilder<T, BLOCK_CAPACITY> {
    pub(crate) fn new() -> Self {
        Self {
            initial_blocks: 1,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the number of blocks the pool reserves when it is built. Defaults to one.
    ///
    /// Zero is rejected when the pool is built.
    pub fn initial_blocks(mut self, blocks: usize) -> Self {
        self.initial_blocks = blocks;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs how
    /// to treat remaining objects in the pool when the pool is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::{BlockPool, DropPolicy};
    ///
    /// let pool = BlockPool::<u32, 16>::builder()
    ///     .drop_policy(DropPolicy::MustNotLeakItems)
    ///     .build()
    ///     .unwrap();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockCount`][crate::Error::InvalidBlockCount] if the initial
    /// block count was set to zero.
    ///
    /// # Panics
    ///
    /// Panics if `BLOCK_CAPACITY` is zero.
    pub fn build(self) -> Result<BlockPool<T, BLOCK_CAPACITY>> {
        BlockPool::new_inner(self.initial_blocks, self.drop_policy)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn defaults_to_one_block() {
        let pool = BlockPool::<u32, 8>::builder().build().unwrap();

        assert_eq!(pool.block_count(), 1);
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn initial_blocks_are_reserved() {
        let pool = BlockPool::<u32, 8>::builder()
            .initial_blocks(5)
            .build()
            .unwrap();

        assert_eq!(pool.block_count(), 5);
        assert_eq!(pool.capacity(), 40);
    }

    #[test]
    fn zero_initial_blocks_is_error() {
        let result = BlockPool::<u32, 8>::builder().initial_blocks(0).build();

        assert_eq!(result.unwrap_err(), Error::InvalidBlockCount);
    }

    #[test]
    fn debug_output_shows_configuration() {
        let builder = BlockPool::<u16, 8>::builder().initial_blocks(3);

        let output = format!("{builder:?}");

        assert!(output.contains("u16"));
        assert!(output.contains("initial_blocks: 3"));
        assert!(output.contains("MayLeakItems"));
    }
}
