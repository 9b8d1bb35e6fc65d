use std::any::type_name;
use std::num::NonZero;
use std::ptr::NonNull;
use std::{fmt, iter, mem, thread};

use tracing::{debug, trace};

use crate::{Block, BlockPoolBuilder, DropPolicy, Error, Result};

/// The number of slots in each block when no block capacity is specified.
#[cfg(not(miri))]
pub const DEFAULT_BLOCK_CAPACITY: usize = 2 << 20;

/// The number of slots in each block when no block capacity is specified.
///
/// Under Miri, we use a smaller block capacity because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub const DEFAULT_BLOCK_CAPACITY: usize = 4;

/// An object pool for values of type `T` that reserves storage in blocks of
/// `BLOCK_CAPACITY` slots and hands out stable addresses.
///
/// Each block is a single allocation. Obtaining an object from the pool via [`get()`][1] or
/// [`get_with()`][2] moves the value into a vacant slot and returns a pointer to it, without
/// touching the global allocator unless every block is full. Returning the object via
/// [`release()`][3] drops it and makes its slot available again.
///
/// # Block management
///
/// The pool keeps its blocks in a list with the most recently added block first. It grows by one
/// block whenever an object is requested while every block is full. You can also grow the pool
/// ahead of time with [`add_blocks()`][4] and shrink it with [`remove_blocks()`][5],
/// [`shrink_to_fit()`][6] or [`resize()`][7]. Shrinking only ever removes blocks that contain no
/// live objects, so the address of a live object never changes.
///
/// # Teardown
///
/// Dropping the pool frees all of its blocks but does **not** drop objects that are still live.
/// Release every object before dropping the pool if their destructors must run. Use
/// [`DropPolicy::MustNotLeakItems`] to turn a forgotten object into a panic.
///
/// # Thread safety
///
/// The pool is single-threaded. It can be moved to another thread if `T` can be, but it cannot
/// be shared between threads.
///
/// # Example
///
/// ```rust
/// use block_pool::BlockPool;
///
/// let mut pool = BlockPool::<String, 64>::new();
///
/// let greeting = pool.get("Hello".to_string());
///
/// // SAFETY: The object is live until released.
/// assert_eq!(unsafe { greeting.as_ref() }, "Hello");
///
/// // SAFETY: The pointer came from this pool and is released exactly once.
/// unsafe { pool.release(greeting) }.unwrap();
/// ```
///
/// [1]: Self::get
/// [2]: Self::get_with
/// [3]: Self::release
/// [4]: Self::add_blocks
/// [5]: Self::remove_blocks
/// [6]: Self::shrink_to_fit
/// [7]: Self::resize
pub struct BlockPool<T, const BLOCK_CAPACITY: usize = DEFAULT_BLOCK_CAPACITY> {
    /// The most recently added block. Every other block is reachable from here.
    head: Option<Box<Block<T, BLOCK_CAPACITY>>>,

    /// Number of blocks reachable from `head`.
    block_count: usize,

    drop_policy: DropPolicy,
}

impl<T, const BLOCK_CAPACITY: usize> BlockPool<T, BLOCK_CAPACITY> {
    pub(crate) fn new_inner(initial_blocks: usize, drop_policy: DropPolicy) -> Result<Self> {
        assert!(BLOCK_CAPACITY > 0, "BlockPool must have non-zero block capacity");

        let initial_blocks = NonZero::new(initial_blocks).ok_or(Error::InvalidBlockCount)?;

        let mut pool = Self {
            head: None,
            block_count: 0,
            drop_policy,
        };

        pool.grow(initial_blocks);

        Ok(pool)
    }

    /// Creates a new [`BlockPool`] with one block reserved.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let pool = BlockPool::<u64, 32>::new();
    ///
    /// assert_eq!(pool.block_count(), 1);
    /// assert_eq!(pool.capacity(), 32);
    /// assert!(pool.is_empty());
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `BLOCK_CAPACITY` is zero.
    #[must_use]
    pub fn new() -> Self {
        Self::new_inner(1, DropPolicy::default()).expect("one is a valid block count")
    }

    /// Creates a new [`BlockPool`] with `blocks` blocks reserved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockCount`] if `blocks` is zero.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::{BlockPool, Error};
    ///
    /// let pool = BlockPool::<u64, 32>::with_blocks(3).unwrap();
    /// assert_eq!(pool.capacity(), 96);
    ///
    /// let error = BlockPool::<u64, 32>::with_blocks(0).unwrap_err();
    /// assert_eq!(error, Error::InvalidBlockCount);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `BLOCK_CAPACITY` is zero.
    pub fn with_blocks(blocks: usize) -> Result<Self> {
        Self::new_inner(blocks, DropPolicy::default())
    }

    /// Starts building a new [`BlockPool`].
    ///
    /// Use this when you want to customize the pool configuration beyond the defaults.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::{BlockPool, DropPolicy};
    ///
    /// let pool = BlockPool::<u32, 16>::builder()
    ///     .initial_blocks(2)
    ///     .drop_policy(DropPolicy::MustNotLeakItems)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 32);
    /// ```
    pub fn builder() -> BlockPoolBuilder<T, BLOCK_CAPACITY> {
        BlockPoolBuilder::new()
    }

    /// The number of objects the pool can hold without allocating another block.
    ///
    /// This includes the objects that are currently live.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.block_count
            .checked_mul(BLOCK_CAPACITY)
            .expect("overflow here would mean the pool can hold more items than virtual memory can fit, which makes no sense - it would never grow that big")
    }

    /// The number of blocks the pool currently owns.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// The number of live objects in the pool.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn len(&self) -> usize {
        self.blocks().map(Block::used).sum()
    }

    /// Whether the pool has no live objects.
    ///
    /// An empty pool may still be holding blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks().all(Block::is_empty)
    }

    /// The number of objects that can be added before the pool has to allocate another block.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity()
            .checked_sub(self.len())
            .expect("live objects never exceed capacity")
    }

    /// Adds `blocks` empty blocks to the pool, increasing capacity by
    /// `blocks * BLOCK_CAPACITY`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockCount`] if `blocks` is zero. The pool is not changed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u32, 8>::new();
    ///
    /// pool.add_blocks(2).unwrap();
    /// assert_eq!(pool.block_count(), 3);
    /// assert_eq!(pool.capacity(), 24);
    /// ```
    pub fn add_blocks(&mut self, blocks: usize) -> Result<()> {
        let blocks = NonZero::new(blocks).ok_or(Error::InvalidBlockCount)?;

        self.grow(blocks);

        Ok(())
    }

    /// Removes up to `blocks` blocks that hold no live objects.
    ///
    /// Blocks with live objects are never removed, so fewer blocks than requested may be
    /// removed. Returns the number of blocks actually removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBlockCount`] if `blocks` is zero. The pool is not changed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u32, 8>::with_blocks(3).unwrap();
    ///
    /// assert_eq!(pool.remove_blocks(2).unwrap(), 2);
    /// assert_eq!(pool.block_count(), 1);
    ///
    /// // Asking for more than there is removes what is possible.
    /// assert_eq!(pool.remove_blocks(5).unwrap(), 1);
    /// assert_eq!(pool.capacity(), 0);
    /// ```
    pub fn remove_blocks(&mut self, blocks: usize) -> Result<usize> {
        let blocks = NonZero::new(blocks).ok_or(Error::InvalidBlockCount)?;

        Ok(self.shrink(blocks))
    }

    /// Adds or removes blocks to move the block count toward `blocks`.
    ///
    /// Returns the block count after the operation. This may be more than requested if some
    /// blocks that would need to be removed still hold live objects.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u32, 8>::new();
    ///
    /// assert_eq!(pool.resize(4), 4);
    ///
    /// let item = pool.get(42);
    ///
    /// // The block holding the live object stays.
    /// assert_eq!(pool.resize(0), 1);
    /// # // SAFETY: The pointer came from this pool and is released exactly once.
    /// # unsafe { pool.release(item) }.unwrap();
    /// ```
    pub fn resize(&mut self, blocks: usize) -> usize {
        if let Some(missing) = blocks
            .checked_sub(self.block_count)
            .and_then(NonZero::new)
        {
            self.grow(missing);
        } else if let Some(excess) = self
            .block_count
            .checked_sub(blocks)
            .and_then(NonZero::new)
        {
            _ = self.shrink(excess);
        }

        self.block_count
    }

    /// Removes every block that holds no live objects. Returns the number of blocks removed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u32, 8>::with_blocks(4).unwrap();
    /// let item = pool.get(1);
    ///
    /// assert_eq!(pool.shrink_to_fit(), 3);
    /// assert_eq!(pool.block_count(), 1);
    /// # // SAFETY: The pointer came from this pool and is released exactly once.
    /// # unsafe { pool.release(item) }.unwrap();
    /// ```
    pub fn shrink_to_fit(&mut self) -> usize {
        NonZero::new(self.block_count).map_or(0, |all| self.shrink(all))
    }

    /// Moves `value` into the pool and returns a pointer to it.
    ///
    /// The value is placed in the first block (most recently added first) that has a vacant
    /// slot. If every block is full, a new block is added first.
    ///
    /// The pointer remains valid until the object is passed to [`release()`][1] or the pool is
    /// dropped. The pool never creates references to its objects, so the caller may create
    /// shared or exclusive references from the pointer as long as Rust aliasing rules are
    /// respected.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u64, 4>::new();
    ///
    /// let mut item = pool.get(42);
    ///
    /// // SAFETY: The object is live and we hold no other references to it.
    /// unsafe {
    ///     *item.as_mut() += 1;
    ///     assert_eq!(*item.as_ref(), 43);
    /// }
    /// # // SAFETY: The pointer came from this pool and is released exactly once.
    /// # unsafe { pool.release(item) }.unwrap();
    /// ```
    ///
    /// [1]: Self::release
    #[must_use]
    pub fn get(&mut self, value: T) -> NonNull<T> {
        self.block_with_vacant_slot().insert(value)
    }

    /// Constructs a value with `f` and moves it into the pool, returning a pointer to it.
    ///
    /// `f` is called before the pool is touched, so if it panics the pool is unchanged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<Vec<u8>, 4>::new();
    ///
    /// let buffer = pool.get_with(|| Vec::with_capacity(1024));
    ///
    /// // SAFETY: The object is live until released.
    /// assert!(unsafe { buffer.as_ref() }.capacity() >= 1024);
    /// # // SAFETY: The pointer came from this pool and is released exactly once.
    /// # unsafe { pool.release(buffer) }.unwrap();
    /// ```
    #[must_use]
    pub fn get_with(&mut self, f: impl FnOnce() -> T) -> NonNull<T> {
        let value = f();
        self.get(value)
    }

    /// Drops the object at `ptr` and makes its slot available for reuse.
    ///
    /// The slot is the first one to be reused by the next object placed in the same block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnownedAddress`] if `ptr` does not point into any block owned by this
    /// pool. The pool is not changed.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` points into a block of this pool but not at the start of a slot.
    ///
    /// # Safety
    ///
    /// If `ptr` points into this pool, it must have been returned by [`get()`][1] or
    /// [`get_with()`][2] on this pool and must not have been released since. Releasing the same
    /// object twice is undefined behavior and is not detected.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let mut pool = BlockPool::<u32, 4>::new();
    ///
    /// let first = pool.get(1);
    ///
    /// // SAFETY: The pointer came from this pool and is released exactly once.
    /// unsafe { pool.release(first) }.unwrap();
    ///
    /// // The released slot is reused right away.
    /// let second = pool.get(2);
    /// assert_eq!(first, second);
    /// # // SAFETY: The pointer came from this pool and is released exactly once.
    /// # unsafe { pool.release(second) }.unwrap();
    /// ```
    ///
    /// [1]: Self::get
    /// [2]: Self::get_with
    pub unsafe fn release(&mut self, ptr: NonNull<T>) -> Result<()> {
        let mut cursor = self.head.as_deref_mut();

        while let Some(block) = cursor {
            if block.contains(ptr) {
                // SAFETY: Forwarding guarantees from the caller.
                unsafe {
                    block.remove(ptr);
                }

                return Ok(());
            }

            cursor = block.next_mut();
        }

        Err(Error::UnownedAddress {
            address: ptr.as_ptr().addr(),
        })
    }

    /// Whether `ptr` points into a block owned by this pool.
    ///
    /// This does not tell whether the object at `ptr` is live.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<T>) -> bool {
        self.blocks().any(|block| block.contains(ptr))
    }

    /// Exchanges the blocks (and therefore all live objects) of two pools.
    ///
    /// The drop policy of each pool stays with the pool.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.head, &mut other.head);
        mem::swap(&mut self.block_count, &mut other.block_count);
    }

    fn blocks(&self) -> impl Iterator<Item = &Block<T, BLOCK_CAPACITY>> {
        iter::successors(self.head.as_deref(), |block| block.next())
    }

    /// Prepends `blocks` new empty blocks to the list, one at a time.
    fn grow(&mut self, blocks: NonZero<usize>) {
        for _ in 0..blocks.get() {
            let mut block = Box::new(Block::new());
            block.set_next(self.head.take());
            self.head = Some(block);
        }

        self.block_count = self
            .block_count
            .checked_add(blocks.get())
            .expect("block count cannot overflow before memory runs out");

        debug!(
            blocks = blocks.get(),
            block_count = self.block_count,
            capacity = self.capacity(),
            item_type = type_name::<T>(),
            "added blocks to pool"
        );
    }

    /// Removes up to `blocks` empty blocks, checking the head last. Returns how many were removed.
    fn shrink(&mut self, blocks: NonZero<usize>) -> usize {
        let quota = blocks.get();
        let mut removed: usize = 0;

        if let Some(mut cursor) = self.head.as_deref_mut() {
            while removed < quota {
                let Some(successor_is_empty) = cursor.next().map(Block::is_empty) else {
                    break;
                };

                if successor_is_empty {
                    let mut unlinked = cursor
                        .take_next()
                        .expect("we just verified that there is a successor");
                    cursor.set_next(unlinked.take_next());
                    drop(unlinked);

                    removed = removed
                        .checked_add(1)
                        .expect("cannot remove more blocks than exist");
                } else {
                    cursor = cursor
                        .next_mut()
                        .expect("we just verified that there is a successor");
                }
            }
        }

        if removed < quota && self.head.as_deref().is_some_and(Block::is_empty) {
            let mut old_head = self
                .head
                .take()
                .expect("we just verified that there is a head block");
            self.head = old_head.take_next();
            drop(old_head);

            removed = removed
                .checked_add(1)
                .expect("cannot remove more blocks than exist");
        }

        self.block_count = self
            .block_count
            .checked_sub(removed)
            .expect("cannot remove more blocks than exist");

        debug!(
            requested = quota,
            removed,
            block_count = self.block_count,
            capacity = self.capacity(),
            item_type = type_name::<T>(),
            "removed empty blocks from pool"
        );

        removed
    }

    /// Returns the first block (newest first) with a vacant slot, adding a block if all are full.
    fn block_with_vacant_slot(&mut self) -> &mut Block<T, BLOCK_CAPACITY> {
        let position = self.blocks().position(|block| !block.is_full());

        let Some(position) = position else {
            trace!(
                block_count = self.block_count,
                item_type = type_name::<T>(),
                "all blocks are full, growing pool"
            );

            self.grow(NonZero::<usize>::MIN);

            return self
                .head
                .as_deref_mut()
                .expect("we just added a block at the head");
        };

        let mut block = self
            .head
            .as_deref_mut()
            .expect("position was found by walking the list from the head");

        for _ in 0..position {
            block = block
                .next_mut()
                .expect("position was found by walking the list from the head");
        }

        block
    }

    #[cfg(test)]
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    pub(crate) fn integrity_check(&self) {
        assert_eq!(
            self.blocks().count(),
            self.block_count,
            "block count does not match the length of the block list"
        );

        for block in self.blocks() {
            block.integrity_check();
        }
    }
}

impl<T, const BLOCK_CAPACITY: usize> Default for BlockPool<T, BLOCK_CAPACITY> {
    /// Creates a new [`BlockPool`] with one block reserved.
    ///
    /// # Panics
    ///
    /// Panics if `BLOCK_CAPACITY` is zero.
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const BLOCK_CAPACITY: usize> Drop for BlockPool<T, BLOCK_CAPACITY> {
    fn drop(&mut self) {
        let live_items = self.len();

        // Unlink one block at a time so that a long list does not recurse through `Box` drops.
        let mut next = self.head.take();

        while let Some(mut block) = next {
            next = block.take_next();
        }

        if live_items > 0 && self.drop_policy == DropPolicy::MayLeakItems {
            debug!(
                live_items,
                item_type = type_name::<T>(),
                "dropped pool with live objects, their destructors will not run"
            );
        }

        // We do this check at the end so we clean up the memory first.
        //
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustNotLeakItems && !thread::panicking() {
            assert!(
                live_items == 0,
                "dropped a BlockPool of {} with {live_items} live objects - this is forbidden by DropPolicy::MustNotLeakItems",
                type_name::<T>()
            );
        }
    }
}

impl<T, const BLOCK_CAPACITY: usize> fmt::Debug for BlockPool<T, BLOCK_CAPACITY> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("block_capacity", &BLOCK_CAPACITY)
            .field("block_count", &self.block_count)
            .field("len", &self.len())
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}
