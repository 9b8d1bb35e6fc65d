/// Determines what happens when a pool that still contains live objects is dropped.
///
/// A pool never runs the destructors of objects that are still live when the pool is dropped.
/// Their storage is returned to the system and the objects themselves are leaked. The drop
/// policy decides whether that is acceptable.
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
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Live objects are leaked when the pool is dropped. This is the default.
    #[default]
    MayLeakItems,

    /// The pool will panic if it still contains live objects when it is dropped.
    ///
    /// This may be valuable if the objects own resources that must be cleaned up, so every
    /// object has to be released before the pool goes away.
    MustNotLeakItems,
}
