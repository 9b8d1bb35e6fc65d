use thiserror::Error;

/// Errors that can occur when managing the blocks of a [`BlockPool`][crate::BlockPool] or
/// returning objects to it.
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The caller asked for zero blocks to be added, removed or initially reserved.
    ///
    /// The pool is left unchanged.
    #[error("block count must be non-zero")]
    InvalidBlockCount,

    /// The caller attempted to release an object whose address does not fall within any block
    /// owned by the pool. It may have come from a different pool or from outside any pool.
    ///
    /// The pool is left unchanged.
    #[error("address {address:#x} is not owned by this pool")]
    UnownedAddress {
        /// The address that was passed to the pool.
        address: usize,
    },
}

/// A specialized `Result` type for block pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn unowned_address_formats_as_hex() {
        let error = Error::UnownedAddress { address: 0xbeef };

        assert_eq!(error.to_string(), "address 0xbeef is not owned by this pool");
    }

    #[test]
    fn invalid_block_count_is_error() {
        let result: Result<()> = Err(Error::InvalidBlockCount);

        assert_eq!(result, Err(Error::InvalidBlockCount));
        assert_eq!(
            Error::InvalidBlockCount.to_string(),
            "block count must be non-zero"
        );
    }
}
