//! Defines error types.
use thiserror::Error;

/// Crate result type (re-exported),
pub type Result<T> = std::result::Result<T, Error>;

/// Error types.
#[derive(Error, Debug, Eq, PartialEq)]
pub enum Error {
    /// Ring buffer was configured with a capacity outside of `2^1..=2^31`.
    #[error("capacity bits must be within [{min}, {max}], provided: {0}", min = crate::MIN_CAPACITY_BITS, max = crate::MAX_CAPACITY_BITS)]
    InvalidCapacityBits(u32),
    /// Ring buffer was full and the overflow policy asked for the condition to be raised.
    /// When `rejected` is set the item was not stored, otherwise it replaced the oldest unread one.
    #[error("ring buffer overflow, capacity: {capacity}, rejected: {rejected}")]
    Overflow { capacity: usize, rejected: bool },
}

impl Error {
    #[cold]
    #[inline(never)]
    pub(crate) const fn invalid_capacity_bits(bits: u32) -> Error {
        Error::InvalidCapacityBits(bits)
    }

    #[cold]
    #[inline(never)]
    pub(crate) const fn overflow(capacity: usize, rejected: bool) -> Error {
        Error::Overflow { capacity, rejected }
    }
}
