//! Error types for the allocator and its configuration.

use thiserror::Error;

/// Failures surfaced by the allocation operations.
///
/// Every failure bottoms out in the fallback layer: the pool never swallows
/// an `OutOfMemory`, it only tries to avoid one by salvaging free blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The system allocator could not supply memory and either no handler
    /// was installed or the handler retry budget ran out.
    #[error("out of memory: {requested} bytes unavailable after {handler_calls} handler call(s)")]
    OutOfMemory {
        /// Byte count of the request that failed.
        requested: usize,
        /// Number of out-of-memory handler invocations made for this request.
        handler_calls: u32,
    },
    /// Element count times element size does not fit in `usize`.
    #[error("allocation of {count} elements of {elem_size} bytes overflows usize")]
    CapacityOverflow { count: usize, elem_size: usize },
    /// The element type needs stricter alignment than the pool hands out.
    #[error("alignment {align} exceeds the supported maximum of {max}")]
    UnsupportedAlignment { align: usize, max: usize },
}

impl AllocError {
    /// Returns true for the out-of-memory variant.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Errors raised while building a [`PoolConfig`](crate::config::PoolConfig).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key}: expected an unsigned integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("batch size must be at least 1")]
    ZeroBatch,
    #[error("out-of-memory retry limit must be at least 1")]
    ZeroRetryLimit,
}
