//! Error types for the seesaw collector.

use thiserror::Error;

/// All errors that can be produced by heap operations.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The from-space cannot hold the allocation, even after a collection.
    ///
    /// The heap remains consistent after this error: dropping handles and
    /// retrying (or forcing a collection) is a valid recovery path.
    #[error("out of memory: {requested} bytes requested")]
    OutOfMemory {
        /// Total byte footprint of the failed allocation, header included.
        requested: usize,
    },
}

/// Convenient `Result` alias for fallible heap operations.
pub type HeapResult<T> = Result<T, HeapError>;
