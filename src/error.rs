//! Crate-level errors.
//!
//! # Error Handling Patterns
//!
//! This crate distinguishes three failure classes:
//!
//! ## Fail-Fast (Propagate Errors)
//!
//! Used where a bad input must never produce a silently-wrong distribution:
//! - Configuration validation (invalid spans, zero delay bounds)
//! - Wire decoding (corrupted stream, truncated payload)
//! - Strict-mode backing-map writes against an unowned partition
//!
//! ## Fatal (Panic)
//!
//! Invariant violations inside the balancing engine indicate an impossible
//! topology or an algorithm bug. Continuing would risk an incoherent ownership
//! assignment, so these surface as panics with a descriptive message:
//! - No eligible member found for an endangered backup slot
//! - An out-of-range partition index handed to a `PartitionSet`
//! - Weakening a backup strength that is already node-level
//!
//! ## Best-Effort (Log and Continue)
//!
//! Used where partial failure is an expected operating condition:
//! - Advisory suggestions the manager ignores (tracked, re-suggested)
//! - Non-convergent backup placement (strength downgraded, logged at error)
//! - Lenient-mode backing-map access against an unowned partition

use std::result;
use thiserror::Error as ThisError;

/// Result type for fallible operations in this crate.
pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by configuration, the wire codec, and the storage routing
/// layer.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// Configuration error, raised at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The encoded stream does not follow the expected format.
    #[error("stream corrupted; format={0}")]
    CorruptedStream(u8),

    /// The stream ended before the expected payload was read.
    #[error("truncated stream: needed {needed} more bytes")]
    TruncatedStream {
        /// Number of bytes that were still expected.
        needed: usize,
    },

    /// A value does not fit the wire representation.
    #[error("wire encoding error: {0}")]
    WireEncoding(String),

    /// A write was routed to a partition this map does not hold.
    #[error("partition {partition} is not owned by this map")]
    PartitionNotOwned {
        /// The partition the operation was routed to.
        partition: u32,
    },
}
