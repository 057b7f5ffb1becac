//! Error types for counter accounting operations.
//!
//! [`StoreError`] is what a backing store reports. [`CounterError`] is the
//! taxonomy callers see: the aggregate layer maps store failures into it and
//! attaches the interface/hook context needed to diagnose them.

use std::io;
use thiserror::Error;

use crate::record::CounterKey;

/// Result type alias for counter operations.
pub type CounterResult<T> = Result<T, CounterError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a [`CounterStore`](crate::store::CounterStore) backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has no entry for the requested key.
    #[error("No entry for {0}")]
    NotFound(String),

    /// A backend call failed (syscall, lock, I/O).
    #[error("Store operation failed: {operation}: {message}")]
    Backend {
        /// The operation that failed (e.g., "lookup", "update", "iterate").
        operation: String,
        /// Error message.
        message: String,
    },

    /// The backend returned data that does not match the shared layout.
    #[error("Unexpected value layout: {0}")]
    Layout(String),

    /// Some replicas of a record were zeroed and some were not.
    #[error("Replicas {failed_replicas:?} of {total} not zeroed: {reason}")]
    PartialWrite {
        /// Indices of replicas left untouched.
        failed_replicas: Vec<usize>,
        /// Number of replicas in the record.
        total: usize,
        /// First underlying cause.
        reason: String,
    },
}

impl StoreError {
    /// Creates a backend error.
    pub fn backend(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Errors that can occur while reading, flushing or dumping counters.
#[derive(Debug, Error)]
pub enum CounterError {
    /// A required argument was missing or empty.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The store has no usable entry for the key.
    #[error("Failed to read counters for {key}: {reason}")]
    Read {
        /// The record that could not be read.
        key: CounterKey,
        /// Underlying cause.
        reason: String,
    },

    /// A record does not match the layout shared with the producer.
    #[error("Counter layout mismatch for {key}: {reason}")]
    Layout {
        /// The record with the bad layout.
        key: CounterKey,
        /// What did not match.
        reason: String,
    },

    /// One or more replicas could not be zeroed.
    #[error(
        "Failed to flush counters for {key}: replicas {failed_replicas:?} failed, \
         {zeroed}/{total} zeroed: {reason}"
    )]
    Write {
        /// The record being flushed.
        key: CounterKey,
        /// Indices of replicas that were not zeroed.
        failed_replicas: Vec<usize>,
        /// Number of replicas that were zeroed.
        zeroed: usize,
        /// Number of replicas attempted.
        total: usize,
        /// First underlying cause.
        reason: String,
    },

    /// Listing interfaces or store keys failed.
    #[error("Failed to enumerate {what}: {reason}")]
    Enumeration {
        /// What was being listed.
        what: String,
        /// Underlying cause.
        reason: String,
    },

    /// Rendering output failed.
    #[error("Failed to write output: {0}")]
    Output(#[from] io::Error),

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CounterError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Creates a read error.
    pub fn read(key: &CounterKey, reason: impl ToString) -> Self {
        Self::Read {
            key: key.clone(),
            reason: reason.to_string(),
        }
    }

    /// Creates a layout error.
    pub fn layout(key: &CounterKey, reason: impl Into<String>) -> Self {
        Self::Layout {
            key: key.clone(),
            reason: reason.into(),
        }
    }

    /// Creates an enumeration error.
    pub fn enumeration(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::Enumeration {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Maps a store read failure for `key` into the counter taxonomy.
    pub fn from_store_read(key: &CounterKey, err: StoreError) -> Self {
        match err {
            StoreError::Layout(reason) => Self::layout(key, reason),
            other => Self::read(key, other),
        }
    }

    /// Maps a store flush failure for `key`, a record of `total` replicas.
    ///
    /// Anything but a partial write means no replica was zeroed.
    pub fn from_store_write(key: &CounterKey, total: usize, err: StoreError) -> Self {
        match err {
            StoreError::PartialWrite {
                failed_replicas,
                total,
                reason,
            } => Self::Write {
                key: key.clone(),
                zeroed: total.saturating_sub(failed_replicas.len()),
                total,
                failed_replicas,
                reason,
            },
            other => Self::Write {
                key: key.clone(),
                failed_replicas: (0..total).collect(),
                zeroed: 0,
                total,
                reason: other.to_string(),
            },
        }
    }

    /// Returns the record key this error refers to, if any.
    pub fn key(&self) -> Option<&CounterKey> {
        match self {
            Self::Read { key, .. } | Self::Layout { key, .. } | Self::Write { key, .. } => Some(key),
            _ => None,
        }
    }
}
