//! Error types for lease operations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during lock and semaphore operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// The resource is validly held by another holder.
    #[error("resource '{resource}' is held by another holder")]
    Contention { resource: String },

    /// Renewal was attempted after the lease already lapsed at the store.
    #[error("lease on '{resource}' has expired")]
    LeaseExpired { resource: String },

    /// The handle no longer matches the store, or is in a terminal state.
    #[error("invalid lock handle: {0}")]
    InvalidHandle(String),

    /// Backing store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Lock acquisition gave up before the resource became available.
    #[error("lock acquisition timed out after {0:?}")]
    Timeout(Duration),

    /// Lock operation was cancelled by the caller.
    #[error("lock operation was cancelled")]
    Cancelled,

    /// Invalid resource or holder name.
    #[error("invalid lock name: {0}")]
    InvalidName(String),

    /// Configuration values were rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LockError {
    pub fn contention(resource: impl Into<String>) -> Self {
        Self::Contention {
            resource: resource.into(),
        }
    }

    pub fn lease_expired(resource: impl Into<String>) -> Self {
        Self::LeaseExpired {
            resource: resource.into(),
        }
    }

    /// Whether a blocking acquire should back off and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::Storage(_))
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Classification of a storage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The store could not be reached or rejected the request.
    Unavailable,
    /// The call did not complete in time. The write may or may not have been applied.
    TimedOut,
    /// A stored document could not be decoded.
    Corrupt,
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::TimedOut => "timed out",
            Self::Corrupt => "corrupt record",
        };
        f.write_str(s)
    }
}

/// Failure reported by a [`LeaseStore`](crate::store::LeaseStore) backend.
#[derive(Error, Debug)]
#[error("storage {kind}: {message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps a backend client error.
    pub fn backend(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: StorageErrorKind::Unavailable,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wraps a backend error after which a write may or may not have been applied.
    pub fn indeterminate(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind: StorageErrorKind::TimedOut,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            StorageErrorKind::TimedOut,
            format!("store call did not complete within {after:?}"),
        )
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Corrupt, message)
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// True when the outcome of a write is unknown and the record must be re-read.
    pub fn is_indeterminate(&self) -> bool {
        self.kind == StorageErrorKind::TimedOut
    }
}
