//! Contract layer for store-backed distributed leases.
//!
//! Defines the lock and semaphore traits, the error taxonomy, the persisted
//! record types, configuration and the [`LeaseStore`](store::LeaseStore)
//! contract that storage backends implement.

pub mod clock;
pub mod config;
pub mod error;
pub mod prelude;
pub mod record;
pub mod store;
pub mod timeout;
pub mod traits;

pub use error::{LockError, LockResult, StorageError, StorageErrorKind};
pub use prelude::*;
