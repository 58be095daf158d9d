//! Lease engine: locks, semaphores and handles over any [`LeaseStore`].
//!
//! The engine owns the acquisition protocol (read, then one conditional
//! write), fencing token issuance, retry with backoff, and background renewal.
//! Storage backends only implement the two-operation [`LeaseStore`] contract.
//!
//! [`LeaseStore`]: leasehold_core::store::LeaseStore

pub mod backoff;
mod coordinator;
pub mod fencing;
pub mod handle;
pub mod lock;
pub mod provider;
pub mod semaphore;

pub use backoff::{backoff_delay, next_backoff};
pub use fencing::{FencingGuard, StaleFencingToken};
pub use handle::LeaseHandle;
pub use lock::LeaseLock;
pub use provider::{LeaseLockProvider, LeaseLockProviderBuilder};
pub use semaphore::LeaseSemaphore;

/// A holder id unique to this call: process id plus a random uuid.
pub fn new_holder_id() -> String {
    format!("{}-{}", std::process::id(), uuid::Uuid::new_v4())
}
