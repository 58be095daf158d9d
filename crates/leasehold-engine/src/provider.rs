//! Lease provider: binds a store, a clock and options together.

use std::sync::Arc;
use std::time::Duration;

use leasehold_core::clock::{Clock, SystemClock};
use leasehold_core::config::LockOptions;
use leasehold_core::error::LockResult;
use leasehold_core::store::LeaseStore;
use leasehold_core::traits::{LockProvider, SemaphoreProvider};

use crate::coordinator::LeaseCoordinator;
use crate::lock::LeaseLock;
use crate::semaphore::LeaseSemaphore;

/// Builder for lease provider configuration.
pub struct LeaseLockProviderBuilder<S: LeaseStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    options: LockOptions,
}

impl<S: LeaseStore> LeaseLockProviderBuilder<S> {
    /// Creates a builder with default options and the system clock.
    pub fn new(store: S) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Creates a builder over a store that is shared with other code.
    pub fn from_shared(store: Arc<S>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            options: LockOptions::default(),
        }
    }

    /// Replaces the clock used for expiry decisions.
    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Replaces all options at once.
    pub fn options(mut self, options: LockOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the lease length used when an operation passes no ttl.
    pub fn ttl_default(mut self, ttl: Duration) -> Self {
        self.options.ttl_default = ttl;
        self
    }

    /// Sets the total number of attempts of a blocking acquire.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.options.retry.max_attempts = attempts;
        self
    }

    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.options.retry.base_backoff = backoff;
        self
    }

    pub fn backoff_cap(mut self, cap: Duration) -> Self {
        self.options.retry.backoff_cap = cap;
        self
    }

    /// Sets the relative jitter applied to each backoff, in `[0, 1]`.
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.options.retry.jitter_ratio = ratio;
        self
    }

    /// Sets the deadline used by `acquire` when the caller passes none.
    pub fn acquire_deadline(mut self, deadline: Duration) -> Self {
        self.options.retry.acquire_deadline = Some(deadline);
        self
    }

    /// Sets the upper bound on a single store call.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.options.store_timeout = timeout;
        self
    }

    /// Enables or disables background renewal of held leases.
    pub fn auto_renew(mut self, enabled: bool) -> Self {
        self.options.auto_renew = enabled;
        self
    }

    /// Validates the options and builds the provider.
    pub fn build(self) -> LockResult<LeaseLockProvider<S>> {
        self.options.validate()?;
        Ok(LeaseLockProvider {
            coordinator: Arc::new(LeaseCoordinator::new(self.store, self.clock, self.options)),
        })
    }
}

/// Provider for store-backed locks and semaphores.
///
/// Cheap to clone; clones share the store and configuration.
pub struct LeaseLockProvider<S: LeaseStore> {
    coordinator: Arc<LeaseCoordinator<S>>,
}

impl<S: LeaseStore> LeaseLockProvider<S> {
    /// Returns a new builder for configuring the provider.
    pub fn builder(store: S) -> LeaseLockProviderBuilder<S> {
        LeaseLockProviderBuilder::new(store)
    }

    /// Creates a provider with default options.
    pub fn new(store: S) -> LockResult<Self> {
        Self::builder(store).build()
    }

    pub fn options(&self) -> &LockOptions {
        self.coordinator.options()
    }

    pub fn backend(&self) -> &'static str {
        self.coordinator.backend()
    }
}

impl<S: LeaseStore> Clone for LeaseLockProvider<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: LeaseStore> LockProvider for LeaseLockProvider<S> {
    type Lock = LeaseLock<S>;

    fn create_lock(&self, name: &str) -> Self::Lock {
        LeaseLock::new(name, self.coordinator.clone())
    }
}

impl<S: LeaseStore> SemaphoreProvider for LeaseLockProvider<S> {
    type Semaphore = LeaseSemaphore<S>;

    fn create_semaphore(&self, name: &str, max_permits: u32) -> Self::Semaphore {
        LeaseSemaphore::new(name, max_permits, self.coordinator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasehold_core::LockError;
    use leasehold_memory::MemoryLeaseStore;

    #[test]
    fn builder_applies_settings() {
        let provider = LeaseLockProvider::builder(MemoryLeaseStore::new())
            .ttl_default(Duration::from_secs(12))
            .max_attempts(3)
            .base_backoff(Duration::from_millis(10))
            .backoff_cap(Duration::from_millis(100))
            .jitter_ratio(1.0)
            .acquire_deadline(Duration::from_secs(2))
            .store_timeout(Duration::from_millis(500))
            .auto_renew(false)
            .build()
            .unwrap();

        let options = provider.options();
        assert_eq!(options.ttl_default, Duration::from_secs(12));
        assert_eq!(options.retry.max_attempts, 3);
        assert_eq!(options.retry.acquire_deadline, Some(Duration::from_secs(2)));
        assert_eq!(options.store_timeout, Duration::from_millis(500));
        assert!(!options.auto_renew);
        assert_eq!(provider.backend(), "memory");
    }

    #[test]
    fn build_rejects_invalid_options() {
        let result = LeaseLockProvider::builder(MemoryLeaseStore::new())
            .max_attempts(0)
            .build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));

        let result = LeaseLockProvider::builder(MemoryLeaseStore::new())
            .jitter_ratio(1.5)
            .build();
        assert!(matches!(result, Err(LockError::InvalidConfig(_))));
    }
}
