//! Store-backed distributed mutex.

use std::sync::Arc;
use std::time::Duration;

use leasehold_core::error::{LockError, LockResult};
use leasehold_core::record::LeaseRecord;
use leasehold_core::store::LeaseStore;
use leasehold_core::traits::{DistributedLock, HandleState};
use tokio::sync::watch;
use tracing::{Span, field, instrument};

use crate::coordinator::LeaseCoordinator;
use crate::handle::LeaseHandle;

const KEY_PREFIX: &str = "leasehold:lock:";

/// A distributed lock on one resource, backed by a single lease record.
pub struct LeaseLock<S: LeaseStore> {
    /// Resource id.
    name: String,
    /// Store key of the lease record.
    key: String,
    coordinator: Arc<LeaseCoordinator<S>>,
}

impl<S: LeaseStore> LeaseLock<S> {
    pub(crate) fn new(name: &str, coordinator: Arc<LeaseCoordinator<S>>) -> Self {
        Self {
            name: name.to_string(),
            key: format!("{KEY_PREFIX}{name}"),
            coordinator,
        }
    }

    /// Store key of the lease record.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The live lease on this resource, if any.
    pub async fn current(&self) -> LockResult<Option<LeaseRecord>> {
        let now = self.coordinator.now_ms();
        Ok(self
            .coordinator
            .read(&self.key)
            .await?
            .filter(|record| !record.is_expired(now)))
    }

    /// Releases the lease if `holder_id` holds it. Returns whether anything was released.
    ///
    /// Meant for cleaning up after a cancelled `acquire`, when the caller does
    /// not know whether its write was committed.
    #[instrument(skip(self), fields(lock.name = %self.name, backend = self.coordinator.backend()))]
    pub async fn release_if_held(&self, holder_id: &str) -> LockResult<bool> {
        self.coordinator
            .release_if_held(&self.key, &self.name, holder_id)
            .await
    }

    async fn try_acquire_once(&self, holder_id: &str, ttl: Duration) -> LockResult<LeaseHandle<S>> {
        let record = self
            .coordinator
            .try_grant(&self.key, &self.name, holder_id, ttl)
            .await?;
        Span::current().record("fencing_token", record.fencing_token);
        Ok(LeaseHandle::start(
            self.coordinator.clone(),
            self.key.clone(),
            None,
            record,
            ttl,
        ))
    }

    async fn acquire_inner(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> LockResult<LeaseHandle<S>> {
        validate_names(&self.name, holder_id)?;
        let ttl = self.coordinator.resolve_ttl(ttl)?;
        Span::current().record("state", field::display(HandleState::Acquiring));

        let result = self
            .coordinator
            .retry(&self.name, deadline, cancel, || {
                self.try_acquire_once(holder_id, ttl)
            })
            .await;
        record_outcome(&result);
        result
    }
}

impl<S: LeaseStore> DistributedLock for LeaseLock<S> {
    type Handle = LeaseHandle<S>;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(lock.name = %self.name, backend = self.coordinator.backend(), state = field::Empty, fencing_token = field::Empty))]
    async fn try_acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> LockResult<Self::Handle> {
        validate_names(&self.name, holder_id)?;
        let ttl = self.coordinator.resolve_ttl(ttl)?;
        let result = self.try_acquire_once(holder_id, ttl).await;
        record_outcome(&result);
        result
    }

    #[instrument(skip(self), fields(lock.name = %self.name, backend = self.coordinator.backend(), state = field::Empty, fencing_token = field::Empty))]
    async fn acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
    ) -> LockResult<Self::Handle> {
        self.acquire_inner(holder_id, ttl, deadline, None).await
    }

    #[instrument(skip(self, cancel), fields(lock.name = %self.name, backend = self.coordinator.backend(), state = field::Empty, fencing_token = field::Empty))]
    async fn acquire_cancellable(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<Self::Handle> {
        self.acquire_inner(holder_id, ttl, deadline, Some(cancel)).await
    }
}

pub(crate) fn validate_names(resource_id: &str, holder_id: &str) -> LockResult<()> {
    if resource_id.trim().is_empty() {
        return Err(LockError::InvalidName("resource id must not be empty".to_string()));
    }
    if holder_id.trim().is_empty() {
        return Err(LockError::InvalidName("holder id must not be empty".to_string()));
    }
    Ok(())
}

/// Records the acquisition outcome on the current span.
pub(crate) fn record_outcome<T>(result: &LockResult<T>) {
    let span = Span::current();
    match result {
        Ok(_) => {
            span.record("state", field::display(HandleState::Held));
        }
        Err(LockError::Contention { .. }) | Err(LockError::Timeout(_)) => {
            span.record("state", field::display(HandleState::Unacquired));
        }
        Err(e) => {
            span.record("state", field::display(HandleState::Unacquired));
            tracing::debug!(error = %e, "acquisition failed");
        }
    }
}
