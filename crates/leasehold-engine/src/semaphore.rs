//! Store-backed counting semaphore.
//!
//! A semaphore with `max_permits` permits is `max_permits` independent lease
//! records, one per slot. Acquiring scans the slots from a random start and
//! claims the first vacant one, so contenders spread over the slots instead
//! of all racing for slot 0.
//!
//! The permit count is pinned in a meta record written by the first client
//! that uses the semaphore. Clients configured with a different count get
//! `InvalidConfig`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use leasehold_core::error::{LockError, LockResult, StorageError};
use leasehold_core::record::{LeaseRecord, PermitEntry, SemaphoreState};
use leasehold_core::store::LeaseStore;
use leasehold_core::traits::{DistributedSemaphore, HandleState};
use rand::Rng;
use tokio::sync::watch;
use tracing::{Span, field, instrument, trace};

use crate::coordinator::LeaseCoordinator;
use crate::handle::LeaseHandle;
use crate::lock::{record_outcome, validate_names};

const KEY_PREFIX: &str = "leasehold:semaphore:";

/// A distributed counting semaphore on one resource.
pub struct LeaseSemaphore<S: LeaseStore> {
    name: String,
    max_permits: u32,
    coordinator: Arc<LeaseCoordinator<S>>,
    /// Set once the stored permit count is known to match.
    capacity_confirmed: AtomicBool,
}

impl<S: LeaseStore> LeaseSemaphore<S> {
    pub(crate) fn new(
        name: &str,
        max_permits: u32,
        coordinator: Arc<LeaseCoordinator<S>>,
    ) -> Self {
        Self {
            name: name.to_string(),
            max_permits,
            coordinator,
            capacity_confirmed: AtomicBool::new(false),
        }
    }

    /// Store key of the record holding the permit count.
    pub fn meta_key(&self) -> String {
        format!("{KEY_PREFIX}{}:meta", self.name)
    }

    /// Store key of one permit slot.
    pub fn slot_key(&self, slot: u32) -> String {
        format!("{KEY_PREFIX}{}:{slot}", self.name)
    }

    /// Checks the stored permit count against ours, storing it if absent.
    async fn confirm_capacity(&self) -> LockResult<()> {
        if self.capacity_confirmed.load(Ordering::Acquire) {
            return Ok(());
        }
        if self.max_permits == 0 {
            return Err(LockError::InvalidConfig(format!(
                "semaphore '{}' has no permits",
                self.name
            )));
        }

        let meta = LeaseRecord::semaphore_meta(&self.name, self.max_permits);
        let stored = self
            .coordinator
            .insert_or_read(&self.meta_key(), &meta)
            .await?;

        match stored.max_permits {
            Some(n) if n == self.max_permits => {
                self.capacity_confirmed.store(true, Ordering::Release);
                Ok(())
            }
            Some(n) => Err(LockError::InvalidConfig(format!(
                "semaphore '{}' has {n} permits, not {}",
                self.name, self.max_permits
            ))),
            None => Err(StorageError::corrupt(format!(
                "meta record of semaphore '{}' has no permit count",
                self.name
            ))
            .into()),
        }
    }

    /// Live permits as currently stored.
    pub async fn state(&self) -> LockResult<SemaphoreState> {
        self.confirm_capacity().await?;
        let mut entries = Vec::new();
        for slot in 0..self.max_permits {
            let Some(record) = self.coordinator.read(&self.slot_key(slot)).await? else {
                continue;
            };
            if record.is_expired(self.coordinator.now_ms()) {
                continue;
            }
            entries.push(PermitEntry {
                slot,
                holder_id: record.holder_id,
                fencing_token: record.fencing_token,
                expires_at_ms: record.expires_at_ms,
            });
        }

        Ok(SemaphoreState {
            resource_id: self.name.clone(),
            max_permits: self.max_permits,
            entries,
        })
    }

    /// Releases every permit `holder_id` holds. Returns how many were released.
    #[instrument(skip(self), fields(semaphore.name = %self.name, backend = self.coordinator.backend()))]
    pub async fn release_if_held(&self, holder_id: &str) -> LockResult<u32> {
        self.confirm_capacity().await?;
        let mut released = 0;
        for slot in 0..self.max_permits {
            if self
                .coordinator
                .release_if_held(&self.slot_key(slot), &self.name, holder_id)
                .await?
            {
                released += 1;
            }
        }
        Ok(released)
    }

    fn validate(&self, holder_id: &str) -> LockResult<()> {
        validate_names(&self.name, holder_id)?;
        if self.max_permits == 0 {
            return Err(LockError::InvalidConfig(format!(
                "semaphore '{}' has no permits",
                self.name
            )));
        }
        Ok(())
    }

    /// One pass over all slots.
    ///
    /// A storage error on one slot does not stop the scan. If no slot could be
    /// claimed the last storage error wins over `Contention`, so the caller
    /// retries instead of concluding the semaphore is full.
    async fn try_acquire_once(
        &self,
        holder_id: &str,
        ttl: Duration,
    ) -> LockResult<LeaseHandle<S>> {
        self.confirm_capacity().await?;
        let start = rand::thread_rng().gen_range(0..self.max_permits);
        let mut storage_error: Option<StorageError> = None;

        for offset in 0..self.max_permits {
            let slot = (start + offset) % self.max_permits;
            let key = self.slot_key(slot);

            match self
                .coordinator
                .try_grant(&key, &self.name, holder_id, ttl)
                .await
            {
                Ok(record) => {
                    Span::current().record("fencing_token", record.fencing_token);
                    Span::current().record("slot", slot);
                    return Ok(LeaseHandle::start(
                        self.coordinator.clone(),
                        key,
                        Some(slot),
                        record,
                        ttl,
                    ));
                }
                Err(LockError::Contention { .. }) => {
                    trace!(slot, "permit slot taken");
                }
                Err(LockError::Storage(e)) => {
                    trace!(slot, error = %e, "permit slot unreadable");
                    storage_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        match storage_error {
            Some(e) => Err(e.into()),
            None => Err(LockError::contention(&self.name)),
        }
    }

    async fn acquire_inner(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> LockResult<LeaseHandle<S>> {
        self.validate(holder_id)?;
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

impl<S: LeaseStore> DistributedSemaphore for LeaseSemaphore<S> {
    type Handle = LeaseHandle<S>;

    fn name(&self) -> &str {
        &self.name
    }

    fn max_permits(&self) -> u32 {
        self.max_permits
    }

    #[instrument(skip(self), fields(semaphore.name = %self.name, max_permits = self.max_permits, backend = self.coordinator.backend(), state = field::Empty, slot = field::Empty, fencing_token = field::Empty))]
    async fn try_acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> LockResult<Self::Handle> {
        self.validate(holder_id)?;
        let ttl = self.coordinator.resolve_ttl(ttl)?;
        let result = self.try_acquire_once(holder_id, ttl).await;
        record_outcome(&result);
        result
    }

    #[instrument(skip(self), fields(semaphore.name = %self.name, max_permits = self.max_permits, backend = self.coordinator.backend(), state = field::Empty, slot = field::Empty, fencing_token = field::Empty))]
    async fn acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
    ) -> LockResult<Self::Handle> {
        self.acquire_inner(holder_id, ttl, deadline, None).await
    }

    #[instrument(skip(self, cancel), fields(semaphore.name = %self.name, max_permits = self.max_permits, backend = self.coordinator.backend(), state = field::Empty, slot = field::Empty, fencing_token = field::Empty))]
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
