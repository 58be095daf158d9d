//! Lease handle and its background renewal task.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use leasehold_core::error::{LockError, LockResult};
use leasehold_core::record::LeaseRecord;
use leasehold_core::store::LeaseStore;
use leasehold_core::traits::{HandleState, Lease, LockHandle};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::coordinator::LeaseCoordinator;

/// Shortest pause between two renewal attempts.
const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle for a held lease (a lock, or one permit of a semaphore).
///
/// While the handle is `Held` and auto-renewal is enabled, a background task
/// extends the lease at half its remaining lifetime. Dropping the handle stops
/// that task; the lease then lapses on its own.
pub struct LeaseHandle<S: LeaseStore> {
    shared: Arc<HandleShared<S>>,
    lost_receiver: watch::Receiver<bool>,
}

struct HandleShared<S: LeaseStore> {
    coordinator: Arc<LeaseCoordinator<S>>,
    key: String,
    /// Permit slot, for semaphore handles.
    slot: Option<u32>,
    /// Extension applied by background renewal.
    ttl: Duration,
    view: Mutex<HandleView>,
    /// Serializes store operations issued through this handle.
    op_lock: tokio::sync::Mutex<()>,
    renewal: Mutex<Option<JoinHandle<()>>>,
    lost_sender: watch::Sender<bool>,
}

struct HandleView {
    state: HandleState,
    record: LeaseRecord,
}

impl<S: LeaseStore> LeaseHandle<S> {
    /// Wraps a freshly granted record and starts renewal if configured.
    pub(crate) fn start(
        coordinator: Arc<LeaseCoordinator<S>>,
        key: String,
        slot: Option<u32>,
        record: LeaseRecord,
        ttl: Duration,
    ) -> Self {
        let (lost_sender, lost_receiver) = watch::channel(false);
        let auto_renew = coordinator.options().auto_renew;
        let shared = Arc::new(HandleShared {
            coordinator,
            key,
            slot,
            ttl,
            view: Mutex::new(HandleView {
                state: HandleState::Held,
                record,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            renewal: Mutex::new(None),
            lost_sender,
        });

        if auto_renew {
            HandleShared::spawn_renewal(&shared);
        }

        Self {
            shared,
            lost_receiver,
        }
    }

    /// Store key of the record behind this handle.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Permit slot held, for semaphore handles.
    pub fn slot(&self) -> Option<u32> {
        self.shared.slot
    }

    pub fn resource_id(&self) -> String {
        self.shared.record().resource_id
    }

    pub fn holder_id(&self) -> String {
        self.shared.record().holder_id
    }

    /// Whether a background renewal task is currently scheduled.
    pub fn is_renewing(&self) -> bool {
        lock_unpoisoned(&self.shared.renewal)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl<S: LeaseStore> HandleShared<S> {
    fn view(&self) -> MutexGuard<'_, HandleView> {
        lock_unpoisoned(&self.view)
    }

    fn state(&self) -> HandleState {
        self.view().state
    }

    fn set_state(&self, state: HandleState) {
        self.view().state = state;
    }

    fn record(&self) -> LeaseRecord {
        self.view().record.clone()
    }

    fn lease(&self) -> Lease {
        let record = self.record();
        Lease {
            resource_id: record.resource_id,
            holder_id: record.holder_id,
            fencing_token: record.fencing_token,
            version: record.version,
            expires_at_ms: record.expires_at_ms,
        }
    }

    /// Moves to a terminal failure state and wakes lost-token watchers.
    fn fail(&self, state: HandleState) {
        self.set_state(state);
        let _ = self.lost_sender.send(true);
    }

    fn spawn_renewal(shared: &Arc<Self>) {
        let task = tokio::spawn(Self::run_renewal(shared.clone()));
        if let Some(previous) = lock_unpoisoned(&shared.renewal).replace(task) {
            previous.abort();
        }
    }

    /// Cancels the renewal task and waits for it to finish.
    async fn stop_renewal(&self) {
        let task = lock_unpoisoned(&self.renewal).take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    /// Half of the remaining lease, so a renewal has time to land before expiry.
    fn renewal_delay(&self) -> Duration {
        let remaining_ms = self
            .record()
            .expires_at_ms
            .saturating_sub(self.coordinator.now_ms());
        (Duration::from_millis(remaining_ms) / 2).max(MIN_RENEWAL_INTERVAL)
    }

    async fn run_renewal(shared: Arc<Self>) {
        loop {
            tokio::time::sleep(shared.renewal_delay()).await;

            let _op = shared.op_lock.lock().await;
            if shared.state() != HandleState::Held {
                break;
            }

            match shared.renew_locked(shared.ttl, HandleState::Lost).await {
                Ok(lease) => {
                    debug!(
                        key = %shared.key,
                        version = lease.version,
                        expires_at_ms = lease.expires_at_ms,
                        "lease renewed"
                    );
                }
                Err(LockError::Storage(e)) => {
                    warn!(key = %shared.key, error = %e, "lease renewal failed, retrying");
                }
                Err(e) => {
                    warn!(key = %shared.key, error = %e, "lease lost");
                    break;
                }
            }
        }
    }

    /// Renews under `op_lock`. An expired lease moves the handle to `on_expiry`.
    async fn renew_locked(&self, ttl: Duration, on_expiry: HandleState) -> LockResult<Lease> {
        let record = self.record();

        if record.is_expired(self.coordinator.now_ms()) {
            self.fail(on_expiry);
            return Err(LockError::lease_expired(&record.resource_id));
        }

        let result = self
            .coordinator
            .extend(
                &self.key,
                &record.resource_id,
                &record.holder_id,
                record.version,
                ttl,
            )
            .await;

        match result {
            Ok(renewed) => {
                self.view().record = renewed;
                Ok(self.lease())
            }
            Err(e @ LockError::LeaseExpired { .. }) => {
                self.fail(on_expiry);
                Err(e)
            }
            Err(e @ LockError::InvalidHandle(_)) => {
                self.fail(HandleState::Lost);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl<S: LeaseStore> LockHandle for LeaseHandle<S> {
    fn lease(&self) -> Lease {
        self.shared.lease()
    }

    fn state(&self) -> HandleState {
        self.shared.state()
    }

    fn lost_token(&self) -> &watch::Receiver<bool> {
        &self.lost_receiver
    }

    #[instrument(skip(self), fields(lock.key = %self.shared.key, backend = self.shared.coordinator.backend()))]
    async fn renew(&self, ttl: Option<Duration>) -> LockResult<Lease> {
        let ttl = match ttl {
            Some(ttl) => self.shared.coordinator.resolve_ttl(Some(ttl))?,
            None => self.shared.ttl,
        };

        let _op = self.shared.op_lock.lock().await;
        let state = self.shared.state();
        if state != HandleState::Held {
            return Err(LockError::InvalidHandle(format!(
                "cannot renew a {state} handle"
            )));
        }

        self.shared.renew_locked(ttl, HandleState::Expired).await
    }

    #[instrument(skip(self), fields(lock.key = %self.shared.key, backend = self.shared.coordinator.backend()))]
    async fn release(&self) -> LockResult<()> {
        let shared = &self.shared;
        let _op = shared.op_lock.lock().await;

        let state = shared.state();
        if state != HandleState::Held {
            return Err(LockError::InvalidHandle(format!(
                "cannot release a {state} handle"
            )));
        }

        // Leave Held before the store call so no renewal write can follow it.
        shared.set_state(HandleState::Releasing);
        shared.stop_renewal().await;

        let record = shared.record();
        let result = shared
            .coordinator
            .vacate(
                &shared.key,
                &record.resource_id,
                &record.holder_id,
                record.version,
            )
            .await;

        match result {
            Ok(()) => {
                shared.set_state(HandleState::Released);
                debug!(fencing_token = record.fencing_token, "lease released");
                Ok(())
            }
            Err(e @ LockError::InvalidHandle(_)) => {
                shared.fail(HandleState::Lost);
                Err(e)
            }
            Err(e) => {
                // Store unreachable: still ours, keep it alive so release can be retried.
                shared.set_state(HandleState::Held);
                if shared.coordinator.options().auto_renew {
                    HandleShared::spawn_renewal(shared);
                }
                Err(e)
            }
        }
    }
}

impl<S: LeaseStore> Drop for LeaseHandle<S> {
    fn drop(&mut self) {
        // The lease is not released here; it lapses at its expiry.
        if let Some(task) = lock_unpoisoned(&self.shared.renewal).take() {
            task.abort();
        }
    }
}

impl<S: LeaseStore> std::fmt::Debug for LeaseHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.shared.view();
        f.debug_struct("LeaseHandle")
            .field("key", &self.shared.key)
            .field("state", &view.state)
            .field("fencing_token", &view.record.fencing_token)
            .field("version", &view.record.version)
            .field("expires_at_ms", &view.record.expires_at_ms)
            .finish()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
