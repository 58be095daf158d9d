//! Core traits for store-backed locks and semaphores.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::LockResult;

// ============================================================================
// Handle State
// ============================================================================

/// Lifecycle of a lock handle.
///
/// ```text
/// Unacquired -> Acquiring -> Held -> Releasing -> Released
///                             |  \-> Expired
///                             \----> Lost
/// ```
///
/// Renewal is a self-transition of `Held`. `Released`, `Expired` and `Lost`
/// are terminal: every operation on a terminal handle fails with
/// [`LockError::InvalidHandle`](crate::LockError::InvalidHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    Unacquired,
    Acquiring,
    Held,
    Releasing,
    Released,
    Expired,
    Lost,
}

impl HandleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Expired | Self::Lost)
    }
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unacquired => "unacquired",
            Self::Acquiring => "acquiring",
            Self::Held => "held",
            Self::Releasing => "releasing",
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the lease behind a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub resource_id: String,
    pub holder_id: String,
    pub fencing_token: u64,
    pub version: u64,
    pub expires_at_ms: u64,
}

// ============================================================================
// Lock Handle Trait
// ============================================================================

/// Handle to a held lease.
///
/// Dropping the handle stops background renewal but does not release the
/// lease; it lapses at its expiry. Call `release()` to free the resource
/// immediately.
///
/// # Example
///
/// ```rust,ignore
/// let handle = lock.acquire("worker-1", None, None).await?;
/// write_with_token(handle.fencing_token()).await?;
/// handle.release().await?;
/// ```
pub trait LockHandle: Send + Sync {
    /// Snapshot of the lease as last confirmed by the store.
    fn lease(&self) -> Lease;

    /// Current lifecycle state.
    fn state(&self) -> HandleState;

    /// Fencing token issued at acquisition. Renewal never changes it.
    fn fencing_token(&self) -> u64 {
        self.lease().fencing_token
    }

    /// Returns a receiver that flips to `true` when the lease is lost.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let mut lost = handle.lost_token().clone();
    /// tokio::select! {
    ///     _ = lost.changed() => {
    ///         eprintln!("lease lost, abandoning work");
    ///     }
    ///     _ = do_work() => {}
    /// }
    /// ```
    fn lost_token(&self) -> &watch::Receiver<bool>;

    /// Extends the lease to `ttl` from now (`None` uses the configured default).
    ///
    /// * `Err(LockError::LeaseExpired)` - the lease already lapsed; the handle is dead
    /// * `Err(LockError::InvalidHandle)` - the store moved on, or the handle is terminal
    fn renew(&self, ttl: Option<Duration>) -> impl Future<Output = LockResult<Lease>> + Send;

    /// Releases the lease.
    ///
    /// Succeeds once. Any later call returns `InvalidHandle` without touching
    /// the store.
    fn release(&self) -> impl Future<Output = LockResult<()>> + Send;
}

// ============================================================================
// Distributed Lock Trait
// ============================================================================

/// A distributed mutual exclusion lock on one named resource.
///
/// # Example
///
/// ```rust,ignore
/// let lock = provider.create_lock("job-42");
/// match lock.try_acquire("worker-a", Some(Duration::from_secs(10))).await {
///     Ok(handle) => { /* exclusive until release or expiry */ }
///     Err(LockError::Contention { .. }) => { /* someone else has it */ }
///     Err(e) => return Err(e),
/// }
/// ```
pub trait DistributedLock: Send + Sync {
    /// The handle type returned when the lock is acquired.
    type Handle: LockHandle;

    /// Returns the resource id this lock protects.
    fn name(&self) -> &str;

    /// Makes a single acquisition attempt.
    ///
    /// * `Ok(handle)` - lease granted
    /// * `Err(LockError::Contention)` - validly held by someone else
    /// * `Err(LockError::Storage)` - backend failure
    fn try_acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;

    /// Retries `try_acquire` under the retry policy.
    ///
    /// `deadline = None` uses the configured `acquire_deadline`.
    ///
    /// * `Err(LockError::Timeout)` - deadline or attempt limit reached under contention
    /// * `Err(LockError::Storage)` - storage kept failing until the limit
    fn acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;

    /// Like `acquire`, but returns `Err(LockError::Cancelled)` promptly once
    /// `cancel` becomes `true`.
    ///
    /// A cancelled acquire may still have committed its write. Callers should
    /// treat cancellation as "maybe acquired" and release defensively.
    fn acquire_cancellable(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;
}

// ============================================================================
// Semaphore Trait
// ============================================================================

/// A distributed counting semaphore.
///
/// At most `max_permits` holders own a permit at any store-observed instant.
///
/// # Example
///
/// ```rust,ignore
/// let pool = provider.create_semaphore("db-pool", 5);
/// let permit = pool.acquire("worker-7", None, None).await?;
/// use_database_connection().await;
/// permit.release().await?;
/// ```
pub trait DistributedSemaphore: Send + Sync {
    /// Handle type for a held permit.
    type Handle: LockHandle;

    /// Returns the resource id of this semaphore.
    fn name(&self) -> &str;

    /// Returns the maximum number of concurrent holders.
    fn max_permits(&self) -> u32;

    /// Claims any free permit, or fails with `Contention`.
    fn try_acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;

    /// Retries `try_acquire` under the retry policy.
    fn acquire(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;

    /// Cancellable form of `acquire`.
    fn acquire_cancellable(
        &self,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> impl Future<Output = LockResult<Self::Handle>> + Send;
}

// ============================================================================
// Provider Traits
// ============================================================================

/// Factory for creating distributed locks by resource id.
///
/// Providers carry the store and configuration so application code only
/// deals in resource names.
pub trait LockProvider: Send + Sync {
    /// The lock type created by this provider.
    type Lock: DistributedLock;

    /// Creates a lock for the given resource id.
    fn create_lock(&self, name: &str) -> Self::Lock;
}

/// Factory for creating semaphores by resource id.
pub trait SemaphoreProvider: Send + Sync {
    /// The semaphore type created by this provider.
    type Semaphore: DistributedSemaphore;

    /// Creates a semaphore with the given resource id and permit count.
    fn create_semaphore(&self, name: &str, max_permits: u32) -> Self::Semaphore;
}

// ============================================================================
// Convenience Extensions
// ============================================================================

/// Extension trait providing convenience methods for lock providers.
pub trait LockProviderExt: LockProvider {
    /// Creates the lock for `name` and blocks until it is acquired.
    fn acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Option<Duration>,
        deadline: Option<Duration>,
    ) -> impl Future<Output = LockResult<<Self::Lock as DistributedLock>::Handle>> + Send
    where
        Self: Sync,
    {
        async move {
            let lock = self.create_lock(name);
            lock.acquire(holder_id, ttl, deadline).await
        }
    }

    /// Creates the lock for `name` and makes one acquisition attempt.
    fn try_acquire_lock(
        &self,
        name: &str,
        holder_id: &str,
        ttl: Option<Duration>,
    ) -> impl Future<Output = LockResult<<Self::Lock as DistributedLock>::Handle>> + Send
    where
        Self: Sync,
    {
        async move {
            let lock = self.create_lock(name);
            lock.try_acquire(holder_id, ttl).await
        }
    }
}

// Blanket implementation for all LockProviders
impl<T: LockProvider> LockProviderExt for T {}
