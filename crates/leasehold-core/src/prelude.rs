//! Convenience prelude for lease types.

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{LockOptions, RetryPolicy};
pub use crate::error::{LockError, LockResult, StorageError, StorageErrorKind};
pub use crate::record::{LeaseRecord, PermitEntry, SemaphoreState};
pub use crate::store::{CasOutcome, LeaseStore};
pub use crate::traits::{
    DistributedLock, DistributedSemaphore, HandleState, Lease, LockHandle, LockProvider,
    LockProviderExt, SemaphoreProvider,
};
