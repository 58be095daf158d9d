//! Persisted lease records and the views built from them.

use serde::{Deserialize, Serialize};

/// A lease as stored in the backing store.
///
/// One record exists per protected resource, or per permit slot of a
/// semaphore. Records are never deleted: a released lease keeps its
/// `fencing_token` and `version` so the counters keep increasing for the
/// next holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub resource_id: String,
    /// Empty once released.
    pub holder_id: String,
    pub fencing_token: u64,
    pub version: u64,
    /// Unix milliseconds. `0` marks a released lease.
    pub expires_at_ms: u64,
    /// Permit count, set only on a semaphore's meta record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_permits: Option<u32>,
}

impl LeaseRecord {
    /// Builds the record that replaces `previous` for a new holder.
    pub fn granted(
        resource_id: &str,
        holder_id: &str,
        previous: Option<&LeaseRecord>,
        expires_at_ms: u64,
    ) -> Self {
        let (version, fencing_token) = previous
            .map(|p| (p.version, p.fencing_token))
            .unwrap_or((0, 0));
        Self {
            resource_id: resource_id.to_string(),
            holder_id: holder_id.to_string(),
            fencing_token: fencing_token.saturating_add(1),
            version: version.saturating_add(1),
            expires_at_ms,
            max_permits: None,
        }
    }

    /// The record pinning a semaphore's permit count. It never holds a lease.
    pub fn semaphore_meta(resource_id: &str, max_permits: u32) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            holder_id: String::new(),
            fencing_token: 0,
            version: 1,
            expires_at_ms: 0,
            max_permits: Some(max_permits),
        }
    }

    /// Same holder and token, pushed-out expiry.
    pub fn renewed(&self, expires_at_ms: u64) -> Self {
        Self {
            version: self.version.saturating_add(1),
            expires_at_ms,
            ..self.clone()
        }
    }

    /// Vacated record that still carries the counters.
    pub fn released(&self) -> Self {
        Self {
            holder_id: String::new(),
            version: self.version.saturating_add(1),
            expires_at_ms: 0,
            ..self.clone()
        }
    }

    /// Expired records are logically absent: any contender may take them over.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }

    pub fn is_held_by(&self, holder_id: &str, now_ms: u64) -> bool {
        !self.is_expired(now_ms) && self.holder_id == holder_id
    }
}

/// One active permit of a semaphore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitEntry {
    pub slot: u32,
    pub holder_id: String,
    pub fencing_token: u64,
    pub expires_at_ms: u64,
}

/// Snapshot of a semaphore as observed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemaphoreState {
    pub resource_id: String,
    pub max_permits: u32,
    pub entries: Vec<PermitEntry>,
}

impl SemaphoreState {
    pub fn available_permits(&self) -> u32 {
        let used = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.max_permits.saturating_sub(used)
    }
}
