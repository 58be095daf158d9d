use leasehold_core::error::StorageError;
use leasehold_core::record::LeaseRecord;
use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};

/// One lease record as stored in MongoDB. `_id` is the lease key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseDocument {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "resourceId")]
    pub resource_id: String,

    #[serde(rename = "holderId")]
    pub holder_id: String,

    #[serde(rename = "fencingToken")]
    pub fencing_token: i64,

    pub version: i64,

    /// The epoch for a released lease.
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime,

    /// Present on semaphore meta documents only.
    #[serde(rename = "maxPermits", default, skip_serializing_if = "Option::is_none")]
    pub max_permits: Option<i64>,
}

impl LeaseDocument {
    pub fn from_record(key: &str, record: &LeaseRecord) -> Result<Self, StorageError> {
        Ok(Self {
            id: key.to_string(),
            resource_id: record.resource_id.clone(),
            holder_id: record.holder_id.clone(),
            fencing_token: to_i64("fencingToken", record.fencing_token)?,
            version: to_i64("version", record.version)?,
            expires_at: DateTime::from_millis(to_i64("expiresAt", record.expires_at_ms)?),
            max_permits: record.max_permits.map(i64::from),
        })
    }

    pub fn into_record(self) -> Result<LeaseRecord, StorageError> {
        let max_permits = self
            .max_permits
            .map(|n| {
                u32::try_from(n).map_err(|_| {
                    StorageError::corrupt(format!("document '{}' has maxPermits {n}", self.id))
                })
            })
            .transpose()?;
        Ok(LeaseRecord {
            fencing_token: to_u64(&self.id, "fencingToken", self.fencing_token)?,
            version: to_u64(&self.id, "version", self.version)?,
            expires_at_ms: to_u64(&self.id, "expiresAt", self.expires_at.timestamp_millis())?,
            resource_id: self.resource_id,
            holder_id: self.holder_id,
            max_permits,
        })
    }
}

fn to_i64(field: &str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value)
        .map_err(|_| StorageError::corrupt(format!("{field} {value} does not fit a BSON int64")))
}

fn to_u64(id: &str, field: &str, value: i64) -> Result<u64, StorageError> {
    u64::try_from(value)
        .map_err(|_| StorageError::corrupt(format!("document '{id}' has negative {field} {value}")))
}
