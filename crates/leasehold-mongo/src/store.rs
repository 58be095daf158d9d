use leasehold_core::error::{LockResult, StorageError};
use leasehold_core::record::LeaseRecord;
use leasehold_core::store::{CasOutcome, LeaseStore};
use mongodb::bson::doc;
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::{Collection, Database};
use tracing::{instrument, trace};

use crate::document::LeaseDocument;
use crate::options::MongoLeaseStoreOptions;

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;

/// A [`LeaseStore`] keeping one document per lease key in a MongoDB collection.
#[derive(Clone)]
pub struct MongoLeaseStore {
    collection: Collection<LeaseDocument>,
}

impl MongoLeaseStore {
    pub fn new(database: &Database, options: Option<MongoLeaseStoreOptions>) -> Self {
        let options = options.unwrap_or_default();
        Self {
            collection: database.collection(&options.collection_name),
        }
    }

    pub fn collection(&self) -> &Collection<LeaseDocument> {
        &self.collection
    }
}

impl LeaseStore for MongoLeaseStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    #[instrument(skip(self), fields(collection = %self.collection.name()))]
    async fn read(&self, key: &str) -> LockResult<Option<LeaseRecord>> {
        let document = self
            .collection
            .find_one(doc! { "_id": key })
            .await
            .map_err(|e| read_error(key, e))?;

        match document {
            Some(document) => Ok(Some(document.into_record()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, record), fields(collection = %self.collection.name(), version = record.version))]
    async fn compare_and_swap_upsert(
        &self,
        key: &str,
        expected_version: Option<u64>,
        record: &LeaseRecord,
    ) -> LockResult<CasOutcome> {
        let document = LeaseDocument::from_record(key, record)?;

        let Some(expected) = expected_version else {
            return match self.collection.insert_one(&document).await {
                Ok(_) => Ok(CasOutcome::Applied),
                Err(e) if is_duplicate_key(&e) => {
                    trace!(key, "document already exists");
                    Ok(CasOutcome::VersionMismatch)
                }
                Err(e) => Err(write_error(key, e).into()),
            };
        };

        let expected = i64::try_from(expected).map_err(|_| {
            StorageError::corrupt(format!("expected version {expected} does not fit a BSON int64"))
        })?;

        let result = self
            .collection
            .replace_one(doc! { "_id": key, "version": expected }, &document)
            .await
            .map_err(|e| write_error(key, e))?;

        if result.matched_count == 0 {
            trace!(key, expected, "version mismatch");
            return Ok(CasOutcome::VersionMismatch);
        }
        Ok(CasOutcome::Applied)
    }
}

fn is_duplicate_key(error: &MongoError) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

fn read_error(key: &str, error: MongoError) -> StorageError {
    match error.kind.as_ref() {
        ErrorKind::BsonDeserialization(_) => {
            StorageError::corrupt(format!("lease document '{key}' could not be decoded: {error}"))
        }
        _ => StorageError::backend(format!("failed to read lease '{key}'"), error),
    }
}

/// A connection dropped mid-write leaves the outcome unknown.
fn write_error(key: &str, error: MongoError) -> StorageError {
    match error.kind.as_ref() {
        ErrorKind::Io(_) => {
            StorageError::indeterminate(format!("write of lease '{key}' interrupted"), error)
        }
        _ => StorageError::backend(format!("failed to write lease '{key}'"), error),
    }
}
