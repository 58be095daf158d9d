//! MongoDB lease store.
//!
//! Each lease key maps to one document whose `_id` is the key. Conditional
//! writes are single-document operations: an insert for a key that must not
//! exist yet (a duplicate key error means someone else inserted first), and a
//! `replace_one` filtered on `_id` and `version` otherwise.

pub mod document;
pub mod options;
pub mod store;

pub use document::LeaseDocument;
pub use options::{DEFAULT_COLLECTION, MongoLeaseStoreOptions};
pub use store::MongoLeaseStore;
