/// Collection used when none is configured.
pub const DEFAULT_COLLECTION: &str = "leasehold_leases";

#[derive(Debug, Clone)]
pub struct MongoLeaseStoreOptions {
    /// Collection holding one document per lease key.
    pub collection_name: String,
}

impl Default for MongoLeaseStoreOptions {
    fn default() -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION.to_string(),
        }
    }
}
