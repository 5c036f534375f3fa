use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ApiError;
use crate::journal::ChangeJournal;
use crate::record::{RecordKey, StoredRecord};

/// Keyed store contract.
///
/// Last write wins per key. No transactions across keys: every `put` and
/// `remove` is atomic on its own key only.
pub trait KeyedStore: Send + Sync {
    /// Read the current value of `key`.
    fn get(
        &self,
        key: &RecordKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, ApiError>> + Send + '_>>;

    /// Upsert (overwrite) the value of `key`.
    fn put(
        &self,
        key: RecordKey,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;

    /// Remove `key`. Removing an absent key is a no-op.
    fn remove(
        &self,
        key: &RecordKey,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>>;

    /// Snapshot view of all entries, in no particular order.
    ///
    /// Writes that race with the scan may or may not be included.
    fn scan(&self) -> Pin<Box<dyn Future<Output = Result<Vec<StoredRecord>, ApiError>> + Send + '_>>;
}

/// A store plus its change journal, if the store keeps one.
#[derive(Clone)]
pub struct StoreHandle {
    pub store: Arc<dyn KeyedStore>,
    pub journal: Option<Arc<dyn ChangeJournal>>,
}

/// Builds stores from their configuration.
///
/// `config_json` is the store's plugin configuration serialized as JSON,
/// `"{}"` when none was given.
pub trait StoreFactory: Send + Sync {
    fn create(&self, name: &str, config_json: &str) -> Result<StoreHandle, ApiError>;
}
