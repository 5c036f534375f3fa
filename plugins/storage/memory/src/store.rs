use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use shift_api::{ApiError, KeyedStore, RecordKey, StoredRecord};

use crate::journal::MemoryJournal;

/// In-memory keyed store with an optional change journal.
///
/// Every effective mutation is journaled while the map lock is held, so the
/// journal order of a key matches the order its writes were applied.
/// Removing an absent key is not journaled.
pub struct MemoryStore {
    name: String,
    data: RwLock<HashMap<RecordKey, Vec<u8>>>,
    journal: Option<MemoryJournal>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(HashMap::new()),
            journal: None,
            available: AtomicBool::new(true),
        }
    }

    pub fn with_journal(name: impl Into<String>, journal: MemoryJournal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn journal(&self) -> Option<&MemoryJournal> {
        self.journal.as_ref()
    }

    /// Simulate an outage: while unavailable every operation fails with
    /// `ErrorKind::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::debug!(store = %self.name, available, "store availability changed");
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check_available(&self) -> Result<(), ApiError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ApiError::unavailable(format!("store '{}' unreachable", self.name)))
        }
    }
}

impl KeyedStore for MemoryStore {
    fn get(
        &self,
        key: &RecordKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>, ApiError>> + Send + '_>> {
        let key = key.clone();
        Box::pin(async move {
            self.check_available()?;
            Ok(self.data.read().await.get(&key).cloned())
        })
    }

    fn put(
        &self,
        key: RecordKey,
        value: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut data = self.data.write().await;
            if let Some(ref journal) = self.journal {
                journal.append(key.clone(), Some(value.clone()));
            }
            data.insert(key, value);
            Ok(())
        })
    }

    fn remove(
        &self,
        key: &RecordKey,
    ) -> Pin<Box<dyn Future<Output = Result<(), ApiError>> + Send + '_>> {
        let key = key.clone();
        Box::pin(async move {
            self.check_available()?;
            let mut data = self.data.write().await;
            if data.remove(&key).is_some() {
                if let Some(ref journal) = self.journal {
                    journal.append(key, None);
                }
            }
            Ok(())
        })
    }

    fn scan(&self) -> Pin<Box<dyn Future<Output = Result<Vec<StoredRecord>, ApiError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let data = self.data.read().await;
            Ok(data
                .iter()
                .map(|(key, value)| StoredRecord {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect())
        })
    }
}
