mod journal;
mod store;

use std::sync::Arc;

use shift_api::{ApiError, ChangeJournal, KeyedStore, StoreFactory, StoreHandle};

pub use journal::MemoryJournal;
pub use store::MemoryStore;

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreConfig
// ═══════════════════════════════════════════════════════════════

fn default_journal_capacity() -> usize {
    100_000
}

#[derive(Debug, serde::Deserialize)]
pub struct MemoryStoreConfig {
    /// Keep a change journal for this store (needed by tail jobs).
    #[serde(default)]
    pub journal: bool,
    /// Number of journal events retained.
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            journal: false,
            journal_capacity: default_journal_capacity(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStoreFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryStoreFactory;

impl MemoryStoreFactory {
    /// Build a journaled store and keep the concrete handles (tests, seeding).
    pub fn journaled(name: &str, capacity: usize) -> (Arc<MemoryStore>, MemoryJournal) {
        let journal = MemoryJournal::new(capacity);
        let store = Arc::new(MemoryStore::with_journal(name, journal.clone()));
        (store, journal)
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn create(&self, name: &str, config_json: &str) -> Result<StoreHandle, ApiError> {
        let config: MemoryStoreConfig = if config_json == "{}" {
            MemoryStoreConfig::default()
        } else {
            serde_json::from_str(config_json)
                .map_err(|e| ApiError::config(format!("memory store '{name}': {e}")))?
        };

        if config.journal {
            let (store, journal) = Self::journaled(name, config.journal_capacity);
            tracing::debug!(store = %name, capacity = config.journal_capacity, "created journaled memory store");
            Ok(StoreHandle {
                store: store as Arc<dyn KeyedStore>,
                journal: Some(Arc::new(journal) as Arc<dyn ChangeJournal>),
            })
        } else {
            tracing::debug!(store = %name, "created memory store");
            Ok(StoreHandle {
                store: Arc::new(MemoryStore::new(name)),
                journal: None,
            })
        }
    }
}
