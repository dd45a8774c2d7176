//! In-process relay store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{RelayRecord, RelayStateStore, StoreError, StoreResult};

/// Relay store backed by a concurrent map. Records live until taken.
#[derive(Debug, Default)]
pub struct MemoryRelayStateStore {
    records: DashMap<String, RelayRecord>,
}

impl MemoryRelayStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RelayStateStore for MemoryRelayStateStore {
    async fn put(&self, key: &str, record: RelayRecord) -> StoreResult<()> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => Err(StoreError::KeyCollision(key.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn take(&self, key: &str) -> StoreResult<RelayRecord> {
        self.records
            .remove(key)
            .map(|(_, record)| record)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}
