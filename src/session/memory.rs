use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::origin::Origin;
use crate::session::{SessionBackend, SessionRecord};

/// Non-durable backend for tests and throwaway gateways.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<Origin, SessionRecord>>,
}

impl MemoryBackend {
    pub fn snapshot(&self) -> HashMap<Origin, SessionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    async fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self.snapshot().into_values().collect())
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.origin.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, origin: &Origin) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(origin);
        Ok(())
    }
}
