//! Per-origin session persistence.
//!
//! A session records that the user approved an origin, which key that origin
//! currently sees, and when it last performed a signing operation. Records
//! survive restarts through a [`SessionBackend`]; every read that finds an
//! expired record deletes it before answering, under the same lock that
//! serializes writers.

mod json_file;
mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::keystore::PublicKey;
use crate::network::ChainId;
use crate::origin::Origin;

pub use self::json_file::{JsonFileBackend, default_session_store_path};
pub use self::memory::MemoryBackend;

/// Stored authorization of one origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub origin: Origin,
    pub connected_at: DateTime<Utc>,
    pub last_sensitive_op: DateTime<Utc>,
    pub bound_public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_chain: Option<ChainId>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.connected_at >= ttl
    }

    /// Whether a signing prompt should ask for fresh confirmation.
    pub fn needs_reauth(&self, now: DateTime<Utc>, reauth_ttl: Duration) -> bool {
        now - self.last_sensitive_op > reauth_ttl
    }
}

/// Durable storage for session records. Writes must be atomic per origin.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError>;

    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError>;

    async fn remove(&self, origin: &Origin) -> Result<(), StoreError>;
}

/// Converts a config duration to a chrono span, saturating on overflow.
pub(crate) fn chrono_span(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or_else(|_| Duration::days(365 * 100))
}

/// Single-writer session store in front of a backend.
pub struct SessionStore {
    backend: Arc<dyn SessionBackend>,
    clock: Arc<dyn Clock>,
    session_ttl: Duration,
    records: Mutex<HashMap<Origin, SessionRecord>>,
}

impl SessionStore {
    /// Load all persisted records, dropping the ones that already expired.
    pub async fn open(
        backend: Arc<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
        session_ttl: std::time::Duration,
    ) -> Result<Self, StoreError> {
        let session_ttl = chrono_span(session_ttl);
        let now = clock.now();
        let mut records = HashMap::new();
        for record in backend.load_all().await? {
            if record.is_expired(now, session_ttl) {
                tracing::debug!(origin = %record.origin, "Dropping expired session on load");
                backend.remove(&record.origin).await?;
                continue;
            }
            records.insert(record.origin.clone(), record);
        }
        tracing::info!(count = records.len(), "Session store loaded");
        Ok(Self {
            backend,
            clock,
            session_ttl,
            records: Mutex::new(records),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Live record for `origin`, or `None` if absent or expired.
    ///
    /// An expired record is removed from memory and from the backend before
    /// this returns.
    pub async fn load(&self, origin: &Origin) -> Result<Option<SessionRecord>, StoreError> {
        let mut records = self.records.lock().await;
        let now = self.clock.now();
        let record = match records.get(origin) {
            None => return Ok(None),
            Some(record) => record.clone(),
        };
        if record.is_expired(now, self.session_ttl) {
            records.remove(origin);
            tracing::info!(origin = %origin, "Session expired");
            self.backend.remove(origin).await?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Start (or restart) a session bound to `public_key`.
    ///
    /// A chain preference from an existing record carries over.
    pub async fn connect(
        &self,
        origin: &Origin,
        public_key: &PublicKey,
    ) -> Result<SessionRecord, StoreError> {
        let mut records = self.records.lock().await;
        let now = self.clock.now();
        let preferred_chain = records
            .get(origin)
            .filter(|r| !r.is_expired(now, self.session_ttl))
            .and_then(|r| r.preferred_chain);
        let record = SessionRecord {
            origin: origin.clone(),
            connected_at: now,
            last_sensitive_op: now,
            bound_public_key: public_key.clone(),
            preferred_chain,
        };
        self.backend.upsert(&record).await?;
        records.insert(origin.clone(), record.clone());
        tracing::info!(origin = %origin, key = %public_key, "Session connected");
        Ok(record)
    }

    /// Refresh `last_sensitive_op`. Returns `false` when no live session exists.
    pub async fn update_sensitive_op(&self, origin: &Origin) -> Result<bool, StoreError> {
        let now = self.clock.now();
        self.modify(origin, |record| record.last_sensitive_op = now)
            .await
    }

    pub async fn set_chain_preference(
        &self,
        origin: &Origin,
        chain: ChainId,
    ) -> Result<bool, StoreError> {
        self.modify(origin, |record| record.preferred_chain = Some(chain))
            .await
    }

    /// Record the key this origin has been told about.
    pub async fn set_bound_key(
        &self,
        origin: &Origin,
        public_key: &PublicKey,
    ) -> Result<bool, StoreError> {
        self.modify(origin, |record| {
            record.bound_public_key = public_key.clone()
        })
        .await
    }

    /// Remove the record. Returns whether one existed.
    pub async fn revoke(&self, origin: &Origin) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let existed = records.remove(origin).is_some();
        if existed {
            self.backend.remove(origin).await?;
            tracing::info!(origin = %origin, "Session revoked");
        }
        Ok(existed)
    }

    /// All live sessions, sorted by origin.
    pub async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut records = self.records.lock().await;
        self.purge_expired(&mut records).await?;
        let mut out: Vec<SessionRecord> = records.values().cloned().collect();
        out.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(out)
    }

    async fn modify(
        &self,
        origin: &Origin,
        apply: impl FnOnce(&mut SessionRecord),
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let now = self.clock.now();
        let Some(mut updated) = records.get(origin).cloned() else {
            return Ok(false);
        };
        if updated.is_expired(now, self.session_ttl) {
            records.remove(origin);
            self.backend.remove(origin).await?;
            return Ok(false);
        }
        apply(&mut updated);
        self.backend.upsert(&updated).await?;
        records.insert(origin.clone(), updated);
        Ok(true)
    }

    async fn purge_expired(
        &self,
        records: &mut HashMap<Origin, SessionRecord>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expired: Vec<Origin> = records
            .values()
            .filter(|r| r.is_expired(now, self.session_ttl))
            .map(|r| r.origin.clone())
            .collect();
        for origin in expired {
            records.remove(&origin);
            self.backend.remove(&origin).await?;
            tracing::info!(origin = %origin, "Session expired");
        }
        Ok(())
    }
}
