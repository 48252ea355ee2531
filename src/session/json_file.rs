//! Session records kept in a single JSON file.
//!
//! Every write serializes the full map to a sibling temp file and renames it
//! over the original, so a crash leaves either the old or the new file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::origin::Origin;
use crate::session::{SessionBackend, SessionRecord};

const STORE_VERSION: u32 = 1;

/// Get the default session store path (~/.provider-gateway/sessions.json).
pub fn default_session_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".provider-gateway")
        .join("sessions.json")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<Origin, SessionRecord>,
}

pub struct JsonFileBackend {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<Origin, SessionRecord>>>,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<BTreeMap<Origin, SessionRecord>, StoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => {
                return Err(StoreError::Read {
                    path: self.path.display().to_string(),
                    reason: err.to_string(),
                });
            }
        };
        let file: SessionFile = serde_json::from_slice(&data)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", self.path.display())))?;
        Ok(file.sessions)
    }

    async fn write_file(&self, sessions: &BTreeMap<Origin, SessionRecord>) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            path: self.path.display().to_string(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| write_err(format!("failed creating store dir: {e}")))?;
        }

        let file = SessionFile {
            version: STORE_VERSION,
            sessions: sessions.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| write_err(e.to_string()))?;

        // Session origins are not secret, but the file says which sites the
        // user trusts.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| write_err(e.to_string()))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| write_err(e.to_string()))
    }

    async fn with_sessions(
        &self,
        apply: impl FnOnce(&mut BTreeMap<Origin, SessionRecord>),
    ) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let mut sessions = match cache.take() {
            Some(sessions) => sessions,
            None => self.read_file().await?,
        };
        let before = sessions.clone();
        apply(&mut sessions);
        match self.write_file(&sessions).await {
            Ok(()) => {
                *cache = Some(sessions);
                Ok(())
            }
            Err(err) => {
                *cache = Some(before);
                Err(err)
            }
        }
    }
}

#[async_trait]
impl SessionBackend for JsonFileBackend {
    async fn load_all(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let mut cache = self.cache.lock().await;
        let sessions = self.read_file().await?;
        let out = sessions.values().cloned().collect();
        *cache = Some(sessions);
        Ok(out)
    }

    async fn upsert(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.with_sessions(|sessions| {
            sessions.insert(record.origin.clone(), record.clone());
        })
        .await
    }

    async fn remove(&self, origin: &Origin) -> Result<(), StoreError> {
        self.with_sessions(|sessions| {
            sessions.remove(origin);
        })
        .await
    }
}
