//! User settings persistence.
//!
//! Stores gateway preferences in `~/.provider-gateway/config.toml`.
//! Settings are resolved with env var > config.toml > default priority.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Gateway settings persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub store: StoreSettings,

    /// Global network used when the key store has not announced one.
    #[serde(default)]
    pub default_chain: Option<String>,
}

/// Session, approval and handshake timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Lifetime of a session's `connected_at`.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Idle time after the last signing operation before prompts ask for
    /// fresh confirmation.
    #[serde(default = "default_reauth_ttl_secs")]
    pub reauth_ttl_secs: u64,

    /// Per-request approval deadline.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// Grace period for the handshake ack.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Maximum queued requests. 0 = unbounded.
    #[serde(default)]
    pub queue_capacity: usize,
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_reauth_ttl_secs() -> u64 {
    60 * 60
}

fn default_approval_timeout_secs() -> u64 {
    60
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            reauth_ttl_secs: default_reauth_ttl_secs(),
            approval_timeout_secs: default_approval_timeout_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            queue_capacity: 0,
        }
    }
}

/// WebSocket listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3070
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Session persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// "json" or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Session file for the json backend (default:
    /// `~/.provider-gateway/sessions.json`).
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "json".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

/// Base directory for gateway state (`~/.provider-gateway`).
pub fn gateway_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".provider-gateway")
}

impl Settings {
    /// Default TOML config file path (~/.provider-gateway/config.toml).
    pub fn default_toml_path() -> PathBuf {
        gateway_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &std::path::Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Write a commented TOML config file with current settings.
    pub fn save_toml(&self, path: &std::path::Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# Provider gateway configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             # Run `provider-gateway config init` to regenerate this file.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }

        std::fs::write(path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }

    /// Merge values from `other` into `self`, preferring `other` for
    /// fields that differ from the default.
    pub fn merge_from(&mut self, other: &Self) {
        let default_json = match serde_json::to_value(Self::default()) {
            Ok(v) => v,
            Err(_) => return,
        };
        let other_json = match serde_json::to_value(other) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut self_json = match serde_json::to_value(&*self) {
            Ok(v) => v,
            Err(_) => return,
        };

        merge_non_default(&mut self_json, &other_json, &default_json);

        if let Ok(merged) = serde_json::from_value(self_json) {
            *self = merged;
        }
    }

    /// Get a setting value by dotted path (e.g., "gateway.session_ttl_secs").
    pub fn get(&self, path: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;

        for part in path.split('.') {
            current = current.get(part)?;
        }

        match current {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            serde_json::Value::Null => Some("null".to_string()),
            other => serde_json::to_string(other).ok(),
        }
    }

    /// Flatten into `(dotted.path, value)` pairs for display.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Ok(json) = serde_json::to_value(self) {
            collect_settings_json("", &json, &mut out);
        }
        out.sort();
        out
    }
}

fn collect_settings_json(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                collect_settings_json(&path, child, out);
            }
        }
        serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Recursively merge `other` into `target`, but only for fields where
/// `other` differs from `defaults`. This means only explicitly-set values
/// in the TOML file override the base settings.
fn merge_non_default(
    target: &mut serde_json::Value,
    other: &serde_json::Value,
    defaults: &serde_json::Value,
) {
    match (target, other, defaults) {
        (
            serde_json::Value::Object(t),
            serde_json::Value::Object(o),
            serde_json::Value::Object(d),
        ) => {
            for (key, other_val) in o {
                let default_val = d.get(key).cloned().unwrap_or(serde_json::Value::Null);
                if let Some(target_val) = t.get_mut(key) {
                    merge_non_default(target_val, other_val, &default_val);
                } else if other_val != &default_val {
                    t.insert(key.clone(), other_val.clone());
                }
            }
        }
        (target, other, defaults) => {
            if other != defaults {
                *target = other.clone();
            }
        }
    }
}
