//! Configuration for the provider gateway.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! `./.env` and `~/.provider-gateway/.env` are loaded via dotenvy early in
//! startup.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::network::ChainId;
use crate::session::default_session_store_path;
use crate::settings::Settings;

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub server: ServerConfig,
    pub store: SessionStoreConfig,
}

/// Timing and queue limits for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub session_ttl: Duration,
    pub reauth_ttl: Duration,
    pub approval_timeout: Duration,
    pub handshake_timeout: Duration,
    /// 0 = unbounded.
    pub queue_capacity: usize,
    /// Network reported before the key store announces one.
    pub default_chain: ChainId,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let defaults = Settings::default().gateway;
        Self {
            session_ttl: Duration::from_secs(defaults.session_ttl_secs),
            reauth_ttl: Duration::from_secs(defaults.reauth_ttl_secs),
            approval_timeout: Duration::from_secs(defaults.approval_timeout_secs),
            handshake_timeout: Duration::from_millis(defaults.handshake_timeout_ms),
            queue_capacity: defaults.queue_capacity,
            default_chain: ChainId::default(),
        }
    }
}

impl GatewayConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let gw = &settings.gateway;

        let session_ttl_secs = helpers::require_positive(
            "GATEWAY_SESSION_TTL_SECS",
            helpers::parse_optional_env("GATEWAY_SESSION_TTL_SECS", "a positive integer")?
                .unwrap_or(gw.session_ttl_secs),
        )?;
        let reauth_ttl_secs = helpers::require_positive(
            "GATEWAY_REAUTH_TTL_SECS",
            helpers::parse_optional_env("GATEWAY_REAUTH_TTL_SECS", "a positive integer")?
                .unwrap_or(gw.reauth_ttl_secs),
        )?;
        let approval_timeout_secs = helpers::require_positive(
            "GATEWAY_APPROVAL_TIMEOUT_SECS",
            helpers::parse_optional_env("GATEWAY_APPROVAL_TIMEOUT_SECS", "a positive integer")?
                .unwrap_or(gw.approval_timeout_secs),
        )?;
        let handshake_timeout_ms = helpers::require_positive(
            "GATEWAY_HANDSHAKE_TIMEOUT_MS",
            helpers::parse_optional_env("GATEWAY_HANDSHAKE_TIMEOUT_MS", "a positive integer")?
                .unwrap_or(gw.handshake_timeout_ms),
        )?;
        let queue_capacity =
            helpers::parse_optional_env("GATEWAY_QUEUE_CAPACITY", "a non-negative integer")?
                .unwrap_or(gw.queue_capacity);

        let default_chain = match helpers::optional_env("GATEWAY_DEFAULT_CHAIN")?
            .or_else(|| settings.default_chain.clone())
        {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "GATEWAY_DEFAULT_CHAIN".to_string(),
                message: format!(
                    "expected one of {}, got '{raw}'",
                    ChainId::ALL
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })?,
            None => ChainId::default(),
        };

        Ok(Self {
            session_ttl: Duration::from_secs(session_ttl_secs),
            reauth_ttl: Duration::from_secs(reauth_ttl_secs),
            approval_timeout: Duration::from_secs(approval_timeout_secs),
            handshake_timeout: Duration::from_millis(handshake_timeout_ms),
            queue_capacity,
            default_chain,
        })
    }
}

/// WebSocket listener and wallet-side approval API.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for the approval API. Random token generated at startup
    /// if unset.
    pub auth_token: Option<SecretString>,
}

impl ServerConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            host: helpers::optional_env("GATEWAY_HOST")?
                .unwrap_or_else(|| settings.server.host.clone()),
            port: helpers::parse_optional_env("GATEWAY_PORT", "a valid port number")?
                .unwrap_or(settings.server.port),
            auth_token: helpers::optional_env("GATEWAY_AUTH_TOKEN")?.map(SecretString::from),
        })
    }
}

/// Where session records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStoreConfig {
    Json { path: PathBuf },
    Memory,
}

impl SessionStoreConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let backend = helpers::optional_env("GATEWAY_SESSION_STORE")?
            .unwrap_or_else(|| settings.store.backend.clone());
        match normalize_variant(&backend).as_str() {
            "json" | "file" => Ok(Self::Json {
                path: helpers::optional_env("GATEWAY_SESSION_PATH")?
                    .map(PathBuf::from)
                    .or_else(|| settings.store.path.clone())
                    .unwrap_or_else(default_session_store_path),
            }),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: "GATEWAY_SESSION_STORE".to_string(),
                message: format!("expected 'json' or 'memory', got '{backend}'"),
            }),
        }
    }
}

fn normalize_variant(value: &str) -> String {
    value.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

impl Config {
    /// Load configuration from environment variables and the default TOML
    /// config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional explicit TOML config file.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_gateway_env();
        let mut settings = Settings::default();
        Self::apply_toml_overlay(&mut settings, toml_path)?;
        Self::build(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries the default path `~/.provider-gateway/config.toml`
    /// (missing file is silently ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(PathBuf::from)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Build config from settings with env overrides applied.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve(settings)?,
            server: ServerConfig::resolve(settings)?,
            store: SessionStoreConfig::resolve(settings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const GATEWAY_ENV: [&str; 11] = [
        "GATEWAY_SESSION_TTL_SECS",
        "GATEWAY_REAUTH_TTL_SECS",
        "GATEWAY_APPROVAL_TIMEOUT_SECS",
        "GATEWAY_HANDSHAKE_TIMEOUT_MS",
        "GATEWAY_QUEUE_CAPACITY",
        "GATEWAY_HOST",
        "GATEWAY_PORT",
        "GATEWAY_SESSION_STORE",
        "GATEWAY_SESSION_PATH",
        "GATEWAY_DEFAULT_CHAIN",
        "GATEWAY_AUTH_TOKEN",
    ];

    fn clear_gateway_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            for key in GATEWAY_ENV {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn resolvers_use_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        let config = Config::build(&Settings::default()).expect("build");
        assert_eq!(config.gateway, GatewayConfig::default());
        assert_eq!(config.gateway.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.gateway.approval_timeout, Duration::from_secs(60));
        assert_eq!(config.gateway.handshake_timeout, Duration::from_millis(5_000));
        assert_eq!(config.gateway.default_chain, ChainId::X1Mainnet);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.server.auth_token.is_none());
        assert!(matches!(config.store, SessionStoreConfig::Json { .. }));
    }

    #[test]
    fn env_overrides_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_APPROVAL_TIMEOUT_SECS", "30");
            std::env::set_var("GATEWAY_QUEUE_CAPACITY", "4");
            std::env::set_var("GATEWAY_SESSION_STORE", "memory");
            std::env::set_var("GATEWAY_DEFAULT_CHAIN", "solana:devnet");
            std::env::set_var("GATEWAY_AUTH_TOKEN", "  wallet-ui-token  ");
        }

        let mut settings = Settings::default();
        settings.gateway.approval_timeout_secs = 120;
        settings.server.port = 4100;

        let config = Config::build(&settings).expect("build");
        assert_eq!(config.gateway.approval_timeout, Duration::from_secs(30));
        assert_eq!(config.gateway.queue_capacity, 4);
        assert_eq!(config.gateway.default_chain, ChainId::SolanaDevnet);
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.store, SessionStoreConfig::Memory);
        assert_eq!(
            config
                .server
                .auth_token
                .as_ref()
                .map(|t| t.expose_secret().to_string())
                .as_deref(),
            Some("wallet-ui-token")
        );

        clear_gateway_env();
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_SESSION_TTL_SECS", "0");
        }

        match Config::build(&Settings::default()).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "GATEWAY_SESSION_TTL_SECS"),
            other => panic!("unexpected error: {other}"),
        }

        clear_gateway_env();
    }

    #[test]
    fn invalid_values_name_their_key() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_DEFAULT_CHAIN", "ethereum:mainnet");
        }
        match Config::build(&Settings::default()).unwrap_err() {
            ConfigError::InvalidValue { key, message } => {
                assert_eq!(key, "GATEWAY_DEFAULT_CHAIN");
                assert!(message.contains("x1:mainnet"));
            }
            other => panic!("unexpected error: {other}"),
        }

        clear_gateway_env();
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_PORT", "not-a-port");
        }
        match Config::build(&Settings::default()).unwrap_err() {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "GATEWAY_PORT"),
            other => panic!("unexpected error: {other}"),
        }

        clear_gateway_env();
    }

    #[test]
    fn explicit_missing_toml_is_fatal() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_env_with_toml(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn explicit_toml_is_applied() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[gateway]\nreauth_ttl_secs = 900\n\n[store]\nbackend = \"memory\"\n",
        )
        .unwrap();

        let config = Config::from_env_with_toml(Some(&path)).expect("load");
        assert_eq!(config.gateway.reauth_ttl, Duration::from_secs(900));
        assert_eq!(config.store, SessionStoreConfig::Memory);
    }
}
