//! Bootstrap env loading for the provider gateway.
//!
//! File: `~/.provider-gateway/.env` (standard dotenvy format)

use std::path::PathBuf;

use crate::settings::gateway_home;

/// Path to the gateway-specific `.env` file: `~/.provider-gateway/.env`.
pub fn gateway_env_path() -> PathBuf {
    gateway_home().join(".env")
}

/// Load env vars from `./.env` and then `~/.provider-gateway/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.provider-gateway/.env`
pub fn load_gateway_env() {
    let _ = dotenvy::dotenv();
    let path = gateway_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}
