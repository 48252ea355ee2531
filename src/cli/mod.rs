//! Command-line interface.

pub mod doctor;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clap::{Parser, Subcommand};
use rand::RngCore;
use secrecy::ExposeSecret;

use crate::channels::web::{ServerState, WebApprovalSurface, start_server};
use crate::clock::SystemClock;
use crate::config::{Config, SessionStoreConfig};
use crate::gateway::{Gateway, GatewayDeps};
use crate::keystore::{MemoryKeyStore, PublicKey};
use crate::origin::Origin;
use crate::rpc::UnattachedRpc;
use crate::session::{JsonFileBackend, MemoryBackend, SessionBackend, SessionStore};
use crate::settings::Settings;
use crate::signer::UnattachedSigner;

pub use doctor::run_doctor_command;

#[derive(Parser, Debug)]
#[command(name = "provider-gateway", version, about = "dApp provider gateway for X1/Solana wallets")]
pub struct Cli {
    /// Explicit TOML config file (default: ~/.provider-gateway/config.toml).
    #[arg(long, global = true, env = "GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the provider gateway.
    Serve {
        /// Account connected sites are bound to.
        #[arg(long, env = "GATEWAY_ACTIVE_KEY")]
        active_key: Option<String>,
    },

    /// Inspect or revoke stored site sessions.
    #[command(subcommand)]
    Sessions(SessionsCommand),

    /// Inspect or initialize the config file.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Check configuration and startup prerequisites.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommand {
    /// List connected sites.
    List,
    /// Disconnect a site.
    Revoke {
        /// Origin to disconnect, e.g. https://app.example
        origin: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    /// Print the effective settings.
    Show,
    /// Print one setting by dotted path (e.g. gateway.approval_timeout_secs).
    Get { path: String },
    /// Write a config file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

/// Run the parsed command line. `serve` is the default.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command.unwrap_or(Command::Serve { active_key: None }) {
        Command::Serve { active_key } => {
            let config = Config::from_env_with_toml(config_path)?;
            serve(config, active_key).await
        }
        Command::Sessions(command) => {
            let config = Config::from_env_with_toml(config_path)?;
            run_sessions_command(&config, command).await
        }
        Command::Config(command) => run_config_command(cli.config, command),
        Command::Doctor { strict } => run_doctor_command(config_path, strict).await,
    }
}

/// Open the configured session store with the system clock.
pub async fn open_session_store(config: &Config) -> anyhow::Result<Arc<SessionStore>> {
    let backend: Arc<dyn SessionBackend> = match &config.store {
        SessionStoreConfig::Json { path } => Arc::new(JsonFileBackend::new(path.clone())),
        SessionStoreConfig::Memory => Arc::new(MemoryBackend::default()),
    };
    let store = SessionStore::open(backend, Arc::new(SystemClock), config.gateway.session_ttl)
        .await
        .context("failed to open session store")?;
    Ok(Arc::new(store))
}

async fn serve(config: Config, active_key: Option<String>) -> anyhow::Result<()> {
    let sessions = open_session_store(&config).await?;
    let (key_store, key_events) = MemoryKeyStore::new(
        active_key.map(PublicKey::new),
        config.gateway.default_chain,
    );
    let approvals = Arc::new(WebApprovalSurface::new());

    let gateway = Gateway::new(
        config.gateway.clone(),
        GatewayDeps {
            sessions,
            signer: Arc::new(UnattachedSigner),
            key_store: Arc::new(key_store),
            rpc: Arc::new(UnattachedRpc),
            surface: approvals.clone(),
        },
    );
    let events = gateway.spawn_event_loop(key_events);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let auth_token = match &config.server.auth_token {
        Some(token) => token.expose_secret().to_string(),
        None => {
            let token = generate_auth_token();
            println!("Approval API token: {token}");
            token
        }
    };

    let state = Arc::new(ServerState::new(Arc::clone(&gateway), approvals));
    let bound = start_server(addr, Arc::clone(&state), auth_token).await?;
    println!("Provider gateway listening on ws://{bound}/provider");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    state.shutdown().await;
    events.abort();
    Ok(())
}

fn generate_auth_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

async fn run_sessions_command(config: &Config, command: SessionsCommand) -> anyhow::Result<()> {
    let store = open_session_store(config).await?;
    match command {
        SessionsCommand::List => {
            let records = store.list().await?;
            if records.is_empty() {
                println!("No connected sites.");
                return Ok(());
            }
            for record in records {
                let chain = record
                    .preferred_chain
                    .map(|c| c.as_str())
                    .unwrap_or("(global)");
                println!(
                    "{}  key={}  chain={}  connected={}  last_signed={}",
                    record.origin,
                    record.bound_public_key.as_str(),
                    chain,
                    record.connected_at.to_rfc3339(),
                    record.last_sensitive_op.to_rfc3339(),
                );
            }
        }
        SessionsCommand::Revoke { origin } => {
            let parsed = Origin::parse(&origin)
                .with_context(|| format!("'{origin}' is not a valid origin"))?;
            if store.revoke(&parsed).await? {
                println!("Disconnected {parsed}");
            } else {
                println!("{parsed} was not connected");
            }
        }
    }
    Ok(())
}

fn run_config_command(explicit: Option<PathBuf>, command: ConfigCommand) -> anyhow::Result<()> {
    let path = explicit.unwrap_or_else(Settings::default_toml_path);
    match command {
        ConfigCommand::Show => {
            let settings = load_settings(&path)?;
            println!("# {}", path.display());
            for (key, value) in settings.list() {
                println!("{key} = {value}");
            }
        }
        ConfigCommand::Get { path: key } => {
            let settings = load_settings(&path)?;
            match settings.get(&key) {
                Some(value) => println!("{value}"),
                None => anyhow::bail!("unknown setting '{key}'"),
            }
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            Settings::default()
                .save_toml(&path)
                .map_err(anyhow::Error::msg)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn load_settings(path: &std::path::Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    if let Some(file) = Settings::load_toml(path).map_err(anyhow::Error::msg)? {
        settings.merge_from(&file);
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["provider-gateway"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn parses_session_revoke() {
        let cli =
            Cli::try_parse_from(["provider-gateway", "sessions", "revoke", "https://a.example"])
                .unwrap();
        match cli.command {
            Some(Command::Sessions(SessionsCommand::Revoke { origin })) => {
                assert_eq!(origin, "https://a.example")
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        run_config_command(Some(path.clone()), ConfigCommand::Init { force: false }).unwrap();
        assert!(path.exists());
        assert!(
            run_config_command(Some(path.clone()), ConfigCommand::Init { force: false }).is_err()
        );
        run_config_command(Some(path), ConfigCommand::Init { force: true }).unwrap();
    }

    #[test]
    fn load_settings_applies_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nport = 4200\n").unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.server.port, 4200);
        assert_eq!(settings.gateway.approval_timeout_secs, 60);
    }
}
