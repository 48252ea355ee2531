//! dApp provider gateway for an X1/Solana wallet.
//!
//! The gateway sits between untrusted web pages and the user's signing keys.
//! It derives each page's origin from the transport, keeps per-origin
//! sessions, shows approval prompts one at a time, keeps the external signer
//! exclusive, and pushes account and network changes to every connected
//! origin.

pub mod approval;
pub mod bootstrap;
pub mod broadcast;
pub mod channels;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handshake;
pub mod keystore;
pub mod network;
pub mod origin;
pub mod ports;
pub mod queue;
pub mod redact;
pub mod rpc;
pub mod session;
pub mod settings;
pub mod signer;
pub mod wire;

pub use config::Config;
pub use error::{Error, GatewayError, Result};
pub use gateway::{Gateway, GatewayDeps};
