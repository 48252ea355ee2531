//! Key-store interface: which account is active and which network is selected.
//!
//! Derivation and vault encryption live elsewhere; the gateway only observes
//! the active key, the selected network, and asks for account switches.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::network::ChainId;
use crate::redact::short_key;

/// Base58 public key as shown to dApps.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Debug output goes to logs; keep it redacted.
impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", short_key(&self.0))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&short_key(&self.0))
    }
}

/// Mutations announced by the key store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreEvent {
    ActiveKeyChanged(PublicKey),
    NetworkChanged(ChainId),
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Currently active account, `None` while the vault is locked or empty.
    async fn active_key(&self) -> Option<PublicKey>;

    /// Globally selected network.
    async fn network(&self) -> ChainId;

    /// Make `key` the active account. Emits `ActiveKeyChanged` on success.
    async fn set_active_key(&self, key: &PublicKey) -> Result<(), GatewayError>;
}

/// Key store held entirely in memory, announcing changes on a channel.
pub struct MemoryKeyStore {
    state: Mutex<(Option<PublicKey>, ChainId)>,
    events: mpsc::UnboundedSender<KeyStoreEvent>,
}

impl MemoryKeyStore {
    pub fn new(
        active: Option<PublicKey>,
        network: ChainId,
    ) -> (Self, mpsc::UnboundedReceiver<KeyStoreEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Mutex::new((active, network)),
                events,
            },
            rx,
        )
    }

    /// Change the network from the wallet UI.
    pub fn select_network(&self, chain: ChainId) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1 = chain;
        let _ = self.events.send(KeyStoreEvent::NetworkChanged(chain));
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn active_key(&self) -> Option<PublicKey> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0.clone()
    }

    async fn network(&self) -> ChainId {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).1
    }

    async fn set_active_key(&self, key: &PublicKey) -> Result<(), GatewayError> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).0 = Some(key.clone());
        let _ = self
            .events
            .send(KeyStoreEvent::ActiveKeyChanged(key.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let key = PublicKey::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
        assert_eq!(format!("{key:?}"), "PublicKey(9xQe…VFin)");
        assert_eq!(key.to_string(), "9xQe…VFin");
    }

    #[tokio::test]
    async fn memory_store_announces_changes() {
        let (store, mut rx) = MemoryKeyStore::new(None, ChainId::X1Mainnet);
        let key = PublicKey::new("PKbbb222");
        store.set_active_key(&key).await.unwrap();
        store.select_network(ChainId::SolanaDevnet);

        assert_eq!(store.active_key().await, Some(key.clone()));
        assert_eq!(store.network().await, ChainId::SolanaDevnet);
        assert_eq!(rx.recv().await, Some(KeyStoreEvent::ActiveKeyChanged(key)));
        assert_eq!(
            rx.recv().await,
            Some(KeyStoreEvent::NetworkChanged(ChainId::SolanaDevnet))
        );
    }
}
