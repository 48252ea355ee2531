//! Signer interface and the lock that keeps an external device exclusive.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::GatewayError;
use crate::keystore::PublicKey;
use crate::origin::Origin;

/// Component that holds or fronts the private key.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign_tx(&self, tx: &[u8]) -> Result<Vec<u8>, GatewayError>;

    async fn sign_message(&self, msg: &[u8]) -> Result<Vec<u8>, GatewayError>;

    async fn public_key(&self) -> Result<PublicKey, GatewayError>;

    /// External hardware signers are guarded by the [`SignerLock`].
    fn is_hardware(&self) -> bool;
}

/// Stand-in for a gateway run without a signing backend.
///
/// Connects still succeed against the key store's active account; every
/// signature fails with `SignerError`.
#[derive(Debug, Default)]
pub struct UnattachedSigner;

impl UnattachedSigner {
    fn unavailable() -> GatewayError {
        GatewayError::signer("no signing backend is attached to this gateway")
    }
}

#[async_trait]
impl Signer for UnattachedSigner {
    async fn sign_tx(&self, _tx: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Err(Self::unavailable())
    }

    async fn sign_message(&self, _msg: &[u8]) -> Result<Vec<u8>, GatewayError> {
        Err(Self::unavailable())
    }

    async fn public_key(&self) -> Result<PublicKey, GatewayError> {
        Err(Self::unavailable())
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
struct LockState {
    held: bool,
    holder_origin: Option<Origin>,
}

/// Binary mutex over the external signing device.
///
/// Not an async lock: acquisition never waits. A busy device is reported to
/// the caller, which decides what to tell the user.
#[derive(Debug, Default)]
pub struct SignerLock {
    state: Mutex<LockState>,
    released: Notify,
}

impl SignerLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, origin: &Origin) -> bool {
        let mut state = self.lock();
        if state.held {
            return false;
        }
        state.held = true;
        state.holder_origin = Some(origin.clone());
        tracing::debug!(origin = %origin, "Signer lock acquired");
        true
    }

    /// Release the lock. Returns whether it was held.
    pub fn release(&self) -> bool {
        let mut state = self.lock();
        let was_held = state.held;
        if let Some(origin) = state.holder_origin.take() {
            tracing::debug!(origin = %origin, "Signer lock released");
        }
        state.held = false;
        drop(state);
        if was_held {
            self.released.notify_one();
        }
        was_held
    }

    /// Completes after the next release (or immediately if a release
    /// happened since the last wait).
    pub async fn released(&self) {
        self.released.notified().await;
    }

    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    pub fn holder(&self) -> Option<Origin> {
        self.lock().holder_origin.clone()
    }

    /// `SignerBusy` naming the holder, if the lock is held.
    pub fn busy_error(&self) -> Option<GatewayError> {
        let state = self.lock();
        state.held.then(|| GatewayError::SignerBusy {
            holder: state
                .holder_origin
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "another request".to_string()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
