//! Account and network change fan-out to connected origins.
//!
//! Two layers of deduplication keep redundant notifications off the wire:
//! a global "last key / last chain" check that swallows storage echoes, and a
//! per-origin cache of what each origin was last told. An origin is only
//! marked as told once at least one of its ports accepted the event, so an
//! origin with no live ports is caught up when it reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::keystore::PublicKey;
use crate::network::ChainId;
use crate::origin::Origin;
use crate::ports::PortRegistry;
use crate::queue::ApprovalQueue;
use crate::session::SessionStore;
use crate::signer::SignerLock;
use crate::wire::{OutboundFrame, ProviderEvent};

/// What a broadcast call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Same value as last time; nothing sent.
    Unchanged,
    /// Parked until the signer lock is released.
    Held,
    /// Number of wire events delivered across all ports.
    Sent(usize),
}

#[derive(Debug, Default, Clone)]
struct SentCache {
    key: Option<PublicKey>,
    chain: Option<ChainId>,
}

#[derive(Debug, Default)]
struct BroadcastState {
    last_global_key: Option<PublicKey>,
    last_global_chain: Option<ChainId>,
    sent: HashMap<Origin, SentCache>,
    held_key: Option<PublicKey>,
}

pub struct EventBroadcaster {
    sessions: Arc<SessionStore>,
    ports: Arc<PortRegistry>,
    queue: Arc<ApprovalQueue>,
    signer_lock: Arc<SignerLock>,
    state: Mutex<BroadcastState>,
}

impl EventBroadcaster {
    pub fn new(
        sessions: Arc<SessionStore>,
        ports: Arc<PortRegistry>,
        queue: Arc<ApprovalQueue>,
        signer_lock: Arc<SignerLock>,
    ) -> Self {
        Self {
            sessions,
            ports,
            queue,
            signer_lock,
            state: Mutex::new(BroadcastState::default()),
        }
    }

    /// Announce a new active account.
    ///
    /// Pending requests are cancelled with `AccountChanged` before any event
    /// leaves, so no dApp receives a signature made under the new key for a
    /// transaction it prepared under the old one.
    pub async fn broadcast_account_change(
        &self,
        new_key: PublicKey,
    ) -> Result<BroadcastOutcome, GatewayError> {
        let mut state = self.state.lock().await;
        if state.last_global_key.as_ref() == Some(&new_key) {
            state.held_key = None;
            tracing::debug!(key = %new_key, "Account unchanged; broadcast suppressed");
            return Ok(BroadcastOutcome::Unchanged);
        }
        if self.signer_lock.is_held() {
            tracing::info!(key = %new_key, "Signer busy; holding account change");
            state.held_key = Some(new_key);
            return Ok(BroadcastOutcome::Held);
        }
        state.held_key = None;
        state.last_global_key = Some(new_key.clone());

        self.queue.cancel_all(GatewayError::AccountChanged).await;

        let frame = OutboundFrame::Event(ProviderEvent::AccountChanged {
            new_key: new_key.clone(),
        });
        let mut delivered = 0;
        for record in self.sessions.list().await? {
            delivered += self
                .push_key(&mut state, &record.origin, &new_key, &frame)
                .await?;
        }
        tracing::info!(key = %new_key, delivered, "Account change broadcast");
        Ok(BroadcastOutcome::Sent(delivered))
    }

    /// Replay an account change that arrived while the signer was busy.
    pub async fn resume_held(&self) -> Result<BroadcastOutcome, GatewayError> {
        let held = {
            let mut state = self.state.lock().await;
            if self.signer_lock.is_held() {
                return Ok(if state.held_key.is_some() {
                    BroadcastOutcome::Held
                } else {
                    BroadcastOutcome::Unchanged
                });
            }
            state.held_key.take()
        };
        match held {
            Some(key) => self.broadcast_account_change(key).await,
            None => Ok(BroadcastOutcome::Unchanged),
        }
    }

    pub async fn has_held_change(&self) -> bool {
        self.state.lock().await.held_key.is_some()
    }

    /// Announce a new global network to every connected origin that has not
    /// picked its own chain.
    pub async fn broadcast_network_change(
        &self,
        chain: ChainId,
    ) -> Result<BroadcastOutcome, GatewayError> {
        let mut state = self.state.lock().await;
        if state.last_global_chain == Some(chain) {
            return Ok(BroadcastOutcome::Unchanged);
        }
        state.last_global_chain = Some(chain);

        let frame = OutboundFrame::Event(ProviderEvent::network_changed(chain));
        let mut delivered = 0;
        for record in self.sessions.list().await? {
            if record.preferred_chain.is_some() {
                continue;
            }
            delivered += self.push_chain(&mut state, &record.origin, chain, &frame);
        }
        tracing::info!(chain = %chain, delivered, "Network change broadcast");
        Ok(BroadcastOutcome::Sent(delivered))
    }

    /// Tell one origin about its own chain switch.
    pub async fn notify_network(&self, origin: &Origin, chain: ChainId) -> usize {
        let mut state = self.state.lock().await;
        let frame = OutboundFrame::Event(ProviderEvent::network_changed(chain));
        self.push_chain(&mut state, origin, chain, &frame)
    }

    /// Catch a (re)connecting origin up with the active account if its stored
    /// key is stale.
    pub async fn notify_origin_if_stale(
        &self,
        origin: &Origin,
        current_key: Option<&PublicKey>,
    ) -> Result<usize, GatewayError> {
        let Some(current_key) = current_key else {
            return Ok(0);
        };
        let Some(record) = self.sessions.load(origin).await? else {
            return Ok(0);
        };
        if &record.bound_public_key == current_key {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        // The stored key is what the origin last acknowledged; the cache
        // cannot vouch for a port that was not open at the time.
        state.sent.entry(origin.clone()).or_default().key = None;
        let frame = OutboundFrame::Event(ProviderEvent::AccountChanged {
            new_key: current_key.clone(),
        });
        let delivered = self
            .push_key(&mut state, origin, current_key, &frame)
            .await?;
        if delivered > 0 {
            tracing::info!(origin = %origin, key = %current_key, "Stale origin caught up");
        }
        Ok(delivered)
    }

    /// Record what an origin learned from a connect response.
    pub async fn remember(&self, origin: &Origin, key: &PublicKey, chain: ChainId) {
        let mut state = self.state.lock().await;
        let cache = state.sent.entry(origin.clone()).or_default();
        cache.key = Some(key.clone());
        cache.chain = Some(chain);
    }

    /// Drop everything cached for `origin`.
    pub async fn forget(&self, origin: &Origin) {
        self.state.lock().await.sent.remove(origin);
    }

    async fn push_key(
        &self,
        state: &mut BroadcastState,
        origin: &Origin,
        key: &PublicKey,
        frame: &OutboundFrame,
    ) -> Result<usize, GatewayError> {
        let cache = state.sent.entry(origin.clone()).or_default();
        if cache.key.as_ref() == Some(key) {
            return Ok(0);
        }
        let delivered = self.ports.send_to_origin(origin, frame);
        if delivered == 0 {
            return Ok(0);
        }
        cache.key = Some(key.clone());
        self.sessions.set_bound_key(origin, key).await?;
        Ok(delivered)
    }

    fn push_chain(
        &self,
        state: &mut BroadcastState,
        origin: &Origin,
        chain: ChainId,
        frame: &OutboundFrame,
    ) -> usize {
        let cache = state.sent.entry(origin.clone()).or_default();
        if cache.chain == Some(chain) {
            return 0;
        }
        let delivered = self.ports.send_to_origin(origin, frame);
        if delivered > 0 {
            cache.chain = Some(chain);
        }
        delivered
    }
}
