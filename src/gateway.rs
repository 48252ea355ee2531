//! Request dispatcher and key-store event glue.
//!
//! [`Gateway`] owns the registries (sessions, ports, approval queue) and the
//! broadcaster, and routes every provider method. Any await in here may race
//! with a port closing, the account changing or a deadline firing. After each
//! one the code re-checks that its request is still current before acting
//! on the result.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::approval::{ApprovalDriver, ApprovalSurface, Decision};
use crate::broadcast::{BroadcastOutcome, EventBroadcaster};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::keystore::{KeyStore, KeyStoreEvent, PublicKey};
use crate::network::ChainId;
use crate::origin::Origin;
use crate::ports::{PortHandle, PortId, PortRegistry, Unregistered};
use crate::queue::{
    ApprovalQueue, ApprovalQueueConfig, Outcome, PendingRequest, RequestId, RequestKind,
    SlotState,
};
use crate::rpc::ChainRpc;
use crate::session::{SessionRecord, SessionStore};
use crate::signer::{Signer, SignerLock};
use crate::wire::{
    ConnectParams, ConnectResult, EncodedBytes, MessageSignatureResult, RpcCall,
    SignedTransactionResult, SignedTransactionsResult, SubmittedResult, SwitchChainParams,
};

/// External collaborators the gateway drives.
pub struct GatewayDeps {
    pub sessions: Arc<SessionStore>,
    pub signer: Arc<dyn Signer>,
    pub key_store: Arc<dyn KeyStore>,
    pub rpc: Arc<dyn ChainRpc>,
    pub surface: Arc<dyn ApprovalSurface>,
}

pub struct Gateway {
    config: GatewayConfig,
    sessions: Arc<SessionStore>,
    ports: Arc<PortRegistry>,
    queue: Arc<ApprovalQueue>,
    broadcaster: EventBroadcaster,
    signer_lock: Arc<SignerLock>,
    signer: Arc<dyn Signer>,
    key_store: Arc<dyn KeyStore>,
    rpc: Arc<dyn ChainRpc>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, deps: GatewayDeps) -> Arc<Self> {
        let ports = Arc::new(PortRegistry::new());
        let signer_lock = Arc::new(SignerLock::new());
        let queue = ApprovalQueue::new(
            ApprovalQueueConfig {
                capacity: config.queue_capacity,
                approval_timeout: config.approval_timeout,
                reauth_ttl: config.reauth_ttl,
                hardware_signer: deps.signer.is_hardware(),
            },
            ApprovalDriver::new(deps.surface),
            Arc::clone(&signer_lock),
            Arc::clone(&deps.sessions),
        );
        let broadcaster = EventBroadcaster::new(
            Arc::clone(&deps.sessions),
            Arc::clone(&ports),
            Arc::clone(&queue),
            Arc::clone(&signer_lock),
        );
        Arc::new(Self {
            config,
            sessions: deps.sessions,
            ports,
            queue,
            broadcaster,
            signer_lock,
            signer: deps.signer,
            key_store: deps.key_store,
            rpc: deps.rpc,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn ports(&self) -> &Arc<PortRegistry> {
        &self.ports
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn queue(&self) -> &Arc<ApprovalQueue> {
        &self.queue
    }

    pub fn signer_lock(&self) -> &Arc<SignerLock> {
        &self.signer_lock
    }

    /// Route one provider method for `origin`.
    pub async fn dispatch(&self, origin: &Origin, call: RpcCall) -> Outcome {
        let method = call.method();
        let result = match call {
            RpcCall::Connect(params) => self.connect(origin, params).await,
            RpcCall::Disconnect => self.disconnect(origin).await,
            RpcCall::SwitchChain(params) => self.switch_chain(origin, params).await,
            RpcCall::GetNetwork => self.get_network(origin).await,
            RpcCall::SignTransaction(params) => {
                self.enqueue_signing(origin, RequestKind::SignTx { tx: params.tx.0 })
                    .await
            }
            RpcCall::SignAllTransactions(params) => {
                let txs = params.txs.into_iter().map(|tx| tx.0).collect();
                self.enqueue_signing(origin, RequestKind::SignAllTxs { txs })
                    .await
            }
            RpcCall::SignAndSend(params) => {
                let kind = RequestKind::SignAndSend {
                    tx: params.tx.0,
                    options: params.options.unwrap_or_default(),
                };
                self.enqueue_signing(origin, kind).await
            }
            RpcCall::SignMessage(params) => {
                self.enqueue_signing(origin, RequestKind::SignMessage { msg: params.msg.0 })
                    .await
            }
        };
        match &result {
            Ok(_) => tracing::debug!(origin = %origin, method, "Request completed"),
            Err(err) => tracing::debug!(origin = %origin, method, code = err.code(), "Request failed"),
        }
        result
    }

    async fn connect(&self, origin: &Origin, params: ConnectParams) -> Outcome {
        let chain = params
            .chain
            .as_deref()
            .map(str::parse::<ChainId>)
            .transpose()?;

        if let Some(record) = self.sessions.load(origin).await? {
            if let Some(chain) = chain
                && record.preferred_chain != Some(chain)
            {
                self.sessions.set_chain_preference(origin, chain).await?;
            }
            let effective = match chain.or(record.preferred_chain) {
                Some(chain) => chain,
                None => self.key_store.network().await,
            };
            tracing::debug!(origin = %origin, "Connect served from existing session");
            return self
                .connected(origin, &record.bound_public_key, effective)
                .await;
        }

        if params.only_if_trusted {
            return Err(GatewayError::NotTrusted);
        }
        self.await_approval(PendingRequest::new(
            origin.clone(),
            RequestKind::Connect { chain },
        ))
        .await
    }

    async fn disconnect(&self, origin: &Origin) -> Outcome {
        self.revoke(origin).await?;
        Ok(Value::Bool(true))
    }

    async fn switch_chain(&self, origin: &Origin, params: SwitchChainParams) -> Outcome {
        if self.sessions.load(origin).await?.is_none() {
            return Err(GatewayError::NotConnected);
        }
        let chain: ChainId = params.chain.parse()?;
        if !self.sessions.set_chain_preference(origin, chain).await? {
            return Err(GatewayError::NotConnected);
        }
        self.broadcaster.notify_network(origin, chain).await;
        tracing::info!(origin = %origin, chain = %chain, "Origin switched chain");
        to_json(chain.info())
    }

    async fn get_network(&self, origin: &Origin) -> Outcome {
        let record = self.sessions.load(origin).await?;
        to_json(self.effective_chain(record.as_ref()).await.info())
    }

    async fn effective_chain(&self, record: Option<&SessionRecord>) -> ChainId {
        match record.and_then(|r| r.preferred_chain) {
            Some(chain) => chain,
            None => self.key_store.network().await,
        }
    }

    async fn enqueue_signing(&self, origin: &Origin, kind: RequestKind) -> Outcome {
        // A connect still waiting for approval may create the session; the
        // queue re-checks when this request reaches the front.
        if self.sessions.load(origin).await?.is_none() && !self.queue.has_pending_connect(origin)
        {
            return Err(GatewayError::NotConnected);
        }
        self.await_approval(PendingRequest::new(origin.clone(), kind))
            .await
    }

    async fn await_approval(&self, request: PendingRequest) -> Outcome {
        let rx = self.queue.submit(request).await?;
        // The sender only drops without a value if the queue itself is gone.
        rx.await.unwrap_or(Err(GatewayError::UserDismissed))
    }

    async fn connected(&self, origin: &Origin, key: &PublicKey, chain: ChainId) -> Outcome {
        self.broadcaster.remember(origin, key, chain).await;
        let info = chain.info();
        to_json(ConnectResult {
            public_key: key.clone(),
            network: info.network,
            chain: info.chain,
        })
    }

    /// The user decided on request `id`. Returns whether the decision applied
    /// to the current request.
    pub async fn on_user_decision(&self, id: RequestId, decision: Decision) -> bool {
        match decision {
            Decision::Reject => self.queue.reject(id, GatewayError::UserRejected).await,
            Decision::Approve => {
                let Some(request) = self.queue.begin_resolving(id) else {
                    tracing::debug!(request = %id, "Ignoring decision for settled request");
                    return false;
                };
                let outcome = self.execute(&request).await;
                if let Err(err @ GatewayError::SignerError {
                    device_disconnected: true,
                    ..
                }) = &outcome
                    && self.signer.is_hardware()
                {
                    tracing::warn!(origin = %request.origin, "Signing device disconnected; clearing queue");
                    let delivered = self.queue.state_of(id).is_some();
                    self.queue.cancel_all(err.clone()).await;
                    // Hands the signer lock back.
                    self.queue.finish(id, outcome).await;
                    return delivered;
                }
                self.queue.finish(id, outcome).await
            }
        }
    }

    /// The user closed the approval surface without deciding.
    pub async fn on_surface_closed(&self) -> bool {
        self.queue.surface_closed().await
    }

    async fn execute(&self, request: &PendingRequest) -> Outcome {
        match &request.kind {
            RequestKind::Connect { chain } => self.approve_connect(request, *chain).await,
            kind => {
                let result = self.sign(kind).await?;
                let still_connected = self.sessions.update_sensitive_op(&request.origin).await?;
                // A submitted transaction is on chain regardless; anything
                // else is withheld from an origin that lost its session.
                if !still_connected && !matches!(kind, RequestKind::SignAndSend { .. }) {
                    return Err(GatewayError::NotConnected);
                }
                Ok(result)
            }
        }
    }

    async fn approve_connect(&self, request: &PendingRequest, chain: Option<ChainId>) -> Outcome {
        let key = match self.key_store.active_key().await {
            Some(key) => key,
            None => self.signer.public_key().await?,
        };
        let record = self.sessions.connect(&request.origin, &key).await?;
        if let Some(chain) = chain {
            self.sessions
                .set_chain_preference(&request.origin, chain)
                .await?;
        }

        if self.queue.state_of(request.id) != Some(SlotState::Resolving) {
            // Cancelled while persisting; the caller already has its answer.
            self.sessions.revoke(&request.origin).await?;
            return Err(GatewayError::AccountChanged);
        }

        let effective = match chain.or(record.preferred_chain) {
            Some(chain) => chain,
            None => self.key_store.network().await,
        };
        tracing::info!(origin = %request.origin, key = %key, "Connect approved");
        self.connected(&request.origin, &key, effective).await
    }

    async fn sign(&self, kind: &RequestKind) -> Outcome {
        match kind {
            RequestKind::SignTx { tx } => {
                let signed = self.signer.sign_tx(tx).await?;
                to_json(SignedTransactionResult {
                    signed_tx: EncodedBytes(signed),
                })
            }
            RequestKind::SignAllTxs { txs } => {
                let mut signed_txs = Vec::with_capacity(txs.len());
                for tx in txs {
                    signed_txs.push(EncodedBytes(self.signer.sign_tx(tx).await?));
                }
                to_json(SignedTransactionsResult { signed_txs })
            }
            RequestKind::SignAndSend { tx, options } => {
                let signed = self.signer.sign_tx(tx).await?;
                let signature = self.rpc.submit(&signed, options).await?;
                to_json(SubmittedResult { signature })
            }
            RequestKind::SignMessage { msg } => {
                let signature = self.signer.sign_message(msg).await?;
                to_json(MessageSignatureResult {
                    signature: EncodedBytes(signature),
                })
            }
            RequestKind::Connect { .. } => Err(GatewayError::InvalidRequest(
                "connect is not a signing request".to_string(),
            )),
        }
    }

    /// Switch the active account on the user's behalf.
    ///
    /// Refused while the signing device is in use.
    pub async fn request_account_switch(
        &self,
        key: PublicKey,
    ) -> Result<BroadcastOutcome, GatewayError> {
        if let Some(busy) = self.signer_lock.busy_error() {
            tracing::warn!(key = %key, "Account switch refused: {}", busy);
            return Err(busy);
        }
        // Pending requests must not see the new key.
        if self.key_store.active_key().await.as_ref() != Some(&key) {
            self.queue.cancel_all(GatewayError::AccountChanged).await;
        }
        self.key_store.set_active_key(&key).await?;
        self.broadcaster.broadcast_account_change(key).await
    }

    /// End `origin`'s session. Returns whether one existed.
    pub async fn revoke(&self, origin: &Origin) -> Result<bool, GatewayError> {
        self.queue
            .cancel_by_origin(origin, GatewayError::NotConnected)
            .await;
        let existed = self.sessions.revoke(origin).await?;
        self.broadcaster.forget(origin).await;
        Ok(existed)
    }

    pub async fn handle_key_store_event(&self, event: KeyStoreEvent) {
        let result = match event {
            KeyStoreEvent::ActiveKeyChanged(key) => {
                self.broadcaster.broadcast_account_change(key).await
            }
            KeyStoreEvent::NetworkChanged(chain) => {
                self.broadcaster.broadcast_network_change(chain).await
            }
        };
        if let Err(err) = result {
            tracing::warn!("Broadcast failed: {}", err);
        }
    }

    /// Replay an account change parked while the signer was busy.
    pub async fn resume_held_broadcasts(&self) {
        if let Err(err) = self.broadcaster.resume_held().await {
            tracing::warn!("Held broadcast failed: {}", err);
        }
    }

    /// Drive key-store events and signer releases until the key store closes.
    pub fn spawn_event_loop(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<KeyStoreEvent>,
    ) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => gateway.handle_key_store_event(event).await,
                        None => {
                            tracing::debug!("Key store event stream closed");
                            break;
                        }
                    },
                    () = gateway.signer_lock.released() => {
                        gateway.resume_held_broadcasts().await;
                    }
                }
            }
        })
    }

    /// A port finished its handshake and is now registered.
    pub async fn port_ready(&self, port: &PortHandle) {
        let current = self.key_store.active_key().await;
        if let Err(err) = self
            .broadcaster
            .notify_origin_if_stale(port.origin(), current.as_ref())
            .await
        {
            tracing::warn!(origin = %port.origin(), "Failed to catch up origin: {}", err);
        }
    }

    /// A port closed. The origin's requests are cancelled when it was the
    /// last one.
    pub async fn port_closed(&self, id: PortId) {
        if let Some(Unregistered {
            origin,
            remaining: 0,
        }) = self.ports.unregister(id)
        {
            self.queue
                .cancel_by_origin(&origin, GatewayError::OriginDisconnected)
                .await;
        }
    }
}

fn to_json<T: Serialize>(value: T) -> Outcome {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::InvalidRequest(format!("unencodable result: {e}")))
}
