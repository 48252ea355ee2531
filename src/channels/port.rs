//! Per-socket provider port.
//!
//! A [`ProviderPort`] owns the handshake gate for one transport channel and
//! turns inbound frames into gateway calls. The port joins the
//! [`PortRegistry`](crate::ports::PortRegistry) only once the page has echoed
//! the handshake token, so broadcasts never reach an unverified channel.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ChannelError, GatewayError};
use crate::gateway::Gateway;
use crate::handshake::{AckOutcome, HandshakeGate};
use crate::origin::{Origin, TransportMeta, resolve_origin};
use crate::ports::PortHandle;
use crate::wire::{InboundFrame, OutboundFrame, RequestFrame, RpcCall};

pub struct ProviderPort {
    gateway: Arc<Gateway>,
    meta: TransportMeta,
    declared: Option<String>,
    origin: Origin,
    gate: HandshakeGate,
    tx: mpsc::UnboundedSender<OutboundFrame>,
    handle: Option<PortHandle>,
}

impl ProviderPort {
    /// Open a port and send the handshake offer on `tx`.
    ///
    /// Fails with `UntrustedOrigin` when the transport vouches for no origin.
    pub fn open(
        gateway: Arc<Gateway>,
        meta: TransportMeta,
        declared: Option<String>,
        tx: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Result<Self, GatewayError> {
        let origin = resolve_origin(declared.as_deref(), &meta)?;
        let gate = HandshakeGate::new(gateway.config().handshake_timeout);
        if let Some(offer) = gate.offer() {
            tx.send(offer)
                .map_err(|_| GatewayError::InvalidRequest("port closed during open".to_string()))?;
        }
        tracing::debug!(origin = %origin, "Provider port opened; awaiting handshake");
        Ok(Self {
            gateway,
            meta,
            declared,
            origin,
            gate,
            tx,
            handle: None,
        })
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_verified(&self) -> bool {
        self.handle.is_some()
    }

    /// When the transport loop should next call [`check_handshake_timeout`].
    ///
    /// [`check_handshake_timeout`]: Self::check_handshake_timeout
    pub fn handshake_deadline(&self) -> Option<Instant> {
        self.gate.pending_deadline()
    }

    /// Warn once if the page never acknowledged the handshake. The port
    /// stays open; its requests keep being refused.
    pub fn check_handshake_timeout(&mut self) {
        if self.gate.take_timeout(Instant::now()) {
            tracing::warn!(
                origin = %self.origin,
                "Provider handshake not acknowledged in time; port stays unverified"
            );
        }
    }

    /// Handle one text frame from the page.
    pub async fn on_text(&mut self, text: &str) {
        match serde_json::from_str::<InboundFrame>(text) {
            Ok(InboundFrame::HandshakeAck { token }) => self.on_ack(&token).await,
            Ok(InboundFrame::Request(request)) => self.on_request(request),
            Err(e) => {
                let err = ChannelError::InvalidMessage(e.to_string());
                tracing::debug!(origin = %self.origin, "{}", err);
                if let Err(untrusted) = self.gate.check() {
                    self.reply(Value::Null, Err(untrusted));
                    return;
                }
                self.reply(Value::Null, Err(GatewayError::InvalidRequest(err.to_string())));
            }
        }
    }

    async fn on_ack(&mut self, token: &str) {
        match self.gate.accept_ack(token) {
            AckOutcome::Verified => {
                let handle = match self.gateway.ports().register(
                    &self.meta,
                    self.declared.as_deref(),
                    self.tx.clone(),
                ) {
                    Ok(handle) => handle,
                    Err(err) => {
                        tracing::warn!(origin = %self.origin, "Verified port failed to register: {}", err);
                        return;
                    }
                };
                tracing::info!(origin = %self.origin, port = handle.id(), "Provider port verified");
                self.gateway.port_ready(&handle).await;
                self.handle = Some(handle);
            }
            AckOutcome::Ignored => {
                tracing::debug!(origin = %self.origin, "Ignoring handshake ack with wrong token");
            }
            AckOutcome::AlreadyVerified => {
                tracing::debug!(origin = %self.origin, "Ignoring repeated handshake ack");
            }
        }
    }

    fn on_request(&self, request: RequestFrame) {
        let RequestFrame { id, method, params } = request;
        if let Err(err) = self.gate.check() {
            tracing::debug!(origin = %self.origin, method = %method, "Refusing request on unverified port");
            self.reply(id, Err(err));
            return;
        }
        let Some(port) = self.handle.clone() else {
            self.reply(id, Err(GatewayError::UntrustedChannel));
            return;
        };
        let call = match RpcCall::parse(&method, params) {
            Ok(call) => call,
            Err(err) => {
                self.reply(id, Err(err));
                return;
            }
        };

        // Approvals can take minutes; the read loop keeps serving the port.
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            let origin = port.origin().clone();
            let outcome = gateway.dispatch(&origin, call).await;
            if port.send(OutboundFrame::response(id, outcome)).is_err() {
                tracing::debug!(origin = %origin, "Port closed before its response was delivered");
            }
        });
    }

    fn reply(&self, id: Value, outcome: Result<Value, GatewayError>) {
        if self.tx.send(OutboundFrame::response(id, outcome)).is_err() {
            tracing::debug!(origin = %self.origin, "Reply dropped; port writer is gone");
        }
    }

    /// The transport closed. Unregisters the port if it was verified.
    pub async fn close(self) {
        match self.handle {
            Some(handle) => self.gateway.port_closed(handle.id()).await,
            None => tracing::debug!(origin = %self.origin, "Unverified provider port closed"),
        }
    }
}
