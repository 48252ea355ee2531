//! Registry of live provider ports, keyed by origin.
//!
//! One origin may hold several ports at once (tabs, iframes). A port whose
//! receiving side is gone is dropped the first time a send to it fails.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::error::{ChannelError, GatewayError};
use crate::origin::{Origin, TransportMeta, resolve_origin};
use crate::wire::OutboundFrame;

pub type PortId = u64;

/// One live bidirectional channel, seen from the gateway side.
#[derive(Debug, Clone)]
pub struct PortHandle {
    id: PortId,
    origin: Origin,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl PortHandle {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn send(&self, frame: OutboundFrame) -> Result<(), ChannelError> {
        self.tx
            .send(frame)
            .map_err(|_| ChannelError::Disconnected { port: self.id })
    }
}

/// Result of removing a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub origin: Origin,
    /// Ports the origin still holds after this removal.
    pub remaining: usize,
}

#[derive(Default)]
pub struct PortRegistry {
    next_id: AtomicU64,
    ports: Mutex<HashMap<Origin, Vec<PortHandle>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port under the origin its transport vouches for.
    pub fn register(
        &self,
        meta: &TransportMeta,
        declared: Option<&str>,
        tx: mpsc::UnboundedSender<OutboundFrame>,
    ) -> Result<PortHandle, GatewayError> {
        let origin = resolve_origin(declared, meta)?;
        let handle = PortHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            origin: origin.clone(),
            tx,
        };
        self.lock().entry(origin).or_default().push(handle.clone());
        tracing::debug!(port = handle.id, origin = %handle.origin, "Port registered");
        Ok(handle)
    }

    pub fn unregister(&self, id: PortId) -> Option<Unregistered> {
        let mut ports = self.lock();
        let origin = ports
            .iter()
            .find(|(_, handles)| handles.iter().any(|h| h.id == id))
            .map(|(origin, _)| origin.clone())?;
        let handles = ports.get_mut(&origin)?;
        handles.retain(|h| h.id != id);
        let remaining = handles.len();
        if remaining == 0 {
            ports.remove(&origin);
        }
        tracing::debug!(port = id, origin = %origin, remaining, "Port unregistered");
        Some(Unregistered { origin, remaining })
    }

    pub fn ports_for(&self, origin: &Origin) -> Vec<PortHandle> {
        self.lock().get(origin).cloned().unwrap_or_default()
    }

    pub fn all_origins(&self) -> Vec<Origin> {
        let mut origins: Vec<Origin> = self.lock().keys().cloned().collect();
        origins.sort();
        origins
    }

    pub fn port_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Send on one port, dropping it from the registry if the send fails.
    pub fn send(&self, port: &PortHandle, frame: OutboundFrame) -> bool {
        match port.send(frame) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(origin = %port.origin, "Dropping dead port: {}", err);
                self.unregister(port.id);
                false
            }
        }
    }

    /// Send to every port of `origin`. Returns how many deliveries succeeded.
    pub fn send_to_origin(&self, origin: &Origin, frame: &OutboundFrame) -> usize {
        self.ports_for(origin)
            .iter()
            .filter(|port| self.send(port, frame.clone()))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Origin, Vec<PortHandle>>> {
        self.ports.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChainId;
    use crate::wire::ProviderEvent;

    fn meta(origin: &str) -> TransportMeta {
        TransportMeta::from_origin(origin)
    }

    fn frame() -> OutboundFrame {
        OutboundFrame::Event(ProviderEvent::network_changed(ChainId::X1Mainnet))
    }

    #[test]
    fn several_ports_per_origin() {
        let registry = PortRegistry::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, _rx3) = mpsc::unbounded_channel();
        let a1 = registry.register(&meta("https://a.example"), None, tx1).unwrap();
        let a2 = registry.register(&meta("https://a.example"), None, tx2).unwrap();
        registry.register(&meta("https://b.example"), None, tx3).unwrap();

        assert_ne!(a1.id(), a2.id());
        assert_eq!(registry.port_count(), 3);
        assert_eq!(
            registry.all_origins(),
            vec![
                Origin::parse("https://a.example").unwrap(),
                Origin::parse("https://b.example").unwrap()
            ]
        );

        assert_eq!(registry.send_to_origin(a1.origin(), &frame()), 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn register_uses_transport_origin() {
        let registry = PortRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let port = registry
            .register(&meta("https://evil.example"), Some("https://bank.example"), tx)
            .unwrap();
        assert_eq!(port.origin().as_str(), "https://evil.example");

        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            registry
                .register(&TransportMeta::default(), Some("https://bank.example"), tx)
                .unwrap_err(),
            GatewayError::UntrustedOrigin
        );
    }

    #[test]
    fn unregister_reports_remaining_ports() {
        let registry = PortRegistry::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let p1 = registry.register(&meta("https://a.example"), None, tx1).unwrap();
        let p2 = registry.register(&meta("https://a.example"), None, tx2).unwrap();

        assert_eq!(registry.unregister(p1.id()).unwrap().remaining, 1);
        assert_eq!(registry.unregister(p2.id()).unwrap().remaining, 0);
        assert!(registry.unregister(p2.id()).is_none());
        assert!(registry.all_origins().is_empty());
    }

    #[test]
    fn dead_port_is_removed_on_send_failure() {
        let registry = PortRegistry::new();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let live = registry.register(&meta("https://a.example"), None, tx_live).unwrap();
        registry.register(&meta("https://a.example"), None, tx_dead).unwrap();
        drop(rx_dead);

        assert_eq!(registry.send_to_origin(live.origin(), &frame()), 1);
        assert!(rx_live.try_recv().is_ok());
        assert_eq!(registry.ports_for(live.origin()).len(), 1);
    }
}
