//! Shared fixtures for the gateway integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use provider_gateway::approval::{ApprovalSurface, Decision};
use provider_gateway::clock::ManualClock;
use provider_gateway::config::GatewayConfig;
use provider_gateway::error::GatewayError;
use provider_gateway::gateway::{Gateway, GatewayDeps};
use provider_gateway::keystore::{KeyStoreEvent, MemoryKeyStore, PublicKey};
use provider_gateway::network::ChainId;
use provider_gateway::origin::{Origin, TransportMeta};
use provider_gateway::ports::PortHandle;
use provider_gateway::queue::{Outcome, PendingRequest};
use provider_gateway::rpc::ChainRpc;
use provider_gateway::session::{MemoryBackend, SessionStore};
use provider_gateway::signer::Signer;
use provider_gateway::wire::{OutboundFrame, RpcCall, SendOptions};

pub const KEY_A: &str = "PKaaa111aaa111aaa111aaa111aaa111aaa111aa111";
pub const KEY_B: &str = "PKbbb222bbb222bbb222bbb222bbb222bbb222bb222";

pub const WAIT: Duration = Duration::from_secs(5);

pub fn origin(s: &str) -> Origin {
    Origin::parse(s).expect("valid origin")
}

/// Signer that appends a marker byte so tests can tell signed from unsigned.
///
/// After [`FakeSigner::hold`], signing calls park until
/// [`FakeSigner::resume`], like a device waiting for a button press.
pub struct FakeSigner {
    hardware: bool,
    pub calls: AtomicUsize,
    fail_with: Mutex<Option<GatewayError>>,
    holding: AtomicBool,
    entered: Notify,
    resumed: Notify,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeSigner {
    pub fn new(hardware: bool) -> Self {
        Self {
            hardware,
            calls: AtomicUsize::new(0),
            fail_with: Mutex::new(None),
            holding: AtomicBool::new(false),
            entered: Notify::new(),
            resumed: Notify::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make the next signing call fail with `err`.
    pub fn fail_next(&self, err: GatewayError) {
        *self.fail_with.lock().unwrap() = Some(err);
    }

    /// Park every following signing call until `resume`.
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Let the parked call finish and stop parking new ones.
    pub fn resume(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.resumed.notify_one();
    }

    /// Wait until a held call is parked inside the signer.
    pub async fn wait_until_signing(&self) {
        tokio::time::timeout(WAIT, self.entered.notified())
            .await
            .expect("signer was never reached");
    }

    async fn sign(&self, bytes: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if self.holding.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.resumed.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.fail_with.lock().unwrap().take() {
            return Err(err);
        }
        let mut out = bytes.to_vec();
        out.push(0xAA);
        Ok(out)
    }
}

#[async_trait]
impl Signer for FakeSigner {
    async fn sign_tx(&self, tx: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.sign(tx).await
    }

    async fn sign_message(&self, msg: &[u8]) -> Result<Vec<u8>, GatewayError> {
        self.sign(msg).await
    }

    async fn public_key(&self) -> Result<PublicKey, GatewayError> {
        Ok(PublicKey::new(KEY_A))
    }

    fn is_hardware(&self) -> bool {
        self.hardware
    }
}

#[derive(Default)]
pub struct FakeRpc {
    pub submitted: Mutex<Vec<(Vec<u8>, SendOptions)>>,
}

#[async_trait]
impl ChainRpc for FakeRpc {
    async fn submit(&self, signed_tx: &[u8], options: &SendOptions) -> Result<String, GatewayError> {
        self.submitted
            .lock()
            .unwrap()
            .push((signed_tx.to_vec(), options.clone()));
        Ok(format!("sig-{}", signed_tx.len()))
    }
}

/// Surface that remembers what it was asked to show.
#[derive(Default)]
pub struct RecordingSurface {
    pub presented: Mutex<Vec<PendingRequest>>,
    pub dismissals: AtomicUsize,
}

impl RecordingSurface {
    pub fn presented_count(&self) -> usize {
        self.presented.lock().unwrap().len()
    }
}

#[async_trait]
impl ApprovalSurface for RecordingSurface {
    async fn present(&self, request: &PendingRequest) -> Result<(), GatewayError> {
        self.presented.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn dismiss(&self) {
        self.dismissals.fetch_add(1, Ordering::SeqCst);
    }
}

/// A gateway wired to in-memory fakes.
pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub key_store: Arc<MemoryKeyStore>,
    pub key_events: Option<mpsc::UnboundedReceiver<KeyStoreEvent>>,
    pub signer: Arc<FakeSigner>,
    pub rpc: Arc<FakeRpc>,
    pub surface: Arc<RecordingSurface>,
    pub backend: Arc<MemoryBackend>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(false, GatewayConfig::default()).await
    }

    pub async fn hardware() -> Self {
        Self::build(true, GatewayConfig::default()).await
    }

    pub async fn build(hardware: bool, config: GatewayConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
        ));
        let backend = Arc::new(MemoryBackend::default());
        let sessions = Arc::new(
            SessionStore::open(backend.clone(), clock.clone(), config.session_ttl)
                .await
                .unwrap(),
        );
        let (key_store, key_events) =
            MemoryKeyStore::new(Some(PublicKey::new(KEY_A)), ChainId::X1Mainnet);
        let key_store = Arc::new(key_store);
        let signer = Arc::new(FakeSigner::new(hardware));
        let rpc = Arc::new(FakeRpc::default());
        let surface = Arc::new(RecordingSurface::default());

        let gateway = Gateway::new(
            config,
            GatewayDeps {
                sessions,
                signer: signer.clone(),
                key_store: key_store.clone(),
                rpc: rpc.clone(),
                surface: surface.clone(),
            },
        );

        Self {
            gateway,
            key_store,
            key_events: Some(key_events),
            signer,
            rpc,
            surface,
            backend,
            clock,
        }
    }

    /// Run the key-store event loop in the background.
    pub fn start_event_loop(&mut self) -> tokio::task::JoinHandle<()> {
        let events = self.key_events.take().expect("event loop already started");
        self.gateway.spawn_event_loop(events)
    }

    /// Register a verified port for `origin` and return its frame receiver.
    pub async fn open_port(
        &self,
        origin: &str,
    ) -> (PortHandle, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let port = self
            .gateway
            .ports()
            .register(&TransportMeta::from_origin(origin), None, tx)
            .unwrap();
        self.gateway.port_ready(&port).await;
        (port, rx)
    }

    /// Dispatch `call` on a background task.
    pub fn spawn_call(&self, origin: &str, call: RpcCall) -> tokio::task::JoinHandle<Outcome> {
        let gateway = Arc::clone(&self.gateway);
        let origin = self::origin(origin);
        tokio::spawn(async move { gateway.dispatch(&origin, call).await })
    }

    /// Deliver the user's decision on a background task.
    pub fn spawn_decision(
        &self,
        id: provider_gateway::queue::RequestId,
        decision: Decision,
    ) -> tokio::task::JoinHandle<bool> {
        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move { gateway.on_user_decision(id, decision).await })
    }

    /// Wait until a request other than `previous` is current.
    pub async fn next_prompt(&self, previous: Option<&PendingRequest>) -> PendingRequest {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(current) = self.gateway.queue().current()
                    && previous.is_none_or(|p| p.id != current.id)
                {
                    return current;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("no request was promoted")
    }

    /// Wait until the queue holds `n` requests.
    pub async fn wait_for_len(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.gateway.queue().len() != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("queue never reached expected length");
    }

    /// Connect `origin` through the approval flow.
    pub async fn connect(&self, origin: &str) -> Value {
        let call = self.spawn_call(origin, RpcCall::parse("connect", Value::Null).unwrap());
        let prompt = self.next_prompt(None).await;
        assert!(
            self.gateway
                .on_user_decision(prompt.id, Decision::Approve)
                .await
        );
        call.await.unwrap().expect("connect should succeed")
    }
}

/// Drain every frame currently buffered on a port receiver.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
