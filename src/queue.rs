//! Single-slot approval queue.
//!
//! Requests wait in FIFO order. At most one of them is *current*: it is shown
//! to the user (`Prompting`) and, once approved, executed (`Resolving`). The
//! next request is promoted only after the current one is resolved.
//!
//! Every request is resolved exactly once. Its [`Resolver`] is consumed by the
//! first resolution; a late resolution (a signer returning after the request
//! was cancelled, a timer firing after approval) finds nothing to resolve and
//! is dropped.
//!
//! A cancelled request whose hardware signature is already under way keeps
//! the signer lock and blocks promotion until the device call returns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

use crate::approval::ApprovalDriver;
use crate::error::GatewayError;
use crate::network::ChainId;
use crate::origin::Origin;
use crate::session::{SessionStore, chrono_span};
use crate::signer::SignerLock;
use crate::wire::SendOptions;

pub type RequestId = Uuid;

/// Final answer delivered to the dApp.
pub type Outcome = Result<Value, GatewayError>;

/// What a queued request asks for, with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Connect { chain: Option<ChainId> },
    SignTx { tx: Vec<u8> },
    SignAllTxs { txs: Vec<Vec<u8>> },
    SignAndSend { tx: Vec<u8>, options: SendOptions },
    SignMessage { msg: Vec<u8> },
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::SignTx { .. } => "sign_transaction",
            Self::SignAllTxs { .. } => "sign_all_transactions",
            Self::SignAndSend { .. } => "sign_and_send",
            Self::SignMessage { .. } => "sign_message",
        }
    }

    pub fn is_signing(&self) -> bool {
        !matches!(self, Self::Connect { .. })
    }
}

/// A request waiting for, or holding, the approval slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub origin: Origin,
    pub kind: RequestKind,
    /// Set on signing requests whose session has been idle past the
    /// re-authentication window.
    pub reauth_required: bool,
    /// Set when the request is promoted.
    pub deadline: Option<Instant>,
}

impl PendingRequest {
    pub fn new(origin: Origin, kind: RequestKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            kind,
            reauth_required: false,
            deadline: None,
        }
    }
}

/// Single-use completion handle for one request.
#[derive(Debug)]
pub struct Resolver(oneshot::Sender<Outcome>);

impl Resolver {
    pub fn channel() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn resolve(self, outcome: Outcome) {
        if self.0.send(outcome).is_err() {
            tracing::debug!("Requester went away before resolution");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Prompting,
    Resolving,
}

#[derive(Debug)]
struct Entry {
    request: PendingRequest,
    resolver: Resolver,
}

#[derive(Debug)]
struct Current {
    entry: Entry,
    state: SlotState,
    holds_signer: bool,
}

/// The current request after it left the slot.
#[derive(Debug)]
pub struct Cleared {
    pub request: PendingRequest,
    pub holds_signer: bool,
}

/// Result of a bulk cancellation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Cancelled {
    pub count: usize,
    /// The signer lock can be released now.
    pub holds_signer: bool,
}

/// Queue state machine with no I/O and no timers.
#[derive(Debug)]
pub struct RequestQueue {
    waiting: VecDeque<Entry>,
    current: Option<Current>,
    capacity: Option<usize>,
    // Cancelled request still inside the hardware signer.
    signing_orphan: Option<RequestId>,
}

impl RequestQueue {
    /// `capacity` of zero means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            waiting: VecDeque::new(),
            current: None,
            capacity: (capacity > 0).then_some(capacity),
            signing_orphan: None,
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.len() + usize::from(self.current.is_some())
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.waiting.is_empty()
    }

    pub fn enqueue(
        &mut self,
        request: PendingRequest,
        resolver: Resolver,
    ) -> Result<(), GatewayError> {
        if let Some(capacity) = self.capacity
            && self.len() >= capacity
        {
            tracing::warn!(origin = %request.origin, capacity, "Approval queue full");
            return Err(GatewayError::QueueFull { capacity });
        }
        tracing::debug!(
            request = %request.id,
            origin = %request.origin,
            kind = request.kind.name(),
            depth = self.len() + 1,
            "Request queued"
        );
        self.waiting.push_back(Entry { request, resolver });
        Ok(())
    }

    /// Move the head of the queue into the empty slot.
    pub fn promote(&mut self, now: Instant, timeout: Duration) -> Option<PendingRequest> {
        if self.current.is_some() || self.signing_orphan.is_some() {
            return None;
        }
        let mut entry = self.waiting.pop_front()?;
        entry.request.deadline = Some(now + timeout);
        let request = entry.request.clone();
        self.current = Some(Current {
            entry,
            state: SlotState::Prompting,
            holds_signer: false,
        });
        Some(request)
    }

    pub fn current(&self) -> Option<&PendingRequest> {
        self.current.as_ref().map(|c| &c.entry.request)
    }

    pub fn state_of(&self, id: RequestId) -> Option<SlotState> {
        self.current
            .as_ref()
            .filter(|c| c.entry.request.id == id)
            .map(|c| c.state)
    }

    pub fn is_prompting(&self, id: RequestId) -> bool {
        self.state_of(id) == Some(SlotState::Prompting)
    }

    /// A cancelled request is still waiting on the hardware signer.
    pub fn signer_in_flight(&self) -> bool {
        self.signing_orphan.is_some()
    }

    /// The signer call of cancelled request `id` returned. True when the
    /// caller now owns the signer lock release.
    pub fn end_orphaned_signing(&mut self, id: RequestId) -> bool {
        if self.signing_orphan != Some(id) {
            return false;
        }
        self.signing_orphan = None;
        true
    }

    pub fn has_pending_connect(&self, origin: &Origin) -> bool {
        self.current
            .iter()
            .map(|c| &c.entry.request)
            .chain(self.waiting.iter().map(|e| &e.request))
            .any(|r| &r.origin == origin && matches!(r.kind, RequestKind::Connect { .. }))
    }

    /// Prompting → Resolving, after the user approved.
    pub fn begin_resolving(&mut self, id: RequestId) -> Option<PendingRequest> {
        let current = self
            .current
            .as_mut()
            .filter(|c| c.entry.request.id == id && c.state == SlotState::Prompting)?;
        current.state = SlotState::Resolving;
        Some(current.entry.request.clone())
    }

    pub fn mark_signer_held(&mut self, id: RequestId) -> bool {
        match self.current.as_mut() {
            Some(current) if current.entry.request.id == id => {
                current.holds_signer = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_reauth_required(&mut self, id: RequestId, required: bool) {
        if let Some(current) = self.current.as_mut()
            && current.entry.request.id == id
        {
            current.entry.request.reauth_required = required;
        }
    }

    /// Resolve the current request if it is still `id`.
    pub fn resolve(&mut self, id: RequestId, outcome: Outcome) -> Option<Cleared> {
        if self.current()?.id != id {
            tracing::debug!(request = %id, "Dropping stale resolution");
            return None;
        }
        self.clear_current(outcome)
    }

    /// Resolve the current request with `Timeout` if its deadline passed
    /// while it was still waiting for the user.
    pub fn expire(&mut self, id: RequestId, now: Instant) -> Option<Cleared> {
        let current = self.current.as_ref()?;
        let due = current.entry.request.deadline.is_some_and(|d| d <= now);
        if current.entry.request.id != id || current.state != SlotState::Prompting || !due {
            return None;
        }
        self.clear_current(Err(GatewayError::Timeout))
    }

    /// The user closed the surface without deciding.
    pub fn dismiss_current(&mut self) -> Option<Cleared> {
        if self.current.as_ref()?.state != SlotState::Prompting {
            return None;
        }
        self.clear_current(Err(GatewayError::UserDismissed))
    }

    /// Reject every entry, current first, whose origin is `origin`.
    pub fn cancel_by_origin(&mut self, origin: &Origin, reason: GatewayError) -> Cancelled {
        self.cancel_where(|r| &r.origin == origin, reason)
    }

    pub fn cancel_all(&mut self, reason: GatewayError) -> Cancelled {
        self.cancel_where(|_| true, reason)
    }

    fn cancel_where(
        &mut self,
        matches: impl Fn(&PendingRequest) -> bool,
        reason: GatewayError,
    ) -> Cancelled {
        let mut cancelled = Cancelled::default();
        let signing = self
            .current
            .as_ref()
            .is_some_and(|c| c.state == SlotState::Resolving && c.holds_signer);
        if self.current().is_some_and(&matches)
            && let Some(cleared) = self.clear_current(Err(reason.clone()))
        {
            cancelled.count += 1;
            if signing {
                tracing::debug!(request = %cleared.request.id, "Signer lock kept until device returns");
                self.signing_orphan = Some(cleared.request.id);
            } else {
                cancelled.holds_signer = cleared.holds_signer;
            }
        }
        let (hit, kept): (VecDeque<Entry>, VecDeque<Entry>) = std::mem::take(&mut self.waiting)
            .into_iter()
            .partition(|e| matches(&e.request));
        self.waiting = kept;
        for entry in hit {
            cancelled.count += 1;
            entry.resolver.resolve(Err(reason.clone()));
        }
        cancelled
    }

    fn clear_current(&mut self, outcome: Outcome) -> Option<Cleared> {
        let current = self.current.take()?;
        let Entry { request, resolver } = current.entry;
        match &outcome {
            Ok(_) => tracing::debug!(request = %request.id, origin = %request.origin, "Request resolved"),
            Err(err) => tracing::debug!(
                request = %request.id,
                origin = %request.origin,
                code = err.code(),
                "Request rejected"
            ),
        }
        resolver.resolve(outcome);
        Some(Cleared {
            request,
            holds_signer: current.holds_signer,
        })
    }
}

/// Runtime around [`RequestQueue`]: deadline timers, signer lock ownership
/// and the approval surface.
pub struct ApprovalQueue {
    me: Weak<ApprovalQueue>,
    inner: Mutex<RequestQueue>,
    driver: ApprovalDriver,
    // Orders presents and dismisses against each other.
    surface_gate: AsyncMutex<()>,
    signer_lock: Arc<SignerLock>,
    sessions: Arc<SessionStore>,
    hardware_signer: bool,
    approval_timeout: Duration,
    reauth_ttl: chrono::Duration,
}

/// Construction parameters for [`ApprovalQueue`].
pub struct ApprovalQueueConfig {
    pub capacity: usize,
    pub approval_timeout: Duration,
    pub reauth_ttl: Duration,
    pub hardware_signer: bool,
}

impl ApprovalQueue {
    pub fn new(
        config: ApprovalQueueConfig,
        driver: ApprovalDriver,
        signer_lock: Arc<SignerLock>,
        sessions: Arc<SessionStore>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            inner: Mutex::new(RequestQueue::new(config.capacity)),
            driver,
            surface_gate: AsyncMutex::new(()),
            signer_lock,
            sessions,
            hardware_signer: config.hardware_signer,
            approval_timeout: config.approval_timeout,
            reauth_ttl: chrono_span(config.reauth_ttl),
        })
    }

    /// Queue `request` and return the receiver its outcome arrives on.
    pub async fn submit(
        &self,
        request: PendingRequest,
    ) -> Result<oneshot::Receiver<Outcome>, GatewayError> {
        let (resolver, rx) = Resolver::channel();
        self.lock().enqueue(request, resolver)?;
        self.advance().await;
        Ok(rx)
    }

    pub fn current(&self) -> Option<PendingRequest> {
        self.lock().current().cloned()
    }

    pub fn state_of(&self, id: RequestId) -> Option<SlotState> {
        self.lock().state_of(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_idle()
    }

    pub fn has_pending_connect(&self, origin: &Origin) -> bool {
        self.lock().has_pending_connect(origin)
    }

    pub fn begin_resolving(&self, id: RequestId) -> Option<PendingRequest> {
        self.lock().begin_resolving(id)
    }

    /// Resolve `id` if it is still current, then move on. Returns whether
    /// the outcome was delivered.
    pub async fn finish(&self, id: RequestId, outcome: Outcome) -> bool {
        let (delivered, orphan) = {
            let mut queue = self.lock();
            let delivered = queue
                .resolve(id, outcome)
                .map(|cleared| self.release_if_held(&cleared))
                .is_some();
            (delivered, !delivered && queue.end_orphaned_signing(id))
        };
        if orphan {
            tracing::debug!(request = %id, "Cancelled signing returned, releasing signer");
            self.signer_lock.release();
        }
        if delivered || orphan {
            self.advance().await;
        }
        delivered
    }

    /// Reject `id` if it is still waiting for the user. An approval already
    /// in flight is not overridden.
    pub async fn reject(&self, id: RequestId, reason: GatewayError) -> bool {
        let rejected = {
            let mut queue = self.lock();
            queue.is_prompting(id)
                && queue
                    .resolve(id, Err(reason))
                    .map(|cleared| self.release_if_held(&cleared))
                    .is_some()
        };
        if rejected {
            self.advance().await;
        }
        rejected
    }

    /// Deadline expiry for `id`.
    pub async fn expire(&self, id: RequestId) -> bool {
        let expired = {
            let mut queue = self.lock();
            queue
                .expire(id, Instant::now())
                .map(|cleared| self.release_if_held(&cleared))
                .is_some()
        };
        if expired {
            tracing::info!(request = %id, "Approval timed out");
            self.advance().await;
        }
        expired
    }

    /// The user closed the surface.
    pub async fn surface_closed(&self) -> bool {
        self.driver.mark_closed().await;
        let dismissed = {
            let mut queue = self.lock();
            queue
                .dismiss_current()
                .map(|cleared| self.release_if_held(&cleared))
                .is_some()
        };
        self.advance().await;
        dismissed
    }

    pub async fn cancel_by_origin(&self, origin: &Origin, reason: GatewayError) -> usize {
        let count = {
            let mut queue = self.lock();
            let cancelled = queue.cancel_by_origin(origin, reason);
            if cancelled.holds_signer {
                self.signer_lock.release();
            }
            cancelled.count
        };
        if count > 0 {
            tracing::info!(origin = %origin, count, "Cancelled requests for origin");
            self.advance().await;
        }
        count
    }

    pub async fn cancel_all(&self, reason: GatewayError) -> usize {
        let code = reason.code();
        let count = {
            let mut queue = self.lock();
            let cancelled = queue.cancel_all(reason);
            if cancelled.holds_signer {
                self.signer_lock.release();
            }
            cancelled.count
        };
        if count > 0 {
            tracing::info!(count, code, "Cancelled all pending requests");
            self.advance().await;
        }
        count
    }

    fn settle(&self, id: RequestId, outcome: Outcome) -> bool {
        let mut queue = self.lock();
        queue
            .resolve(id, outcome)
            .map(|cleared| self.release_if_held(&cleared))
            .is_some()
    }

    fn release_if_held(&self, cleared: &Cleared) {
        if cleared.holds_signer {
            self.signer_lock.release();
        }
    }

    /// Fill the empty slot, if any, and show the new current request.
    async fn advance(&self) {
        loop {
            let promoted = self.lock().promote(Instant::now(), self.approval_timeout);
            let Some(mut request) = promoted else {
                self.dismiss_if_idle().await;
                return;
            };

            if request.kind.is_signing() {
                let precheck = match self.sessions.load(&request.origin).await {
                    Ok(Some(record)) => {
                        request.reauth_required =
                            record.needs_reauth(self.sessions.now(), self.reauth_ttl);
                        Ok(())
                    }
                    Ok(None) => Err(GatewayError::NotConnected),
                    Err(err) => Err(GatewayError::from(err)),
                };
                if let Err(err) = precheck {
                    // If the request is gone, whoever removed it already moved on.
                    if self.settle(request.id, Err(err)) {
                        continue;
                    }
                    return;
                }
            }

            {
                let mut queue = self.lock();
                if !queue.is_prompting(request.id) {
                    return;
                }
                queue.set_reauth_required(request.id, request.reauth_required);
                if self.hardware_signer && request.kind.is_signing() {
                    if self.signer_lock.try_acquire(&request.origin) {
                        queue.mark_signer_held(request.id);
                    } else {
                        let busy = self.signer_lock.busy_error().unwrap_or_else(|| {
                            GatewayError::SignerBusy {
                                holder: "another request".to_string(),
                            }
                        });
                        queue.resolve(request.id, Err(busy));
                        continue;
                    }
                }
            }

            self.arm_deadline(&request);
            self.present(&request).await;
            return;
        }
    }

    async fn present(&self, request: &PendingRequest) {
        let _gate = self.surface_gate.lock().await;
        let still_current = self.lock().is_prompting(request.id);
        if !still_current {
            tracing::debug!(request = %request.id, "Skipping present for settled request");
            return;
        }
        if let Err(err) = self.driver.show(request).await {
            tracing::warn!(request = %request.id, "Approval surface failed to present: {}", err);
        }
    }

    async fn dismiss_if_idle(&self) {
        let _gate = self.surface_gate.lock().await;
        let idle = self.lock().is_idle();
        if idle {
            self.driver.dismiss().await;
        }
    }

    fn arm_deadline(&self, request: &PendingRequest) {
        let Some(deadline) = request.deadline else {
            return;
        };
        let queue = self.me.clone();
        let id = request.id;
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(queue) = queue.upgrade() {
                queue.expire(id).await;
            }
        });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RequestQueue> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
