//! One-shot token handshake that binds a port to the gateway.
//!
//! The gateway hands the page a fresh random token over the port it just
//! opened. Until the page echoes that exact token in a `handshake-ack`, every
//! other frame on the port is refused. Acks carrying the wrong token are
//! dropped without a reply so a sibling script learns nothing from probing.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::wire::OutboundFrame;

const TOKEN_BYTES: usize = 32;

/// Outcome of presenting an ack to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Token matched; the port is now trusted.
    Verified,
    /// Token did not match; nothing changes and nothing is sent back.
    Ignored,
    /// The port was already verified; extra acks are ignored.
    AlreadyVerified,
}

#[derive(Debug)]
enum GateState {
    Pending { token: SecretString },
    Verified,
}

/// Per-port handshake state.
#[derive(Debug)]
pub struct HandshakeGate {
    state: GateState,
    deadline: Instant,
    timeout_reported: bool,
}

impl HandshakeGate {
    /// New gate with a freshly generated token.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: GateState::Pending {
                token: SecretString::from(generate_token()),
            },
            deadline: Instant::now() + timeout,
            timeout_reported: false,
        }
    }

    /// The frame that carries the token to the page. `None` once verified.
    pub fn offer(&self) -> Option<OutboundFrame> {
        match &self.state {
            GateState::Pending { token } => Some(OutboundFrame::Handshake {
                token: token.expose_secret().to_string(),
            }),
            GateState::Verified => None,
        }
    }

    pub fn accept_ack(&mut self, presented: &str) -> AckOutcome {
        let matched = match &self.state {
            GateState::Verified => return AckOutcome::AlreadyVerified,
            GateState::Pending { token } => {
                let expected = token.expose_secret().as_bytes();
                bool::from(expected.ct_eq(presented.as_bytes()))
            }
        };
        if matched {
            // The token is spent; dropping it leaves nothing to replay.
            self.state = GateState::Verified;
            AckOutcome::Verified
        } else {
            AckOutcome::Ignored
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self.state, GateState::Verified)
    }

    /// Refuse traffic on an unverified port.
    pub fn check(&self) -> Result<(), GatewayError> {
        if self.is_verified() {
            Ok(())
        } else {
            Err(GatewayError::UntrustedChannel)
        }
    }

    /// Deadline still worth waiting for: `None` once verified or reported.
    pub fn pending_deadline(&self) -> Option<Instant> {
        (!self.is_verified() && !self.timeout_reported).then_some(self.deadline)
    }

    /// Whether the grace period lapsed without an ack. Reports `true` once.
    pub fn take_timeout(&mut self, now: Instant) -> bool {
        if self.is_verified() || self.timeout_reported || now < self.deadline {
            return false;
        }
        self.timeout_reported = true;
        true
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
