//! Request and response types for the HTTP API.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::queue::{PendingRequest, RequestKind};
use crate::session::SessionRecord;
use crate::wire::EncodedBytes;

// --- Health ---

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub channel: &'static str,
}

// --- Approvals ---

/// The request the wallet UI should be showing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalView {
    pub id: Uuid,
    pub origin: String,
    pub method: &'static str,
    pub reauth_required: bool,
    pub params: Value,
}

impl From<&PendingRequest> for ApprovalView {
    fn from(request: &PendingRequest) -> Self {
        let params = match &request.kind {
            RequestKind::Connect { chain } => json!({ "chain": chain }),
            RequestKind::SignTx { tx } => json!({ "tx": EncodedBytes(tx.clone()) }),
            RequestKind::SignAllTxs { txs } => {
                let txs: Vec<EncodedBytes> = txs.iter().cloned().map(EncodedBytes).collect();
                json!({ "txs": txs })
            }
            RequestKind::SignAndSend { tx, options } => {
                json!({ "tx": EncodedBytes(tx.clone()), "options": options })
            }
            RequestKind::SignMessage { msg } => json!({ "msg": EncodedBytes(msg.clone()) }),
        };
        Self {
            id: request.id,
            origin: request.origin.to_string(),
            method: request.kind.name(),
            reauth_required: request.reauth_required,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalCurrentResponse {
    pub request: Option<ApprovalView>,
    /// Requests waiting in the queue, including the current one.
    pub pending: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: DecisionKind,
}

// --- Sessions ---

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub origin: String,
    pub public_key: String,
    pub connected_at: String,
    pub last_sensitive_op: String,
    pub preferred_chain: Option<String>,
}

impl From<&SessionRecord> for SessionInfo {
    fn from(record: &SessionRecord) -> Self {
        Self {
            origin: record.origin.to_string(),
            public_key: record.bound_public_key.as_str().to_string(),
            connected_at: record.connected_at.to_rfc3339(),
            last_sensitive_op: record.last_sensitive_op.to_rfc3339(),
            preferred_chain: record.preferred_chain.map(|c| c.as_str().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeQuery {
    pub origin: String,
}

// --- Account ---

#[derive(Debug, Deserialize)]
pub struct AccountSwitchRequest {
    pub public_key: String,
}

// --- Generic ---

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChainId;
    use crate::origin::Origin;

    fn origin() -> Origin {
        Origin::parse("https://app.example").unwrap()
    }

    #[test]
    fn approval_view_carries_payload_for_display() {
        let request = PendingRequest::new(
            origin(),
            RequestKind::SignMessage {
                msg: b"hello".to_vec(),
            },
        );
        let view = ApprovalView::from(&request);
        assert_eq!(view.method, "sign_message");
        assert_eq!(view.origin, "https://app.example");
        assert_eq!(view.params, json!({ "msg": "aGVsbG8=" }));

        let connect = PendingRequest::new(
            origin(),
            RequestKind::Connect {
                chain: Some(ChainId::X1Testnet),
            },
        );
        assert_eq!(
            ApprovalView::from(&connect).params,
            json!({ "chain": "x1:testnet" })
        );
    }

    #[test]
    fn decision_request_parses_lowercase() {
        let req: DecisionRequest = serde_json::from_str(r#"{"decision":"approve"}"#).unwrap();
        assert_eq!(req.decision, DecisionKind::Approve);
        assert!(serde_json::from_str::<DecisionRequest>(r#"{"decision":"maybe"}"#).is_err());
    }
}
