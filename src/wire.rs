//! Frames exchanged between a page and the gateway over a provider port.
//!
//! Every frame is a JSON object tagged by `kind`:
//! - page → gateway: `request`, `handshake-ack`
//! - gateway → page: `handshake`, `response`, `event`

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ErrorBody, GatewayError};
use crate::keystore::PublicKey;
use crate::network::{ChainId, NetworkInfo};

/// Frames a page may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind")]
pub enum InboundFrame {
    #[serde(rename = "request")]
    Request(RequestFrame),
    #[serde(rename = "handshake-ack")]
    HandshakeAck { token: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestFrame {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Frames the gateway sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OutboundFrame {
    /// One-shot token the page must echo in `handshake-ack`.
    #[serde(rename = "handshake")]
    Handshake { token: String },
    #[serde(rename = "response")]
    Response { id: Value, payload: ResponsePayload },
    #[serde(rename = "event")]
    Event(ProviderEvent),
}

impl OutboundFrame {
    pub fn response(id: Value, result: Result<Value, GatewayError>) -> Self {
        let payload = match result {
            Ok(value) => ResponsePayload::Result(value),
            Err(err) => ResponsePayload::Error(err.to_body()),
        };
        Self::Response { id, payload }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorBody),
}

/// Events pushed to every port of an origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum ProviderEvent {
    #[serde(rename = "accountChanged")]
    AccountChanged { new_key: PublicKey },
    #[serde(rename = "networkChanged")]
    NetworkChanged { network: String, chain: ChainId },
}

impl ProviderEvent {
    pub fn network_changed(chain: ChainId) -> Self {
        let NetworkInfo { network, chain } = chain.info();
        Self::NetworkChanged { network, chain }
    }
}

/// Raw bytes carried as a base64 string.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct EncodedBytes(pub Vec<u8>);

impl std::fmt::Debug for EncodedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedBytes({} bytes)", self.0.len())
    }
}

impl Serialize for EncodedBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for EncodedBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BASE64
            .decode(raw.as_bytes())
            .map(EncodedBytes)
            .map_err(serde::de::Error::custom)
    }
}

// --- Method params ---

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectParams {
    #[serde(default, alias = "onlyIfTrusted")]
    pub only_if_trusted: bool,
    #[serde(default)]
    pub chain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SwitchChainParams {
    pub chain: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignTransactionParams {
    pub tx: EncodedBytes,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignAllTransactionsParams {
    pub txs: Vec<EncodedBytes>,
}

/// Submission options forwarded to the chain RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    #[serde(default, alias = "skipPreflight")]
    pub skip_preflight: bool,
    #[serde(default, alias = "preflightCommitment")]
    pub preflight_commitment: Option<String>,
    #[serde(default, alias = "maxRetries")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignAndSendParams {
    pub tx: EncodedBytes,
    #[serde(default)]
    pub options: Option<SendOptions>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignMessageParams {
    pub msg: EncodedBytes,
}

/// A parsed provider method call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    Connect(ConnectParams),
    Disconnect,
    SwitchChain(SwitchChainParams),
    SignTransaction(SignTransactionParams),
    SignAllTransactions(SignAllTransactionsParams),
    SignAndSend(SignAndSendParams),
    SignMessage(SignMessageParams),
    GetNetwork,
}

impl RpcCall {
    pub fn parse(method: &str, params: Value) -> Result<Self, GatewayError> {
        match method {
            "connect" => Ok(Self::Connect(parse_params_or_default(method, params)?)),
            "disconnect" => Ok(Self::Disconnect),
            "switch_chain" => Ok(Self::SwitchChain(parse_params(method, params)?)),
            "sign_transaction" => Ok(Self::SignTransaction(parse_params(method, params)?)),
            "sign_all_transactions" => {
                Ok(Self::SignAllTransactions(parse_params(method, params)?))
            }
            "sign_and_send" => Ok(Self::SignAndSend(parse_params(method, params)?)),
            "sign_message" => Ok(Self::SignMessage(parse_params(method, params)?)),
            "get_network" => Ok(Self::GetNetwork),
            other => Err(GatewayError::InvalidRequest(format!(
                "unknown method '{other}'"
            ))),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
            Self::SwitchChain(_) => "switch_chain",
            Self::SignTransaction(_) => "sign_transaction",
            Self::SignAllTransactions(_) => "sign_all_transactions",
            Self::SignAndSend(_) => "sign_and_send",
            Self::SignMessage(_) => "sign_message",
            Self::GetNetwork => "get_network",
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Value,
) -> Result<T, GatewayError> {
    serde_json::from_value(params)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid params for {method}: {e}")))
}

fn parse_params_or_default<T: serde::de::DeserializeOwned + Default>(
    method: &str,
    params: Value,
) -> Result<T, GatewayError> {
    if params.is_null() {
        return Ok(T::default());
    }
    parse_params(method, params)
}

// --- Method results ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectResult {
    pub public_key: PublicKey,
    pub network: String,
    pub chain: ChainId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedTransactionResult {
    pub signed_tx: EncodedBytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedTransactionsResult {
    pub signed_txs: Vec<EncodedBytes>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedResult {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSignatureResult {
    pub signature: EncodedBytes,
}
