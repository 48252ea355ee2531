//! Error types for the provider gateway.

use serde::Serialize;

/// Top-level error type for gateway startup and tooling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors surfaced to dApps (through the response frame) or to the user.
///
/// Every variant maps to a stable `code()` that pages can match on; the
/// `Display` text is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("Request origin could not be verified")]
    UntrustedOrigin,

    #[error("Provider channel has not completed its handshake")]
    UntrustedChannel,

    #[error("This site is not connected to the wallet")]
    NotConnected,

    #[error("This site has not been approved yet")]
    NotTrusted,

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("User rejected the request")]
    UserRejected,

    #[error("Approval window was closed without a decision")]
    UserDismissed,

    #[error("Request timed out waiting for approval")]
    Timeout,

    #[error("Active account changed; request cancelled")]
    AccountChanged,

    #[error("Signer is busy with a request from {holder}; finish or cancel it first")]
    SignerBusy { holder: String },

    #[error("Signer error: {reason}")]
    SignerError {
        reason: String,
        /// Set when the external device went away mid-operation.
        device_disconnected: bool,
    },

    #[error("Transaction submission failed: {0}")]
    SubmissionError(String),

    #[error("Session store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Site disconnected; request cancelled")]
    OriginDisconnected,

    #[error("Too many pending requests (limit {capacity})")]
    QueueFull { capacity: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Stable identifier carried in the response frame's `error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UntrustedOrigin => "untrusted_origin",
            Self::UntrustedChannel => "untrusted_channel",
            Self::NotConnected => "not_connected",
            Self::NotTrusted => "not_trusted",
            Self::UnsupportedChain(_) => "unsupported_chain",
            Self::UserRejected => "user_rejected",
            Self::UserDismissed => "user_dismissed",
            Self::Timeout => "timeout",
            Self::AccountChanged => "account_changed",
            Self::SignerBusy { .. } => "signer_busy",
            Self::SignerError { .. } => "signer_error",
            Self::SubmissionError(_) => "submission_error",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::OriginDisconnected => "origin_disconnected",
            Self::QueueFull { .. } => "queue_full",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::UserDismissed
                | Self::Timeout
                | Self::AccountChanged
                | Self::SignerBusy { .. }
                | Self::SubmissionError(_)
                | Self::StoreUnavailable(_)
                | Self::QueueFull { .. }
        )
    }

    pub fn signer(reason: impl Into<String>) -> Self {
        Self::SignerError {
            reason: reason.into(),
            device_disconnected: false,
        }
    }

    pub fn device_disconnected(reason: impl Into<String>) -> Self {
        Self::SignerError {
            reason: reason.into(),
            device_disconnected: true,
        }
    }

    /// Render into the wire error body.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

/// `{code, message}` object inside an error response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed reading {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed writing {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Transport errors for the provider socket.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Port {port} disconnected")]
    Disconnected { port: u64 },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Result type alias for gateway-facing operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(GatewayError::UserRejected.code(), "user_rejected");
        assert_eq!(GatewayError::AccountChanged.code(), "account_changed");
        assert_eq!(
            GatewayError::UnsupportedChain("eth:mainnet".into()).code(),
            "unsupported_chain"
        );
        assert_eq!(
            GatewayError::SignerBusy {
                holder: "https://a.example".into()
            }
            .code(),
            "signer_busy"
        );
    }

    #[test]
    fn retryability_follows_error_kind() {
        assert!(GatewayError::Timeout.retryable());
        assert!(GatewayError::UserDismissed.retryable());
        assert!(GatewayError::AccountChanged.retryable());
        assert!(!GatewayError::UserRejected.retryable());
        assert!(!GatewayError::NotConnected.retryable());
        assert!(!GatewayError::UntrustedOrigin.retryable());
    }

    #[test]
    fn store_errors_become_store_unavailable() {
        let err: GatewayError = StoreError::Serialization("bad json".into()).into();
        assert_eq!(err.code(), "store_unavailable");
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn error_body_carries_code_and_message() {
        let body = GatewayError::NotConnected.to_body();
        assert_eq!(body.code, "not_connected");
        assert_eq!(body.message, "This site is not connected to the wallet");
    }
}
