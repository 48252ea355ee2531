//! Chain RPC interface used by `sign_and_send`.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::wire::SendOptions;

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Submit a signed transaction and return its signature.
    ///
    /// Failures map to `GatewayError::SubmissionError`.
    async fn submit(&self, signed_tx: &[u8], options: &SendOptions)
    -> Result<String, GatewayError>;
}

/// Stand-in for a gateway run without a chain endpoint.
#[derive(Debug, Default)]
pub struct UnattachedRpc;

#[async_trait]
impl ChainRpc for UnattachedRpc {
    async fn submit(
        &self,
        _signed_tx: &[u8],
        _options: &SendOptions,
    ) -> Result<String, GatewayError> {
        Err(GatewayError::SubmissionError(
            "no chain RPC endpoint is configured".to_string(),
        ))
    }
}
