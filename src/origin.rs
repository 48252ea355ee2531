//! Origin derivation from trusted transport metadata.
//!
//! A page may say who it is, but only the runtime knows. The self-declared
//! origin is compared against the transport's view and discarded on
//! disagreement.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GatewayError;

/// Authoritative identity of a web page's security context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(String);

impl Origin {
    /// Canonicalize `scheme://host[:port]` from any URL-shaped input.
    ///
    /// Returns `None` for opaque or unparseable inputs (`null`, `data:` URLs).
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw.trim()).ok()?;
        let origin = url.origin();
        if origin.is_tuple() {
            return Some(Self(origin.ascii_serialization()));
        }
        // Non-special schemes (extension pages) have opaque URL origins but
        // still carry a stable host.
        let host = url.host_str().filter(|h| !h.is_empty())?;
        Some(Self(format!("{}://{}", url.scheme(), host.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata supplied by the trusted runtime, never by page script.
#[derive(Debug, Clone, Default)]
pub struct TransportMeta {
    /// Origin the runtime attributes to the sender.
    pub sender_origin: Option<String>,
    /// Full URL of the sending page.
    pub sender_url: Option<String>,
}

impl TransportMeta {
    pub fn from_origin(origin: impl Into<String>) -> Self {
        Self {
            sender_origin: Some(origin.into()),
            sender_url: None,
        }
    }
}

/// Resolve the canonical origin for a request.
///
/// The trusted source wins on any disagreement. Fails only when the
/// transport offers no usable origin at all.
pub fn resolve_origin(
    declared: Option<&str>,
    meta: &TransportMeta,
) -> Result<Origin, GatewayError> {
    let from_sender = meta.sender_origin.as_deref().and_then(Origin::parse);
    let from_url = meta.sender_url.as_deref().and_then(Origin::parse);

    if let (Some(sender), Some(page)) = (&from_sender, &from_url)
        && sender != page
    {
        tracing::warn!(
            sender = %sender,
            page = %page,
            "Transport origin and page URL disagree; using sender origin"
        );
    }

    let trusted = from_sender.or(from_url).ok_or(GatewayError::UntrustedOrigin)?;

    if let Some(raw) = declared {
        match Origin::parse(raw) {
            Some(claimed) if claimed == trusted => {}
            _ => tracing::warn!(
                declared = raw,
                trusted = %trusted,
                "Self-declared origin does not match transport; ignoring claim"
            ),
        }
    }

    Ok(trusted)
}
