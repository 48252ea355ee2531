//! Approval surface contract and the driver that controls it.
//!
//! The driver performs no cryptography. It opens the user-facing prompt,
//! pushes the single current request into it, and closes it again when the
//! queue drains. Decisions flow back through the gateway
//! (`Gateway::on_user_decision`, `Gateway::on_surface_closed`).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::queue::PendingRequest;

/// UI shell that shows pending requests to the user.
#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    /// Show `request`, opening the surface first if needed.
    async fn present(&self, request: &PendingRequest) -> Result<(), GatewayError>;

    /// Close the surface.
    async fn dismiss(&self);
}

/// What the user decided about the current request.
///
/// A `Connect` approval binds the origin to the active account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// Controller for the approval surface's open/closed mode.
pub struct ApprovalDriver {
    surface: Arc<dyn ApprovalSurface>,
    opened_by_driver: Mutex<bool>,
}

impl ApprovalDriver {
    pub fn new(surface: Arc<dyn ApprovalSurface>) -> Self {
        Self {
            surface,
            opened_by_driver: Mutex::new(false),
        }
    }

    /// Push `request` into the surface, opening it if it is not open.
    pub async fn show(&self, request: &PendingRequest) -> Result<(), GatewayError> {
        let mut opened = self.opened_by_driver.lock().await;
        tracing::debug!(
            request = %request.id,
            origin = %request.origin,
            kind = request.kind.name(),
            reopen = !*opened,
            "Presenting approval"
        );
        self.surface.present(request).await?;
        *opened = true;
        Ok(())
    }

    /// Close the surface, but only if this driver opened it.
    pub async fn dismiss(&self) {
        let mut opened = self.opened_by_driver.lock().await;
        if *opened {
            self.surface.dismiss().await;
            *opened = false;
        }
    }

    /// The user closed the surface; it is no longer ours to dismiss.
    pub async fn mark_closed(&self) {
        *self.opened_by_driver.lock().await = false;
    }

    pub async fn is_open(&self) -> bool {
        *self.opened_by_driver.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::origin::Origin;
    use crate::queue::RequestKind;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSurface {
        calls: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ApprovalSurface for RecordingSurface {
        async fn present(&self, request: &PendingRequest) -> Result<(), GatewayError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("present:{}", request.kind.name()));
            Ok(())
        }

        async fn dismiss(&self) {
            self.calls.lock().unwrap().push("dismiss".to_string());
        }
    }

    #[tokio::test]
    async fn dismiss_only_closes_what_the_driver_opened() {
        let surface = Arc::new(RecordingSurface::default());
        let driver = ApprovalDriver::new(surface.clone());

        driver.dismiss().await;
        assert!(surface.calls.lock().unwrap().is_empty());

        let request = PendingRequest::new(
            Origin::parse("https://app.example").unwrap(),
            RequestKind::Connect { chain: None },
        );
        driver.show(&request).await.unwrap();
        assert!(driver.is_open().await);
        driver.dismiss().await;
        driver.dismiss().await;
        assert!(!driver.is_open().await);

        assert_eq!(
            *surface.calls.lock().unwrap(),
            vec!["present:connect".to_string(), "dismiss".to_string()]
        );
    }

    #[tokio::test]
    async fn user_closed_surface_is_not_dismissed_again() {
        let surface = Arc::new(RecordingSurface::default());
        let driver = ApprovalDriver::new(surface.clone());
        let request = PendingRequest::new(
            Origin::parse("https://app.example").unwrap(),
            RequestKind::SignMessage { msg: vec![1] },
        );
        driver.show(&request).await.unwrap();
        driver.mark_closed().await;
        driver.dismiss().await;
        assert_eq!(surface.calls.lock().unwrap().len(), 1);
    }
}
