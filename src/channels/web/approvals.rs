//! Approval surface backed by the wallet-side HTTP API.
//!
//! The wallet UI polls `GET /api/approvals/current` and answers through
//! `POST /api/approvals/{id}`. Presenting a request replaces whatever was on
//! display, so the UI only ever sees the single current request.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::approval::ApprovalSurface;
use crate::channels::web::types::ApprovalView;
use crate::error::GatewayError;
use crate::queue::PendingRequest;

#[derive(Debug, Default)]
pub struct WebApprovalSurface {
    current: Mutex<Option<ApprovalView>>,
}

impl WebApprovalSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// The request on display, if the surface is open.
    pub fn current(&self) -> Option<ApprovalView> {
        self.lock().clone()
    }

    /// The user closed the prompt. Returns the request that was on display.
    pub fn close(&self) -> Option<ApprovalView> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ApprovalView>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ApprovalSurface for WebApprovalSurface {
    async fn present(&self, request: &PendingRequest) -> Result<(), GatewayError> {
        *self.lock() = Some(ApprovalView::from(request));
        Ok(())
    }

    async fn dismiss(&self) {
        self.lock().take();
    }
}
