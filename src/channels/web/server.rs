//! Axum HTTP server for the provider gateway.
//!
//! Serves the page-facing provider socket (`/provider`), the health probe,
//! and the token-protected API the wallet UI uses to answer approvals and
//! manage sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::channels::port::ProviderPort;
use crate::channels::web::approvals::WebApprovalSurface;
use crate::channels::web::auth::{AuthState, auth_middleware};
use crate::channels::web::handlers::approvals::{
    approvals_close_handler, approvals_current_handler, approvals_decide_handler,
};
use crate::channels::web::handlers::sessions::{
    account_switch_handler, sessions_list_handler, sessions_revoke_handler,
};
use crate::channels::web::types::HealthResponse;
use crate::error::ChannelError;
use crate::gateway::Gateway;
use crate::origin::{TransportMeta, resolve_origin};
use crate::wire::OutboundFrame;

/// Shared state for all handlers.
pub struct ServerState {
    pub gateway: Arc<Gateway>,
    /// Surface the gateway presents approvals on; the UI reads it back here.
    pub approvals: Arc<WebApprovalSurface>,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl ServerState {
    pub fn new(gateway: Arc<Gateway>, approvals: Arc<WebApprovalSurface>) -> Self {
        Self {
            gateway,
            approvals,
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    /// Stop accepting connections. Returns `false` if the server is not running.
    pub async fn shutdown(&self) -> bool {
        match self.shutdown_tx.write().await.take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Start the gateway HTTP server.
///
/// Returns the bound address; the server runs on a background task until
/// [`ServerState::shutdown`] is called.
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<ServerState>,
    auth_token: String,
) -> Result<SocketAddr, ChannelError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: "provider".to_string(),
            reason: format!("Failed to bind to {}: {}", addr, e),
        })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "provider".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    let auth_state = AuthState { token: auth_token };

    // Public routes (no auth). Pages are identified by origin, not by token.
    let public = Router::new()
        .route("/api/health", get(health_handler))
        .route("/provider", get(provider_ws_handler));

    // Wallet UI routes (always require auth)
    let protected = Router::new()
        .route("/api/approvals/current", get(approvals_current_handler))
        .route("/api/approvals/close", post(approvals_close_handler))
        .route("/api/approvals/{id}", post(approvals_decide_handler))
        .route(
            "/api/sessions",
            get(sessions_list_handler).delete(sessions_revoke_handler),
        )
        .route("/api/account", post(account_switch_handler))
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ));

    // The wallet UI is served locally; only loopback origins may call the
    // protected API from a browser.
    let local_origins = [
        format!("http://{}:{}", bound_addr.ip(), bound_addr.port()),
        format!("http://localhost:{}", bound_addr.port()),
    ]
    .iter()
    .map(|origin| {
        HeaderValue::from_str(origin).map_err(|e| ChannelError::StartupFailed {
            name: "provider".to_string(),
            reason: format!("Invalid CORS origin {}: {}", origin, e),
        })
    })
    .collect::<Result<Vec<_>, _>>()?;

    let cors = CorsLayer::new()
        .allow_origin(local_origins)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]))
        .allow_credentials(true);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Provider gateway shutting down");
            })
            .await
        {
            tracing::error!("Provider gateway server error: {}", e);
        }
    });

    tracing::info!("Provider gateway listening on {}", bound_addr);
    Ok(bound_addr)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: "provider",
    })
}

#[derive(Deserialize)]
struct ProviderQuery {
    /// Origin the page claims. Only ever compared against the headers.
    origin: Option<String>,
}

async fn provider_ws_handler(
    headers: HeaderMap,
    Query(query): Query<ProviderQuery>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // Browsers set Origin and Referer themselves; page script cannot forge them.
    let meta = TransportMeta {
        sender_origin: header_str(&headers, header::ORIGIN),
        sender_url: header_str(&headers, header::REFERER),
    };
    let origin = resolve_origin(query.origin.as_deref(), &meta)
        .map_err(|e| (StatusCode::FORBIDDEN, e.to_string()))?;
    tracing::debug!(origin = %origin, "Provider socket upgrade");

    let gateway = Arc::clone(&state.gateway);
    Ok(ws.on_upgrade(move |socket| handle_provider_socket(socket, gateway, meta, query.origin)))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Drive one provider socket until either side closes it.
async fn handle_provider_socket(
    socket: WebSocket,
    gateway: Arc<Gateway>,
    meta: TransportMeta,
    declared: Option<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundFrame>();

    let mut port = match ProviderPort::open(gateway, meta, declared, tx) {
        Ok(port) => port,
        Err(err) => {
            tracing::warn!("Refusing provider socket: {}", err);
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode outbound frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let handshake_deadline = port.handshake_deadline();
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => port.on_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(origin = %port.origin(), "Provider socket error: {}", e);
                    break;
                }
            },
            () = sleep_until(handshake_deadline) => port.check_handshake_timeout(),
        }
    }

    port.close().await;
    writer.abort();
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
