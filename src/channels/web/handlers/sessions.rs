//! Session and account management handlers for the wallet settings surface.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use crate::broadcast::BroadcastOutcome;
use crate::channels::web::server::ServerState;
use crate::channels::web::types::*;
use crate::error::GatewayError;
use crate::keystore::PublicKey;
use crate::origin::Origin;

pub async fn sessions_list_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<SessionListResponse>, (StatusCode, String)> {
    let records = state
        .gateway
        .sessions()
        .list()
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(SessionListResponse {
        sessions: records.iter().map(SessionInfo::from).collect(),
    }))
}

pub async fn sessions_revoke_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<RevokeQuery>,
) -> Result<Json<ActionResponse>, (StatusCode, String)> {
    let origin = Origin::parse(&query.origin).ok_or((
        StatusCode::BAD_REQUEST,
        format!("'{}' is not a valid origin", query.origin),
    ))?;

    let existed = state
        .gateway
        .revoke(&origin)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(if existed {
        ActionResponse::ok(format!("Disconnected {origin}"))
    } else {
        ActionResponse::fail(format!("{origin} was not connected"))
    }))
}

pub async fn account_switch_handler(
    State(state): State<Arc<ServerState>>,
    Json(req): Json<AccountSwitchRequest>,
) -> Result<Json<ActionResponse>, (StatusCode, String)> {
    let key = req.public_key.trim();
    if key.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "public_key is required".to_string()));
    }

    match state
        .gateway
        .request_account_switch(PublicKey::new(key))
        .await
    {
        Ok(BroadcastOutcome::Unchanged) => Ok(Json(ActionResponse::ok("Account already active"))),
        Ok(BroadcastOutcome::Held) => Ok(Json(ActionResponse::ok(
            "Account switched; connected sites will be notified when the signer is free",
        ))),
        Ok(BroadcastOutcome::Sent(n)) => Ok(Json(ActionResponse::ok(format!(
            "Account switched; notified {n} port(s)"
        )))),
        Err(err @ GatewayError::SignerBusy { .. }) => Err((StatusCode::CONFLICT, err.to_string())),
        Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}
