//! Approval API handlers used by the wallet UI.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::approval::Decision;
use crate::channels::web::server::ServerState;
use crate::channels::web::types::*;

pub async fn approvals_current_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<ApprovalCurrentResponse> {
    Json(ApprovalCurrentResponse {
        request: state.approvals.current(),
        pending: state.gateway.queue().len(),
    })
}

pub async fn approvals_decide_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<ActionResponse>, (StatusCode, String)> {
    let decision = match req.decision {
        DecisionKind::Approve => Decision::Approve,
        DecisionKind::Reject => Decision::Reject,
    };

    if !state.gateway.on_user_decision(id, decision).await {
        return Err((
            StatusCode::CONFLICT,
            format!("Request {id} is no longer awaiting a decision"),
        ));
    }

    Ok(Json(ActionResponse::ok(match decision {
        Decision::Approve => "Request approved",
        Decision::Reject => "Request rejected",
    })))
}

pub async fn approvals_close_handler(
    State(state): State<Arc<ServerState>>,
) -> Json<ActionResponse> {
    state.approvals.close();
    if state.gateway.on_surface_closed().await {
        Json(ActionResponse::ok("Request dismissed"))
    } else {
        Json(ActionResponse::fail("No request was awaiting a decision"))
    }
}
