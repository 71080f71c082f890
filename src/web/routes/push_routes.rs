use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;

use crate::service_monitor::push::{PushOutcome, PushParams};
use crate::web::{AppError, AppState};

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub ok: bool,
    pub msg: &'static str,
}

pub fn create_push_router() -> Router<Arc<AppState>> {
    Router::new().route("/{token}", get(receive_push).post(receive_push))
}

#[axum::debug_handler]
async fn receive_push(
    State(app_state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Query(params): Query<PushParams>,
) -> Result<Json<PushResponse>, AppError> {
    let msg = match app_state.push_receiver.receive(&token, &params).await? {
        PushOutcome::Recorded(_) => "Heartbeat received",
        PushOutcome::Paused => "Monitor is paused",
    };
    Ok(Json(PushResponse { ok: true, msg }))
}
