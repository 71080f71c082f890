use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::service_monitor::scheduler::SchedulerStatus;
use crate::web::{AppError, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerChange {
    pub monitor_id: i32,
    pub scheduled: bool,
}

pub fn create_scheduler_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/status", get(scheduler_status))
        .route("/monitors/{id}", post(reload_monitor).delete(stop_monitor))
}

async fn scheduler_status(State(app_state): State<Arc<AppState>>) -> Json<SchedulerStatus> {
    Json(app_state.scheduler.status().await)
}

/// Re-reads the monitor and restarts its timer. Called after create, edit or (de)activation.
#[axum::debug_handler]
async fn reload_monitor(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<TimerChange>, AppError> {
    let Some(monitor) = app_state.store.get_monitor(id).await? else {
        app_state.scheduler.stop(id).await;
        return Err(AppError::NotFound(format!("Monitor {id} not found")));
    };
    let scheduled = app_state.scheduler.start(monitor).await;
    info!(monitor_id = id, scheduled = scheduled, "Monitor timer reloaded.");
    Ok(Json(TimerChange {
        monitor_id: id,
        scheduled,
    }))
}

async fn stop_monitor(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Json<TimerChange> {
    app_state.scheduler.stop(id).await;
    Json(TimerChange {
        monitor_id: id,
        scheduled: false,
    })
}
