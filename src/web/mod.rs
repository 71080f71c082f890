use axum::{Router, http::Method, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::db::MonitorStore;
use crate::server::result_broadcaster::HeartbeatBroadcaster;
use crate::service_monitor::push::PushReceiver;
use crate::service_monitor::scheduler::MonitorScheduler;
use crate::web::routes::*;

pub mod error;
pub mod routes;
pub mod websocket_handler;

pub use error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MonitorStore>,
    pub scheduler: Arc<MonitorScheduler>,
    pub push_receiver: Arc<PushReceiver>,
    pub heartbeat_broadcaster: HeartbeatBroadcaster,
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .route("/ws/heartbeats", get(websocket_handler::websocket_handler))
        .nest("/api/push", push_routes::create_push_router())
        .nest("/api/scheduler", scheduler_routes::create_scheduler_router())
        .with_state(app_state)
        .layer(cors)
}
