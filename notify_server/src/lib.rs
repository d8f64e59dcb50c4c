//! Realtime delivery plane: the WebSocket surface and Connection Manager
//! (C4) sitting on top of the shared Bus (C2) contract.

pub mod bus_listener;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod state;
pub mod ws;

pub use config::AppConfig;
pub use state::AppState;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Assembles the router: the WS upgrade endpoint plus the health/ready/live
/// trio, matching the teacher's public-endpoint shape (§7).
pub fn get_router(state: AppState) -> Router {
  Router::new()
    .route("/ws/{user_id}", get(ws::ws_handler))
    .route("/health", get(handlers::health_check))
    .route("/ready", get(handlers::readiness_check))
    .route("/live", get(handlers::liveness_check))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
