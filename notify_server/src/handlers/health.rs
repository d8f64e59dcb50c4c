use axum::extract::State;
use axum::response::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::observability;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  pub status: String,
  pub service: String,
  pub version: String,
  pub timestamp: DateTime<Utc>,
  pub connected_users: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
  let start = Instant::now();
  let connected_users = state.connections.local_connection_counts().len();

  observability::metrics::collectors::HealthMetrics::health_check_completed(start.elapsed(), true);
  observability::metrics::collectors::OnlineUsersMetrics::set_count(connected_users);

  Json(HealthResponse {
    status: "healthy".to_string(),
    service: "notify_server".to_string(),
    version: env!("CARGO_PKG_VERSION").to_string(),
    timestamp: Utc::now(),
    connected_users,
  })
}

pub async fn readiness_check() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "ready", "service": "notify_server" }))
}

pub async fn liveness_check() -> Json<serde_json::Value> {
  Json(serde_json::json!({ "status": "alive", "service": "notify_server" }))
}
