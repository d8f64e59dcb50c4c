use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthBody {
  status: &'static str,
  version: &'static str,
}

/// `GET /health` (§6, unauthenticated). The consumer has no other HTTP
/// surface — everything else runs off the queue (§4.7).
pub async fn health_handler() -> Json<HealthBody> {
  Json(HealthBody { status: "ok", version: env!("CARGO_PKG_VERSION") })
}
