use axum::{Extension, Json, extract::State, response::IntoResponse};

use crate::dtos::{HealthResponse, WhoamiResponse};
use crate::middlewares::AuthUser;
use crate::state::AppState;

/// `GET /health` — unauthenticated.
#[utoipa::path(get, path = "/api/v1/health", responses((status = 200, body = HealthResponse)), tag = "health")]
pub async fn health_handler() -> impl IntoResponse {
  Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

/// `GET /whoami` — decoded token echo.
#[utoipa::path(get, path = "/api/v1/whoami", responses((status = 200, body = WhoamiResponse)), tag = "health")]
pub async fn whoami_handler(State(_state): State<AppState>, Extension(user): Extension<AuthUser>) -> impl IntoResponse {
  Json(WhoamiResponse { user_id: user.0 })
}
