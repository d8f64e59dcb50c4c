//! Maps `fechatter_core::AppError` to HTTP responses for the handful of
//! plain HTTP endpoints this crate still serves (§7). The WebSocket surface
//! uses close codes instead (§4.4), not HTTP status.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use fechatter_core::AppError;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
  detail: String,
}

pub struct HttpError(pub AppError);

impl From<AppError> for HttpError {
  fn from(e: AppError) -> Self {
    HttpError(e)
  }
}

impl IntoResponse for HttpError {
  fn into_response(self) -> Response {
    let (status, detail) = match &self.0 {
      AppError::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
      AppError::Auth(m) => (StatusCode::UNAUTHORIZED, m.clone()),
      AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
      AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
      AppError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
      AppError::ServiceUnavailable(m) => {
        tracing::error!("service unavailable: {m}");
        (StatusCode::SERVICE_UNAVAILABLE, "service unavailable".into())
      }
      AppError::Internal(m) => {
        tracing::error!("internal error: {m}");
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
      }
    };
    (status, Json(ErrorBody { detail })).into_response()
  }
}
