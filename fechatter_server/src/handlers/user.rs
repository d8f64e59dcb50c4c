//! `POST /user/status` (§6).

use axum::{Extension, extract::State, http::StatusCode, response::IntoResponse, Json};

use fechatter_core::events::RealtimeEvent;

use crate::dtos::StatusBody;
use crate::error::HttpError;
use crate::middlewares::AuthUser;
use crate::state::AppState;

#[utoipa::path(
  post,
  path = "/api/v1/user/status",
  request_body = StatusBody,
  responses((status = 200, description = "Status updated")),
  tag = "user"
)]
pub async fn set_status_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Json(body): Json<StatusBody>,
) -> Result<impl IntoResponse, HttpError> {
  state.store.set_user_status(&user.0, body.status).await?;

  // Rerouted through the bus so every instance's sockets see it (§4.4).
  let event = RealtimeEvent::UserStatusChange { user_id: user.0.clone(), status: body.status };
  if let Ok(payload) = serde_json::to_vec(&event) {
    let channel = format!("user_status:{}", user.0);
    if let Err(e) = state.bus.publish(&channel, &payload).await {
      tracing::warn!(error = %e, "status publish failed");
    }
  }

  Ok(StatusCode::OK)
}
