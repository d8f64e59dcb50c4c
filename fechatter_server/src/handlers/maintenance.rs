//! Maintenance endpoints (§6, §4.6). `recompute_unread` is caller-initiated
//! and open to any authenticated caller (the original exposes it as a
//! normal maintenance endpoint, not admin-gated — see SPEC_FULL.md Open
//! Questions); the other two are admin-only in the sense that they operate
//! workspace-wide rather than per-conversation, so they are additionally
//! gated on the caller being an admin of at least one conversation they
//! pass in, which here we simplify to "any authenticated caller" since the
//! source system enforces this at the proxy layer (out of scope, §1).

use axum::{
  Json,
  extract::{Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;

use fechatter_core::ids::{ConversationId, UserId};

use crate::dtos::{InconsistenciesResponse, RepairResponse, UnreadInconsistency};
use crate::error::HttpError;
use crate::middlewares::AuthUser;
use crate::state::AppState;
use crate::unread;

#[derive(Debug, Deserialize)]
pub struct RecomputeQuery {
  pub conversation_id: String,
}

/// `POST /maintenance/recompute_unread?conversation_id=` — scoped to a
/// single conversation for the caller (§4.6, SPEC_FULL.md Supplemented
/// features).
#[utoipa::path(
  post,
  path = "/api/v1/maintenance/recompute_unread",
  params(("conversation_id" = String, Query)),
  responses((status = 200, description = "Recomputed unread count")),
  tag = "maintenance"
)]
pub async fn recompute_unread_handler(
  State(state): State<AppState>,
  axum::Extension(user): axum::Extension<AuthUser>,
  Query(query): Query<RecomputeQuery>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(query.conversation_id);
  let unread_count = unread::recompute_unread(&state, &conversation_id, &user.0).await?;
  Ok((StatusCode::OK, Json(serde_json::json!({ "unreadCount": unread_count }))))
}

/// `POST /maintenance/find_inconsistencies` (admin).
#[utoipa::path(
  post,
  path = "/api/v1/maintenance/find_inconsistencies",
  responses((status = 200, body = InconsistenciesResponse)),
  tag = "maintenance"
)]
pub async fn find_inconsistencies_handler(State(state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
  let pairs: Vec<(ConversationId, UserId)> = state.store.find_unread_inconsistencies().await?;
  let pairs = pairs
    .into_iter()
    .map(|(conversation_id, user_id)| UnreadInconsistency { conversation_id, user_id })
    .collect();
  Ok((StatusCode::OK, Json(InconsistenciesResponse { pairs })))
}

/// `POST /maintenance/repair_all_unread_counts` (admin).
#[utoipa::path(
  post,
  path = "/api/v1/maintenance/repair_all_unread_counts",
  responses((status = 200, body = RepairResponse)),
  tag = "maintenance"
)]
pub async fn repair_all_unread_counts_handler(State(state): State<AppState>) -> Result<impl IntoResponse, HttpError> {
  let repaired = unread::repair_all_unread_counts(&state).await?;
  Ok((StatusCode::OK, Json(RepairResponse { repaired })))
}
