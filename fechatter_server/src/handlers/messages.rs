//! Message endpoints (§6 HTTP): send, list, read-receipt, mark-all-read,
//! reactions. Thin wrappers over C5 (`write_path`) and C6 (`unread`).

use axum::{
  Extension, Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};

use fechatter_core::error::AppError;
use fechatter_core::ids::{ConversationId, MessageId};

use crate::dtos::{
  ListMessagesQuery, MarkAllReadResponse, ReactionBody, SendMessageBody, SendMessageResponse,
  clamp_message_page,
};
use crate::error::HttpError;
use crate::middlewares::AuthUser;
use crate::state::AppState;
use crate::{unread, write_path};

/// `GET /conversations/{c}/messages?page=&size=` — desc by timestamp.
#[utoipa::path(
  get,
  path = "/api/v1/conversations/{c}/messages",
  params(("c" = String, Path)),
  responses((status = 200, description = "Paginated message list")),
  tag = "messages"
)]
pub async fn list_messages_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
  Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(c);
  if !state.store.is_participant(&conversation_id, &user.0).await? {
    return Err(AppError::Forbidden("not a participant".into()).into());
  }
  let (page, size) = clamp_message_page(query.page, query.size);
  let mut page_result = state.store.list_messages(&conversation_id, page, size).await?;
  page_result.items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
  Ok((StatusCode::OK, Json(page_result.items)))
}

/// `POST /conversations/{c}/messages` — body `{content, messageType}`.
#[utoipa::path(
  post,
  path = "/api/v1/conversations/{c}/messages",
  params(("c" = String, Path)),
  request_body = SendMessageBody,
  responses((status = 200, body = SendMessageResponse)),
  tag = "messages"
)]
pub async fn send_message_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
  Json(body): Json<SendMessageBody>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(c);
  let sent = write_path::write_message(
    &state,
    &conversation_id,
    &user.0,
    &body.content,
    body.message_type,
    body.file_info,
  )
  .await?;

  Ok((
    StatusCode::OK,
    Json(SendMessageResponse {
      message_id: sent.message.id,
      timestamp: sent.message.timestamp,
      status: "sent",
    }),
  ))
}

/// `POST /conversations/{c}/messages/{m}/read` — idempotent.
#[utoipa::path(
  post,
  path = "/api/v1/conversations/{c}/messages/{m}/read",
  params(("c" = String, Path), ("m" = String, Path)),
  responses((status = 200, description = "Marked read")),
  tag = "messages"
)]
pub async fn mark_read_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path((c, m)): Path<(String, String)>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(c);
  let message_id = MessageId(m);
  if !state.store.is_participant(&conversation_id, &user.0).await? {
    return Err(AppError::Forbidden("not a participant".into()).into());
  }
  unread::mark_read(&state, &conversation_id, &message_id, &user.0).await?;
  Ok(StatusCode::OK)
}

/// `POST /conversations/{c}/mark_all_read`.
#[utoipa::path(
  post,
  path = "/api/v1/conversations/{c}/mark_all_read",
  params(("c" = String, Path)),
  responses((status = 200, body = MarkAllReadResponse)),
  tag = "messages"
)]
pub async fn mark_all_read_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(c);
  if !state.store.is_participant(&conversation_id, &user.0).await? {
    return Err(AppError::Forbidden("not a participant".into()).into());
  }
  let messages_read = unread::mark_all_read(&state, &conversation_id, &user.0).await?;
  Ok((StatusCode::OK, Json(MarkAllReadResponse { messages_read })))
}

/// `POST /conversations/{c}/messages/{m}/reactions` — body
/// `{reaction: string|null}`; returns the updated reactions map.
#[utoipa::path(
  post,
  path = "/api/v1/conversations/{c}/messages/{m}/reactions",
  params(("c" = String, Path), ("m" = String, Path)),
  request_body = ReactionBody,
  responses((status = 200, description = "Updated reactions map")),
  tag = "messages"
)]
pub async fn set_reaction_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path((c, m)): Path<(String, String)>,
  Json(body): Json<ReactionBody>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(c);
  let message_id = MessageId(m);
  if !state.store.is_participant(&conversation_id, &user.0).await? {
    return Err(AppError::Forbidden("not a participant".into()).into());
  }
  let reactions = state
    .store
    .set_reaction(&conversation_id, &message_id, &user.0, body.reaction.clone())
    .await?;

  let event = fechatter_core::events::RealtimeEvent::MessageReaction {
    conversation_id: conversation_id.clone(),
    message_id: message_id.clone(),
    user_id: user.0.clone(),
    reaction: body.reaction,
  };
  let channel = fechatter_core::bus::conversation_channel(&conversation_id);
  if let Ok(payload) = serde_json::to_vec(&event) {
    if let Err(e) = state.bus.publish(&channel, &payload).await {
      tracing::warn!(error = %e, "reaction publish failed");
    }
  }

  Ok((StatusCode::OK, Json(reactions)))
}
