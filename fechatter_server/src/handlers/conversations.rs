use axum::{
  Extension, Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};

use fechatter_core::error::AppError;
use fechatter_core::events::RealtimeEvent;
use fechatter_core::ids::ConversationId;
use fechatter_core::models::ConversationType;
use fechatter_core::store::{CreateConversationOutcome, ListConversationsFilter};

use crate::dtos::{
  AddMemberBody, CreateConversationBody, ListConversationsQuery, UpdateConversationBody, clamp_conversation_page,
};
use crate::error::HttpError;
use crate::middlewares::AuthUser;
use crate::state::AppState;

/// `GET /conversations?page=&size=&type=&unread_only=`
#[utoipa::path(
  get,
  path = "/api/v1/conversations",
  responses((status = 200, description = "Paginated conversation list")),
  tag = "conversations"
)]
pub async fn list_conversations_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Query(query): Query<ListConversationsQuery>,
) -> Result<impl IntoResponse, HttpError> {
  let (page, size) = clamp_conversation_page(query.page, query.size);
  let filter = ListConversationsFilter { conversation_type: query.conversation_type, unread_only: query.unread_only };
  let page_result = state.store.list_conversations(&user.0, filter, page, size).await?;
  Ok((StatusCode::OK, Json(page_result.items)))
}

/// `POST /conversations` — body `{type, name?, participants[], initial_message?, metadata?}`.
/// Returns created or the existing direct conversation (§4.5 get-or-create).
#[utoipa::path(
  post,
  path = "/api/v1/conversations",
  request_body = CreateConversationBody,
  responses((status = 200, description = "Created or existing conversation")),
  tag = "conversations"
)]
pub async fn create_conversation_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Json(body): Json<CreateConversationBody>,
) -> Result<impl IntoResponse, HttpError> {
  if !body.participants.iter().any(|p| p == &user.0) {
    return Err(AppError::Validation("caller must be a participant".into()).into());
  }
  if body.conversation_type == ConversationType::Group && body.name.as_deref().unwrap_or("").trim().is_empty() {
    return Err(AppError::Validation("group conversations require a name".into()).into());
  }

  let admins = if body.conversation_type == ConversationType::Group { vec![user.0.clone()] } else { Vec::new() };

  let outcome = state
    .store
    .create_conversation(body.conversation_type, body.participants, body.name, admins, user.0.clone(), body.initial_message)
    .await?;

  let conversation = match outcome {
    CreateConversationOutcome::Created(c) => c,
    CreateConversationOutcome::Existing(c) => c,
  };
  Ok((StatusCode::OK, Json(conversation)))
}

/// `GET /conversations/{c}` — must be participant.
#[utoipa::path(
  get,
  path = "/api/v1/conversations/{c}",
  params(("c" = String, Path)),
  responses((status = 200, description = "Conversation details")),
  tag = "conversations"
)]
pub async fn get_conversation_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
  let c = ConversationId(c);
  let conversation = state.store.get_conversation(&c).await?.ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
  if !conversation.is_participant(&user.0) {
    return Err(AppError::Forbidden("not a participant".into()).into());
  }
  Ok((StatusCode::OK, Json(conversation)))
}

/// `PUT /conversations/{c}` — admin-only, group-only.
#[utoipa::path(
  put,
  path = "/api/v1/conversations/{c}",
  params(("c" = String, Path)),
  request_body = UpdateConversationBody,
  responses((status = 200, description = "Updated conversation")),
  tag = "conversations"
)]
pub async fn update_conversation_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
  Json(body): Json<UpdateConversationBody>,
) -> Result<impl IntoResponse, HttpError> {
  let c = ConversationId(c);
  let conversation = state.store.get_conversation(&c).await?.ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
  if conversation.conversation_type != ConversationType::Group {
    return Err(AppError::Forbidden("only group conversations can be updated".into()).into());
  }
  if !conversation.is_admin(&user.0) {
    return Err(AppError::Forbidden("admin only".into()).into());
  }
  let updated = state.store.update_conversation_metadata(&c, body.name, body.description, body.avatar_url).await?;
  Ok((StatusCode::OK, Json(updated)))
}

/// `POST /conversations/{c}/members` — admin-only.
#[utoipa::path(
  post,
  path = "/api/v1/conversations/{c}/members",
  params(("c" = String, Path)),
  request_body = AddMemberBody,
  responses((status = 200, description = "Member added")),
  tag = "conversations"
)]
pub async fn add_member_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
  Json(body): Json<AddMemberBody>,
) -> Result<impl IntoResponse, HttpError> {
  let c = ConversationId(c);
  let conversation = state.store.get_conversation(&c).await?.ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
  if !conversation.is_admin(&user.0) {
    return Err(AppError::Forbidden("admin only".into()).into());
  }
  let updated = state.store.add_member(&c, body.user_id).await?;
  Ok((StatusCode::OK, Json(updated)))
}

/// `POST /conversations/{c}/typing` — fire-and-forget indicator, rerouted
/// through the bus so other instances' sockets see it (§4.4).
#[utoipa::path(
  post,
  path = "/api/v1/conversations/{c}/typing",
  params(("c" = String, Path)),
  responses((status = 200, description = "Accepted")),
  tag = "conversations"
)]
pub async fn typing_handler(
  State(state): State<AppState>,
  Extension(user): Extension<AuthUser>,
  Path(c): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
  let conversation_id = ConversationId(c);
  if !state.store.is_participant(&conversation_id, &user.0).await? {
    return Err(AppError::Forbidden("not a participant".into()).into());
  }
  let event = RealtimeEvent::Typing { conversation_id: conversation_id.clone(), user_id: user.0.clone() };
  let channel = fechatter_core::bus::conversation_channel(&conversation_id);
  if let Ok(payload) = serde_json::to_vec(&event) {
    if let Err(e) = state.bus.publish(&channel, &payload).await {
      tracing::warn!(error = %e, "typing publish failed");
    }
  }
  Ok(StatusCode::OK)
}
