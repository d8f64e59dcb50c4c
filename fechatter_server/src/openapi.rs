//! OpenAPI document for the in-scope HTTP surface (§6). Mirrors the
//! teacher's `utoipa::OpenApi` + swagger-ui wiring, trimmed to the
//! endpoints this crate actually serves.

use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa_swagger_ui::SwaggerUi;

use crate::dtos::*;
use crate::handlers::{conversations, health, maintenance, messages, user};

#[derive(OpenApi)]
#[openapi(
  paths(
    health::health_handler,
    health::whoami_handler,
    conversations::list_conversations_handler,
    conversations::create_conversation_handler,
    conversations::get_conversation_handler,
    conversations::update_conversation_handler,
    conversations::add_member_handler,
    conversations::typing_handler,
    messages::list_messages_handler,
    messages::send_message_handler,
    messages::mark_read_handler,
    messages::mark_all_read_handler,
    messages::set_reaction_handler,
    user::set_status_handler,
    maintenance::recompute_unread_handler,
    maintenance::find_inconsistencies_handler,
    maintenance::repair_all_unread_counts_handler,
  ),
  components(schemas(
    HealthResponse,
    WhoamiResponse,
    ListConversationsQuery,
    CreateConversationBody,
    UpdateConversationBody,
    AddMemberBody,
    ListMessagesQuery,
    SendMessageBody,
    SendMessageResponse,
    ReactionBody,
    StatusBody,
    MarkAllReadResponse,
    InconsistenciesResponse,
    UnreadInconsistency,
    RepairResponse,
  )),
  modifiers(&SecurityAddon),
  tags(
    (name = "health", description = "Liveness and token introspection"),
    (name = "conversations", description = "Conversation lifecycle and membership"),
    (name = "messages", description = "Message write path and unread maintenance"),
    (name = "user", description = "Presence and status"),
    (name = "maintenance", description = "Unread-counter repair"),
  ),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
  fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
    if let Some(components) = openapi.components.as_mut() {
      components.add_security_scheme(
        "bearer",
        SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
      );
    }
  }
}

pub fn swagger_ui() -> SwaggerUi {
  SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
