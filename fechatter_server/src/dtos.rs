//! Request/response bodies for the HTTP surface (§6).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use fechatter_core::ids::{ConversationId, MessageId, UserId};
use fechatter_core::models::{ConversationType, FileInfo, MessageType, UserStatus};

fn default_page() -> u32 {
  1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListConversationsQuery {
  #[serde(default = "default_page")]
  pub page: u32,
  pub size: Option<u32>,
  #[serde(rename = "type")]
  pub conversation_type: Option<ConversationType>,
  #[serde(default)]
  pub unread_only: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ListMessagesQuery {
  #[serde(default = "default_page")]
  pub page: u32,
  pub size: Option<u32>,
}

/// Clamps to §8's pagination boundaries: `page >= 1`, `50 <= size <= 200`
/// for conversations, `1 <= size <= 100` for messages.
pub fn clamp_conversation_page(page: u32, size: Option<u32>) -> (u32, u32) {
  (page.max(1), size.unwrap_or(50).clamp(50, 200))
}

pub fn clamp_message_page(page: u32, size: Option<u32>) -> (u32, u32) {
  (page.max(1), size.unwrap_or(20).clamp(1, 100))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConversationBody {
  #[serde(rename = "type")]
  pub conversation_type: ConversationType,
  pub name: Option<String>,
  pub participants: Vec<UserId>,
  pub initial_message: Option<String>,
  #[serde(default)]
  pub metadata: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateConversationBody {
  pub name: Option<String>,
  pub description: Option<String>,
  pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddMemberBody {
  pub user_id: UserId,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageBody {
  pub content: String,
  pub message_type: MessageType,
  pub file_info: Option<FileInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SendMessageResponse {
  #[serde(rename = "messageId")]
  pub message_id: MessageId,
  pub timestamp: chrono::DateTime<chrono::Utc>,
  pub status: &'static str,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ReactionBody {
  pub reaction: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusBody {
  pub status: UserStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkAllReadResponse {
  #[serde(rename = "messagesRead")]
  pub messages_read: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RepairResponse {
  pub repaired: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UnreadInconsistency {
  pub conversation_id: ConversationId,
  pub user_id: UserId,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InconsistenciesResponse {
  pub pairs: Vec<UnreadInconsistency>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
  pub status: &'static str,
  pub version: &'static str,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WhoamiResponse {
  pub user_id: UserId,
}
