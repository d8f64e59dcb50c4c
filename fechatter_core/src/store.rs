//! Store Adapter contract (C1, §4.1). Abstracts the document store:
//! conversations, the messages and user_stats subcollections, users,
//! notification preferences, device tokens, and notifications. Concrete
//! implementations (Postgres in `fechatter_server`) live downstream; this
//! crate only defines the shape every caller programs against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::models::{
  Conversation, ConversationType, DeviceToken, DeviceType, Message, MessageType, Notification,
  NotificationPref, User, UserStats,
};

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub page: u32,
  pub size: u32,
  pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationWithUnread {
  #[serde(flatten)]
  pub conversation: Conversation,
  pub unread_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ListConversationsFilter {
  pub conversation_type: Option<ConversationType>,
  pub unread_only: bool,
}

/// Outcome of `create_conversation`: whether a brand-new conversation was
/// inserted or an existing direct conversation was returned (§4.5
/// get-or-create idempotency).
#[derive(Debug, Clone)]
pub enum CreateConversationOutcome {
  Created(Conversation),
  Existing(Conversation),
}

#[async_trait]
pub trait Store: Send + Sync {
  async fn get_conversation(&self, c: &ConversationId) -> Result<Option<Conversation>, AppError>;

  async fn is_participant(&self, c: &ConversationId, u: &UserId) -> Result<bool, AppError> {
    Ok(self
      .get_conversation(c)
      .await?
      .map(|conv| conv.is_participant(u))
      .unwrap_or(false))
  }

  async fn list_conversations(
    &self,
    u: &UserId,
    filter: ListConversationsFilter,
    page: u32,
    size: u32,
  ) -> Result<Page<ConversationWithUnread>, AppError>;

  #[allow(clippy::too_many_arguments)]
  async fn create_conversation(
    &self,
    conversation_type: ConversationType,
    participants: Vec<UserId>,
    name: Option<String>,
    admins: Vec<UserId>,
    creator: UserId,
    initial_message: Option<String>,
  ) -> Result<CreateConversationOutcome, AppError>;

  async fn update_conversation_metadata(
    &self,
    c: &ConversationId,
    name: Option<String>,
    description: Option<String>,
    avatar_url: Option<String>,
  ) -> Result<Conversation, AppError>;

  async fn add_member(&self, c: &ConversationId, user: UserId) -> Result<Conversation, AppError>;

  async fn append_message(
    &self,
    c: &ConversationId,
    sender: &UserId,
    content: &str,
    message_type: MessageType,
    file_info: Option<crate::models::FileInfo>,
  ) -> Result<Message, AppError>;

  async fn get_message(
    &self,
    c: &ConversationId,
    m: &MessageId,
  ) -> Result<Option<Message>, AppError>;

  async fn list_messages(
    &self,
    c: &ConversationId,
    page: u32,
    size: u32,
  ) -> Result<Page<Message>, AppError>;

  /// Last-write-wins preview update (§4.1, §4.5 step 3).
  async fn update_conversation_preview(
    &self,
    c: &ConversationId,
    preview: &str,
    message_type: MessageType,
    sender_id: &UserId,
    timestamp: DateTime<Utc>,
  ) -> Result<(), AppError>;

  /// Atomic per-participant increment, creating UserStats rows as needed
  /// (§4.1, §4.5 step 4).
  async fn bump_unread(&self, c: &ConversationId, participants: &[UserId]) -> Result<(), AppError>;

  /// Returns true iff `u` was newly added (was not already present) —
  /// callers use this to decide whether to decrement (§4.1, §4.6).
  async fn add_to_read_by(
    &self,
    c: &ConversationId,
    m: &MessageId,
    u: &UserId,
  ) -> Result<bool, AppError>;

  async fn decrement_unread(&self, c: &ConversationId, u: &UserId) -> Result<(), AppError>;

  async fn reset_unread(&self, c: &ConversationId, u: &UserId) -> Result<(), AppError>;

  /// Marks every message in `c` not yet read by `u` as read; returns the
  /// count of messages updated (§4.6 mark-all).
  async fn mark_all_read(&self, c: &ConversationId, u: &UserId) -> Result<i64, AppError>;

  /// Recomputes `UserStats.unread_count` for (c, u) from the messages
  /// subcollection; overwrites iff different; returns the new count
  /// (§4.6 recompute).
  async fn recompute_unread(&self, c: &ConversationId, u: &UserId) -> Result<i64, AppError>;

  async fn get_user_stats(&self, c: &ConversationId, u: &UserId) -> Result<UserStats, AppError>;

  /// Sets or deletes `reactions[u]`; returns the resulting map (§4.1).
  async fn set_reaction(
    &self,
    c: &ConversationId,
    m: &MessageId,
    u: &UserId,
    emoji: Option<String>,
  ) -> Result<std::collections::HashMap<UserId, String>, AppError>;

  async fn get_user(&self, u: &UserId) -> Result<Option<User>, AppError>;
  async fn upsert_user(&self, u: &User) -> Result<(), AppError>;
  async fn set_user_online(&self, u: &UserId, online: bool) -> Result<(), AppError>;
  async fn set_user_status(
    &self,
    u: &UserId,
    status: crate::models::UserStatus,
  ) -> Result<(), AppError>;

  async fn get_notification_pref(&self, u: &UserId) -> Result<Option<NotificationPref>, AppError>;

  async fn list_device_tokens(
    &self,
    u: &UserId,
    device_type: Option<DeviceType>,
  ) -> Result<Vec<DeviceToken>, AppError>;

  async fn delete_device_token(&self, u: &UserId, token: &str) -> Result<(), AppError>;

  async fn insert_notification(&self, n: &Notification) -> Result<(), AppError>;

  /// Atomic increment in a store transaction (§4.7 step e, §5).
  async fn increment_unread_notifications(&self, u: &UserId) -> Result<(), AppError>;

  /// Returns (conversation_id, user_id) pairs whose stored unread_count
  /// disagrees with the recomputed value, for the admin repair scan
  /// (§4.6 repair).
  async fn find_unread_inconsistencies(
    &self,
  ) -> Result<Vec<(ConversationId, UserId)>, AppError>;
}
