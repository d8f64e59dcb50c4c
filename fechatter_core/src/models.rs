//! Domain model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use utoipa::ToSchema;

use crate::ids::{ConversationId, MessageId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
  Direct,
  Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
  Text,
  Image,
  Video,
  Audio,
  File,
}

impl MessageType {
  pub fn has_file_info(self) -> bool {
    !matches!(self, MessageType::Text)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
  Available,
  Away,
  Busy,
  Invisible,
  Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FileInfo {
  pub url: String,
  pub mime_type: Option<String>,
  pub size_bytes: Option<i64>,
  pub file_name: Option<String>,
}

/// Conversation (§3).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Conversation {
  pub id: ConversationId,
  pub conversation_type: ConversationType,
  pub participants: Vec<UserId>,
  pub name: Option<String>,
  pub admins: Vec<UserId>,
  pub avatar_url: Option<String>,
  pub description: Option<String>,
  pub created_at: DateTime<Utc>,
  pub last_message_time: Option<DateTime<Utc>>,
  pub last_message_preview: Option<String>,
  pub last_message_type: Option<MessageType>,
  pub last_message_sender_id: Option<UserId>,
  pub muted_by: HashSet<UserId>,
  pub metadata: serde_json::Value,
}

impl Conversation {
  pub fn is_participant(&self, user: &UserId) -> bool {
    self.participants.iter().any(|p| p == user)
  }

  pub fn is_admin(&self, user: &UserId) -> bool {
    self.admins.iter().any(|a| a == user)
  }

  /// Sorted participant pair, used as the uniqueness key for direct
  /// conversations (§3 invariant).
  pub fn direct_key(mut participants: Vec<UserId>) -> Vec<UserId> {
    participants.sort();
    participants.dedup();
    participants
  }
}

/// Truncate a preview to 50 chars plus an ellipsis (§4.1, §8 boundary).
pub fn truncate_preview(content: &str) -> String {
  const MAX: usize = 50;
  let chars: Vec<char> = content.chars().collect();
  if chars.len() <= MAX {
    content.to_string()
  } else {
    let head: String = chars[..MAX].iter().collect();
    format!("{head}...")
  }
}

/// Message (§3), child of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
  pub id: MessageId,
  pub conversation_id: ConversationId,
  pub sender_id: UserId,
  pub content: String,
  pub message_type: MessageType,
  pub timestamp: DateTime<Utc>,
  pub read_by: HashSet<UserId>,
  pub reactions: HashMap<UserId, String>,
  pub file_info: Option<FileInfo>,
}

/// Per-(conversation, user) bookkeeping row (§3).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserStats {
  pub conversation_id: ConversationId,
  pub user_id: UserId,
  pub unread_count: i64,
  pub last_read_message_id: Option<MessageId>,
}

/// User (§3).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
  pub id: UserId,
  pub name: Option<String>,
  pub is_online: bool,
  pub status: UserStatus,
  pub last_active: DateTime<Utc>,
  pub unread_notifications: i64,
}

/// Per-user notification preferences (§3).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationPref {
  pub user_id: UserId,
  pub push_enabled: bool,
  pub message_notifications: bool,
  pub group_notifications: bool,
  pub friend_request_notifications: bool,
  pub system_notifications: bool,
  pub mute_until: Option<DateTime<Utc>>,
}

impl Default for NotificationPref {
  fn default() -> Self {
    Self {
      user_id: UserId(String::new()),
      push_enabled: true,
      message_notifications: true,
      group_notifications: true,
      friend_request_notifications: true,
      system_notifications: true,
      mute_until: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
  Ios,
  Android,
  Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceToken {
  pub user_id: UserId,
  pub token: String,
  pub device_type: DeviceType,
  pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
  NewMessage,
  GroupInvitation,
  FriendRequest,
  DirectConversationCreated,
  GroupConversationCreated,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
  pub id: String,
  pub user_id: UserId,
  pub notification_type: NotificationType,
  pub title: String,
  pub body: String,
  pub data: BTreeMap<String, String>,
  pub is_read: bool,
  pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn preview_under_limit_is_untouched() {
    assert_eq!(truncate_preview("hi"), "hi");
  }

  #[test]
  fn preview_over_limit_truncates_with_ellipsis() {
    let long = "a".repeat(60);
    let out = truncate_preview(&long);
    assert_eq!(out.chars().count(), 53);
    assert!(out.ends_with("..."));
  }

  #[test]
  fn direct_key_is_sorted_and_deduped() {
    let a = UserId("+2".into());
    let b = UserId("+1".into());
    let key = Conversation::direct_key(vec![a.clone(), b.clone(), b.clone()]);
    assert_eq!(key, vec![b, a]);
  }
}
