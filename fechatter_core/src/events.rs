//! Tagged-union wire events (§9 "duck-typed event payloads" redesign).
//! These types back three surfaces that all share the same vocabulary:
//! bus payloads (C2), WebSocket frames (§6 WS), and queue messages (§6
//! queue schema). Unknown variants are dropped by readers, not rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ids::{ConversationId, MessageId, UserId};
use crate::models::{MessageType, UserStatus};

/// Bus / WebSocket event vocabulary (§6 WS server->client + client->server
/// frames, §4.4 on_bus_event dispatch).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event")]
pub enum RealtimeEvent {
  #[serde(rename = "new_message")]
  NewMessage {
    #[serde(rename = "conversationId")]
    conversation_id: ConversationId,
    #[serde(rename = "messageId")]
    message_id: MessageId,
    #[serde(rename = "senderId")]
    sender_id: UserId,
    content: String,
    #[serde(rename = "messageType")]
    message_type: MessageType,
    timestamp: DateTime<Utc>,
    participants: Vec<UserId>,
  },
  #[serde(rename = "typing")]
  Typing {
    #[serde(rename = "conversationId")]
    conversation_id: ConversationId,
    #[serde(rename = "userId")]
    user_id: UserId,
  },
  #[serde(rename = "message_read")]
  MessageRead {
    #[serde(rename = "conversationId")]
    conversation_id: ConversationId,
    #[serde(rename = "messageId")]
    message_id: MessageId,
    #[serde(rename = "userId")]
    user_id: UserId,
  },
  #[serde(rename = "conversation_read")]
  ConversationRead {
    #[serde(rename = "conversationId")]
    conversation_id: ConversationId,
    #[serde(rename = "userId")]
    user_id: UserId,
    count: i64,
  },
  #[serde(rename = "message_reaction")]
  MessageReaction {
    #[serde(rename = "conversationId")]
    conversation_id: ConversationId,
    #[serde(rename = "messageId")]
    message_id: MessageId,
    #[serde(rename = "userId")]
    user_id: UserId,
    reaction: Option<String>,
  },
  #[serde(rename = "user_status_change")]
  UserStatusChange {
    #[serde(rename = "userId")]
    user_id: UserId,
    status: UserStatus,
  },
  #[serde(rename = "heartbeat")]
  Heartbeat,
  #[serde(rename = "heartbeat_ack")]
  HeartbeatAck,
  #[serde(rename = "status_change")]
  StatusChange { status: UserStatus },
}

impl RealtimeEvent {
  pub fn conversation_id(&self) -> Option<&ConversationId> {
    match self {
      RealtimeEvent::NewMessage { conversation_id, .. }
      | RealtimeEvent::Typing { conversation_id, .. }
      | RealtimeEvent::MessageRead { conversation_id, .. }
      | RealtimeEvent::ConversationRead { conversation_id, .. }
      | RealtimeEvent::MessageReaction { conversation_id, .. } => Some(conversation_id),
      _ => None,
    }
  }

  /// Origin user to skip when fanning out locally (§4.4: "skipping
  /// senderId/userId").
  pub fn origin(&self) -> Option<&UserId> {
    match self {
      RealtimeEvent::NewMessage { sender_id, .. } => Some(sender_id),
      RealtimeEvent::Typing { user_id, .. }
      | RealtimeEvent::MessageRead { user_id, .. }
      | RealtimeEvent::ConversationRead { user_id, .. }
      | RealtimeEvent::MessageReaction { user_id, .. } => Some(user_id),
      _ => None,
    }
  }
}

/// Queue message schema (§6 "Queue message schema"). `event` discriminates
/// the notification-consumer dispatch table (§4.7); unknown values are
/// dropped by the consumer, not rejected at the type level, so this is
/// deserialized permissively via `serde_json::Value` dispatch rather than
/// an enum — see `notification_consumer::dispatch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEnvelope {
  pub event: String,
  #[serde(rename = "messageId")]
  pub message_id: Option<String>,
  pub timestamp: DateTime<Utc>,
  #[serde(default, rename = "retryCount")]
  pub retry_count: u32,
  #[serde(default)]
  pub _retry: Option<crate::queue::RetryMeta>,
  #[serde(flatten)]
  pub payload: serde_json::Value,
}
