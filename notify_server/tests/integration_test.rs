//! Cross-instance fan-out (§8 scenario 6): two `ConnectionManager`s, each
//! standing in for one server instance, share a conversation whose
//! participants hold one socket apiece on different instances. A message
//! posted through one instance's `on_bus_event` must reach the other
//! instance's socket exactly once, and never echo back to the sender.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::Message as WsMessage;
use tokio::sync::mpsc;

use fechatter_core::bus::{Bus, BusHandler, ConnectionMeta};
use fechatter_core::error::AppError;
use fechatter_core::events::RealtimeEvent;
use fechatter_core::ids::{ConversationId, MessageId, UserId};
use fechatter_core::models::*;
use fechatter_core::store::{ConversationWithUnread, CreateConversationOutcome, ListConversationsFilter, Page, Store};
use notify_server::connection_manager::ConnectionManager;

/// A `Bus` fake that just counts registered connections cluster-wide,
/// standing in for the Redis-backed connection registry (§3
/// ConnectionRegistry). `listener_loop`/`subscribe` are no-ops here — this
/// test drives fan-out directly via `on_bus_event`, the way `bus_listener`
/// would after deserializing a delivered message.
#[derive(Default)]
struct SharedRegistryBus {
  connections: std::sync::Mutex<HashMap<String, usize>>,
}

#[async_trait]
impl Bus for SharedRegistryBus {
  async fn publish(&self, _channel: &str, _payload: &[u8]) -> Result<u64, AppError> {
    Ok(0)
  }
  async fn subscribe(&self, _instance: &str, _channels: &[String]) -> Result<(), AppError> {
    Ok(())
  }
  async fn unsubscribe(&self, _instance: &str, _channels: &[String]) -> Result<(), AppError> {
    Ok(())
  }
  async fn listener_loop(&self, _instance: &str, _handler: BusHandler) -> Result<(), AppError> {
    Ok(())
  }
  async fn register_connection(&self, user: &UserId, _connection_id: &str, _meta: ConnectionMeta) -> Result<(), AppError> {
    *self.connections.lock().unwrap().entry(user.0.clone()).or_insert(0) += 1;
    Ok(())
  }
  async fn unregister_connection(&self, user: &UserId, _connection_id: &str) -> Result<(), AppError> {
    if let Some(count) = self.connections.lock().unwrap().get_mut(&user.0) {
      *count = count.saturating_sub(1);
    }
    Ok(())
  }
  async fn connection_count(&self, user: &UserId) -> Result<u64, AppError> {
    Ok(*self.connections.lock().unwrap().get(&user.0).unwrap_or(&0) as u64)
  }
}

/// A `Store` fake carrying a single fixed conversation, enough for
/// `refresh_conversations_served`/`fan_out_to_conversation` to resolve
/// participants without a real Postgres instance.
struct FixedConversationStore {
  conversation: Conversation,
}

#[async_trait]
impl Store for FixedConversationStore {
  async fn get_conversation(&self, c: &ConversationId) -> Result<Option<Conversation>, AppError> {
    if *c == self.conversation.id { Ok(Some(self.conversation.clone())) } else { Ok(None) }
  }
  async fn list_conversations(
    &self,
    u: &UserId,
    _filter: ListConversationsFilter,
    page: u32,
    size: u32,
  ) -> Result<Page<ConversationWithUnread>, AppError> {
    if self.conversation.is_participant(u) {
      Ok(Page {
        items: vec![ConversationWithUnread { conversation: self.conversation.clone(), unread_count: 0 }],
        page,
        size,
        total: 1,
      })
    } else {
      Ok(Page { items: vec![], page, size, total: 0 })
    }
  }
  async fn create_conversation(
    &self,
    _t: ConversationType,
    _p: Vec<UserId>,
    _n: Option<String>,
    _a: Vec<UserId>,
    _creator: UserId,
    _m: Option<String>,
  ) -> Result<CreateConversationOutcome, AppError> {
    unreachable!()
  }
  async fn update_conversation_metadata(
    &self,
    _c: &ConversationId,
    _n: Option<String>,
    _d: Option<String>,
    _a: Option<String>,
  ) -> Result<Conversation, AppError> {
    unreachable!()
  }
  async fn add_member(&self, _c: &ConversationId, _u: UserId) -> Result<Conversation, AppError> {
    unreachable!()
  }
  async fn append_message(
    &self,
    _c: &ConversationId,
    _s: &UserId,
    _content: &str,
    _t: MessageType,
    _f: Option<FileInfo>,
  ) -> Result<Message, AppError> {
    unreachable!()
  }
  async fn get_message(&self, _c: &ConversationId, _m: &MessageId) -> Result<Option<Message>, AppError> {
    Ok(None)
  }
  async fn list_messages(&self, _c: &ConversationId, page: u32, size: u32) -> Result<Page<Message>, AppError> {
    Ok(Page { items: vec![], page, size, total: 0 })
  }
  async fn update_conversation_preview(
    &self,
    _c: &ConversationId,
    _p: &str,
    _t: MessageType,
    _s: &UserId,
    _ts: chrono::DateTime<chrono::Utc>,
  ) -> Result<(), AppError> {
    Ok(())
  }
  async fn bump_unread(&self, _c: &ConversationId, _p: &[UserId]) -> Result<(), AppError> {
    Ok(())
  }
  async fn add_to_read_by(&self, _c: &ConversationId, _m: &MessageId, _u: &UserId) -> Result<bool, AppError> {
    Ok(true)
  }
  async fn decrement_unread(&self, _c: &ConversationId, _u: &UserId) -> Result<(), AppError> {
    Ok(())
  }
  async fn reset_unread(&self, _c: &ConversationId, _u: &UserId) -> Result<(), AppError> {
    Ok(())
  }
  async fn mark_all_read(&self, _c: &ConversationId, _u: &UserId) -> Result<i64, AppError> {
    Ok(0)
  }
  async fn recompute_unread(&self, _c: &ConversationId, _u: &UserId) -> Result<i64, AppError> {
    Ok(0)
  }
  async fn get_user_stats(&self, _c: &ConversationId, _u: &UserId) -> Result<UserStats, AppError> {
    unreachable!()
  }
  async fn set_reaction(
    &self,
    _c: &ConversationId,
    _m: &MessageId,
    _u: &UserId,
    _e: Option<String>,
  ) -> Result<HashMap<UserId, String>, AppError> {
    Ok(HashMap::new())
  }
  async fn get_user(&self, _u: &UserId) -> Result<Option<User>, AppError> {
    Ok(None)
  }
  async fn upsert_user(&self, _u: &User) -> Result<(), AppError> {
    Ok(())
  }
  async fn set_user_online(&self, _u: &UserId, _online: bool) -> Result<(), AppError> {
    Ok(())
  }
  async fn set_user_status(&self, _u: &UserId, _s: UserStatus) -> Result<(), AppError> {
    Ok(())
  }
  async fn get_notification_pref(&self, _u: &UserId) -> Result<Option<NotificationPref>, AppError> {
    Ok(None)
  }
  async fn list_device_tokens(&self, _u: &UserId, _d: Option<DeviceType>) -> Result<Vec<DeviceToken>, AppError> {
    Ok(vec![])
  }
  async fn delete_device_token(&self, _u: &UserId, _t: &str) -> Result<(), AppError> {
    Ok(())
  }
  async fn insert_notification(&self, _n: &Notification) -> Result<(), AppError> {
    Ok(())
  }
  async fn increment_unread_notifications(&self, _u: &UserId) -> Result<(), AppError> {
    Ok(())
  }
  async fn find_unread_inconsistencies(&self) -> Result<Vec<(ConversationId, UserId)>, AppError> {
    Ok(vec![])
  }
}

async fn recv_text(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Option<String> {
  match tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await {
    Ok(Some(WsMessage::Text(t))) => Some(t.to_string()),
    _ => None,
  }
}

#[tokio::test]
async fn cross_instance_fan_out_skips_sender_and_reaches_peer_exactly_once() {
  let u1 = UserId("+84900000001".into());
  let u2 = UserId("+84900000002".into());
  let conversation = Conversation {
    id: ConversationId("c-shared".into()),
    conversation_type: ConversationType::Direct,
    participants: vec![u1.clone(), u2.clone()],
    name: None,
    admins: vec![],
    avatar_url: None,
    description: None,
    created_at: chrono::Utc::now(),
    last_message_time: None,
    last_message_preview: None,
    last_message_type: None,
    last_message_sender_id: None,
    muted_by: Default::default(),
    metadata: serde_json::Value::Null,
  };

  let bus = Arc::new(SharedRegistryBus::default());
  let store = Arc::new(FixedConversationStore { conversation: conversation.clone() });

  // I1 holds U1's socket; I2 holds U2's socket (§8 scenario 6).
  let i1 = Arc::new(ConnectionManager::new(store.clone(), bus.clone(), "I1".into()));
  let i2 = Arc::new(ConnectionManager::new(store.clone(), bus.clone(), "I2".into()));

  let mut rx_u1 = i1.accept(&u1, "u1-conn", None).await.unwrap();
  let mut rx_u2 = i2.accept(&u2, "u2-conn", None).await.unwrap();

  let event = RealtimeEvent::NewMessage {
    conversation_id: conversation.id.clone(),
    message_id: MessageId::new(),
    sender_id: u1.clone(),
    content: "ping".into(),
    message_type: MessageType::Text,
    timestamp: chrono::Utc::now(),
    participants: conversation.participants.clone(),
  };

  // Both instances observe the same bus-delivered event (what
  // `bus_listener::spawn` would hand each instance's handler).
  i1.on_bus_event(event.clone()).await;
  i2.on_bus_event(event).await;

  let to_u2 = recv_text(&mut rx_u2).await;
  assert!(to_u2.is_some(), "U2's socket on I2 must receive exactly one new_message frame");
  assert!(to_u2.unwrap().contains("\"new_message\""));

  let to_u1 = recv_text(&mut rx_u1).await;
  assert!(to_u1.is_none(), "U1 is the sender and must not receive its own message back");
}

#[tokio::test]
async fn disconnect_then_reconnect_within_grace_keeps_user_online() {
  let u = UserId("+84900000099".into());
  let conversation = Conversation {
    id: ConversationId("c-solo".into()),
    conversation_type: ConversationType::Direct,
    participants: vec![u.clone()],
    name: None,
    admins: vec![],
    avatar_url: None,
    description: None,
    created_at: chrono::Utc::now(),
    last_message_time: None,
    last_message_preview: None,
    last_message_type: None,
    last_message_sender_id: None,
    muted_by: Default::default(),
    metadata: serde_json::Value::Null,
  };
  let bus = Arc::new(SharedRegistryBus::default());
  let store = Arc::new(FixedConversationStore { conversation });
  let mgr = Arc::new(ConnectionManager::new(store, bus, "I1".into()));

  let _rx = mgr.accept(&u, "conn-a", None).await.unwrap();
  mgr.disconnect(&u, "conn-a");
  assert!(mgr.local_connection_counts().get(&u).is_none());

  // Reconnect immediately; the grace task should be cancelled rather than
  // racing to mark the user offline later (§4.4, §5).
  let _rx2 = mgr.accept(&u, "conn-b", None).await.unwrap();
  assert_eq!(mgr.local_connection_counts().get(&u), Some(&1));
}
