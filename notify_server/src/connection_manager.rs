//! Connection Manager (C4, §4.4). Per-process: holds local WebSocket
//! sessions, multiplexes by user, and translates bus events into per-socket
//! frames. One reader task and one writer task per socket; the writer
//! task's channel is the per-socket send mutex (§5 shared-resource policy)
//! — only it ever calls `WebSocket::send`, so concurrent frames can never
//! interleave.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message as WsMessage;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use fechatter_core::bus::{Bus, ConnectionMeta, conversation_channel};
use fechatter_core::error::AppError;
use fechatter_core::events::RealtimeEvent;
use fechatter_core::ids::{ConversationId, UserId};
use fechatter_core::models::UserStatus;
use fechatter_core::store::Store;

/// Offline grace window (§4.4, §5): cancelable when a new connection for
/// the same user appears.
const OFFLINE_GRACE: Duration = Duration::from_secs(60);

/// User-status channel namespace. A separate namespace from
/// `conversation:{c}` (§4.2) because status changes fan out by "shares a
/// conversation with the subject", not by a single conversation id.
pub fn user_status_channel(u: &UserId) -> String {
  format!("user_status:{}", u.0)
}

struct LocalSocket {
  sender: mpsc::UnboundedSender<WsMessage>,
}

pub struct ConnectionManager {
  store: Arc<dyn Store>,
  bus: Arc<dyn Bus>,
  instance_id: String,
  /// `active: userId -> connectionId -> socket handle` (§4.4).
  active: DashMap<UserId, DashMap<String, LocalSocket>>,
  /// Cached participant lists for conversations this instance currently
  /// serves, refreshed on accept and on every `new_message`/membership
  /// event observed on the bus. Drives both the conversations-served set
  /// (§4.4, §9) and the `user_status_change` fan-out (§4.4).
  conversation_participants: DashMap<ConversationId, Vec<UserId>>,
  /// Outstanding 60s offline-grace tasks, keyed by user (§4.4, §5). The
  /// grace timer lives at user granularity, not socket.
  grace_tasks: DashMap<UserId, JoinHandle<()>>,
}

impl ConnectionManager {
  pub fn new(store: Arc<dyn Store>, bus: Arc<dyn Bus>, instance_id: String) -> Self {
    Self {
      store,
      bus,
      instance_id,
      active: DashMap::new(),
      conversation_participants: DashMap::new(),
      grace_tasks: DashMap::new(),
    }
  }

  pub fn instance_id(&self) -> &str {
    &self.instance_id
  }

  /// Registers a freshly-accepted socket and returns the receiver half the
  /// caller's writer task should drain. Marks the user online and
  /// publishes a status change iff this is their first connection
  /// anywhere in the cluster (§4.4 `accept`).
  pub async fn accept(
    self: &Arc<Self>,
    user: &UserId,
    connection_id: &str,
    ip_address: Option<String>,
  ) -> Result<mpsc::UnboundedReceiver<WsMessage>, AppError> {
    if let Some((_, handle)) = self.grace_tasks.remove(user) {
      handle.abort();
      debug!(user = %user, "cancelled offline grace on reconnect");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let entry = self.active.entry(user.clone()).or_default();
    let was_empty = entry.is_empty();
    entry.insert(connection_id.to_string(), LocalSocket { sender: tx });
    drop(entry);

    self
      .bus
      .register_connection(
        user,
        connection_id,
        ConnectionMeta { instance_id: self.instance_id.clone(), created_at: chrono::Utc::now(), ip_address },
      )
      .await?;

    self.refresh_conversations_served(user).await?;

    if was_empty {
      self.store.set_user_online(user, true).await?;
      self.publish_status_change(user, UserStatus::Available).await;
    }

    Ok(rx)
  }

  /// Removes a socket; if it was the user's last local connection,
  /// schedules the 60s offline grace (§4.4 `disconnect`).
  pub fn disconnect(self: &Arc<Self>, user: &UserId, connection_id: &str) {
    let local_empty = if let Some(map) = self.active.get(user) {
      map.remove(connection_id);
      map.is_empty()
    } else {
      true
    };
    if local_empty {
      self.active.remove(user);
    }

    let bus = self.bus.clone();
    let user_owned = user.clone();
    let connection_id = connection_id.to_string();
    tokio::spawn(async move {
      if let Err(e) = bus.unregister_connection(&user_owned, &connection_id).await {
        warn!(user = %user_owned, error = %e, "failed to unregister connection from bus");
      }
    });

    if local_empty {
      self.schedule_offline_grace(user.clone());
    }
  }

  fn schedule_offline_grace(self: &Arc<Self>, user: UserId) {
    let this = self.clone();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(OFFLINE_GRACE).await;
      // Re-check local + remote connection count to avoid a race with a
      // reconnect that landed on a different instance (§9).
      let still_local = this.active.get(&user).map(|m| !m.is_empty()).unwrap_or(false);
      if still_local {
        return;
      }
      let remote = this.bus.connection_count(&user).await.unwrap_or(1);
      if remote > 0 {
        return;
      }
      if let Err(e) = this.store.set_user_online(&user, false).await {
        warn!(user = %user, error = %e, "failed to mark user offline");
        return;
      }
      this.publish_status_change(&user, UserStatus::Offline).await;
      this.grace_tasks.remove(&user);
    });
    self.grace_tasks.insert(user, handle);
  }

  async fn publish_status_change(&self, user: &UserId, status: UserStatus) {
    let event = RealtimeEvent::UserStatusChange { user_id: user.clone(), status };
    let channel = user_status_channel(user);
    match serde_json::to_vec(&event) {
      Ok(payload) => {
        if let Err(e) = self.bus.publish(&channel, &payload).await {
          warn!(channel = %channel, error = %e, "status-change publish failed");
        }
      }
      Err(e) => warn!(error = %e, "failed to serialize status-change event"),
    }
  }

  /// Pulls the conversations this user participates in and (a) caches
  /// their participant lists for `user_status_change` fan-out, (b)
  /// subscribes this instance to their `conversation:{c}` and
  /// `user_status:{peer}` channels (§4.4 conversations-served, §9 dynamic
  /// subscription refresh).
  async fn refresh_conversations_served(&self, user: &UserId) -> Result<(), AppError> {
    let page = self
      .store
      .list_conversations(user, fechatter_core::store::ListConversationsFilter::default(), 1, 200)
      .await?;

    let mut channels = Vec::new();
    for item in &page.items {
      let c = &item.conversation;
      self.conversation_participants.insert(c.id.clone(), c.participants.clone());
      channels.push(conversation_channel(&c.id));
      for peer in &c.participants {
        channels.push(user_status_channel(peer));
      }
    }
    if !channels.is_empty() {
      self.bus.subscribe(&self.instance_id, &channels).await?;
    }
    Ok(())
  }

  /// Dispatches one bus-delivered event to local sockets (§4.4
  /// `on_bus_event`).
  pub async fn on_bus_event(&self, event: RealtimeEvent) {
    match &event {
      RealtimeEvent::NewMessage { participants, .. } => {
        if let Some(c) = event.conversation_id() {
          self.conversation_participants.insert(c.clone(), participants.clone());
        }
        self.fan_out_to_conversation(&event).await;
      }
      RealtimeEvent::Typing { .. }
      | RealtimeEvent::MessageRead { .. }
      | RealtimeEvent::ConversationRead { .. }
      | RealtimeEvent::MessageReaction { .. } => {
        self.fan_out_to_conversation(&event).await;
      }
      RealtimeEvent::UserStatusChange { user_id, .. } => {
        self.fan_out_status_change(user_id, &event).await;
      }
      RealtimeEvent::Heartbeat | RealtimeEvent::HeartbeatAck | RealtimeEvent::StatusChange { .. } => {
        // Client-originated frame shapes; never arrive as bus events.
      }
    }
  }

  async fn fan_out_to_conversation(&self, event: &RealtimeEvent) {
    let Some(conversation_id) = event.conversation_id() else { return };
    let participants = match self.conversation_participants.get(conversation_id) {
      Some(p) => p.clone(),
      None => match self.store.get_conversation(conversation_id).await {
        Ok(Some(c)) => {
          self.conversation_participants.insert(conversation_id.clone(), c.participants.clone());
          c.participants
        }
        _ => return,
      },
    };
    let origin = event.origin();
    for participant in &participants {
      if Some(participant) == origin {
        continue;
      }
      self.send_to_user(participant, event);
    }
  }

  async fn fan_out_status_change(&self, subject: &UserId, event: &RealtimeEvent) {
    let mut recipients: HashSet<UserId> = HashSet::new();
    for entry in self.conversation_participants.iter() {
      if entry.value().contains(subject) {
        recipients.extend(entry.value().iter().cloned());
      }
    }
    recipients.remove(subject);
    for recipient in recipients {
      self.send_to_user(&recipient, event);
    }
  }

  fn send_to_user(&self, user: &UserId, event: &RealtimeEvent) {
    let Some(sockets) = self.active.get(user) else { return };
    let Ok(text) = serde_json::to_string(event) else { return };
    for socket in sockets.iter() {
      let _ = socket.sender.send(WsMessage::Text(text.clone().into()));
    }
  }

  /// Sends directly to one socket, bypassing conversation fan-out — used
  /// for replies that are meaningful only to the originating connection
  /// (`heartbeat_ack`).
  pub fn send_to_connection(&self, user: &UserId, connection_id: &str, event: &RealtimeEvent) {
    let Some(sockets) = self.active.get(user) else { return };
    let Some(socket) = sockets.get(connection_id) else { return };
    if let Ok(text) = serde_json::to_string(event) {
      let _ = socket.sender.send(WsMessage::Text(text.into()));
    }
  }

  /// Used when the origin is local and the event was already produced
  /// (e.g. the socket's own frame handler), so it forwards to local
  /// subscribers without re-publishing (§4.4 `broadcast_to_conversation`).
  pub fn broadcast_to_conversation(&self, event: &RealtimeEvent, skip_user: Option<&UserId>) {
    let Some(conversation_id) = event.conversation_id() else { return };
    let Some(participants) = self.conversation_participants.get(conversation_id) else { return };
    for participant in participants.iter() {
      if Some(participant) == skip_user {
        continue;
      }
      self.send_to_user(participant, event);
    }
  }

  pub fn local_connection_counts(&self) -> HashMap<UserId, usize> {
    self.active.iter().map(|e| (e.key().clone(), e.value().len())).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use fechatter_core::store::{ConversationWithUnread, CreateConversationOutcome, ListConversationsFilter, Page};
  use fechatter_core::models::*;

  struct NullBus;

  #[async_trait]
  impl Bus for NullBus {
    async fn publish(&self, _channel: &str, _payload: &[u8]) -> Result<u64, AppError> {
      Ok(0)
    }
    async fn subscribe(&self, _instance: &str, _channels: &[String]) -> Result<(), AppError> {
      Ok(())
    }
    async fn unsubscribe(&self, _instance: &str, _channels: &[String]) -> Result<(), AppError> {
      Ok(())
    }
    async fn listener_loop(&self, _instance: &str, _handler: fechatter_core::bus::BusHandler) -> Result<(), AppError> {
      Ok(())
    }
    async fn register_connection(&self, _user: &UserId, _connection_id: &str, _meta: ConnectionMeta) -> Result<(), AppError> {
      Ok(())
    }
    async fn unregister_connection(&self, _user: &UserId, _connection_id: &str) -> Result<(), AppError> {
      Ok(())
    }
    async fn connection_count(&self, _user: &UserId) -> Result<u64, AppError> {
      Ok(0)
    }
  }

  struct NullStore;

  #[async_trait]
  impl Store for NullStore {
    async fn get_conversation(&self, _c: &ConversationId) -> Result<Option<Conversation>, AppError> {
      Ok(None)
    }
    async fn list_conversations(
      &self,
      _u: &UserId,
      _filter: ListConversationsFilter,
      page: u32,
      size: u32,
    ) -> Result<Page<ConversationWithUnread>, AppError> {
      Ok(Page { items: vec![], page, size, total: 0 })
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

  fn manager() -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(Arc::new(NullStore), Arc::new(NullBus), "test-instance".into()))
  }

  #[tokio::test]
  async fn accept_marks_first_connection_online() {
    let mgr = manager();
    let user = UserId("+84900000001".into());
    let rx = mgr.accept(&user, "conn-1", None).await.unwrap();
    drop(rx);
    assert_eq!(mgr.local_connection_counts().get(&user), Some(&1));
  }

  #[tokio::test]
  async fn disconnect_removes_socket_and_schedules_grace() {
    let mgr = manager();
    let user = UserId("+84900000002".into());
    let _rx = mgr.accept(&user, "conn-1", None).await.unwrap();
    mgr.disconnect(&user, "conn-1");
    assert!(mgr.local_connection_counts().get(&user).is_none());
    assert!(mgr.grace_tasks.contains_key(&user));
  }

  #[tokio::test]
  async fn reconnect_cancels_pending_grace() {
    let mgr = manager();
    let user = UserId("+84900000003".into());
    let _rx1 = mgr.accept(&user, "conn-1", None).await.unwrap();
    mgr.disconnect(&user, "conn-1");
    assert!(mgr.grace_tasks.contains_key(&user));
    let _rx2 = mgr.accept(&user, "conn-2", None).await.unwrap();
    assert!(!mgr.grace_tasks.contains_key(&user));
  }

  #[tokio::test]
  async fn new_message_skips_origin() {
    let mgr = manager();
    let sender = UserId("+84900000004".into());
    let recipient = UserId("+84900000005".into());
    let _rx_sender = mgr.accept(&sender, "s1", None).await.unwrap();
    let mut rx_recipient = mgr.accept(&recipient, "r1", None).await.unwrap();

    let c = ConversationId("c1".into());
    let event = RealtimeEvent::NewMessage {
      conversation_id: c,
      message_id: fechatter_core::ids::MessageId::new(),
      sender_id: sender.clone(),
      content: "hi".into(),
      message_type: MessageType::Text,
      timestamp: chrono::Utc::now(),
      participants: vec![sender.clone(), recipient.clone()],
    };
    mgr.on_bus_event(event).await;

    let got = tokio::time::timeout(std::time::Duration::from_millis(200), rx_recipient.recv())
      .await
      .expect("recipient should receive the frame");
    assert!(got.is_some());
  }
}
