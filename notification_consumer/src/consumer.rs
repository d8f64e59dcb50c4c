//! Notification Consumer dispatcher (C7, §4.7). Two long-running pollers
//! (main, retry) share this dispatcher; both process up to
//! `polling.max_messages` per poll with long polling and a visibility
//! lease (§4.3). Per message: parse JSON, dispatch on `event`, delete on
//! success, `retry_send` on failure. Unknown events and malformed JSON are
//! dropped (deleted), never retried (§4.7 steps 1-2).

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use fechatter_core::events::QueueEnvelope;
use fechatter_core::queue::{MAX_RETRIES, QueueName, retry_delay};

use crate::config::PollingConfig;
use crate::observability::metrics::collectors::ConsumerMetrics;
use crate::state::AppState;

/// Runs one poller (main or retry) until the process is killed. Both
/// pollers call this with the same dispatcher (§4.7 "both pollers share
/// the same dispatcher").
pub async fn run_poller(state: AppState, queue: QueueName, polling: PollingConfig) {
  info!(queue = queue.as_str(), "notification poller starting");
  loop {
    let received = state
      .queue
      .receive(
        queue,
        polling.max_messages,
        Duration::from_secs(polling.long_poll_secs),
        Duration::from_secs(polling.visibility_secs),
      )
      .await;

    let messages = match received {
      Ok(messages) => messages,
      Err(e) => {
        warn!(queue = queue.as_str(), error = %e, "poll failed, backing off");
        tokio::time::sleep(Duration::from_secs(5)).await;
        continue;
      }
    };

    for received in messages {
      process_one(&state, queue, received).await;
    }
  }
}

async fn process_one(state: &AppState, queue: QueueName, received: fechatter_core::queue::ReceivedMessage) {
  ConsumerMetrics::message_received(queue.as_str());
  let start = Instant::now();

  // Step 1: parse JSON. Invalid JSON -> delete (drop), log (§4.7 step 1).
  let envelope: QueueEnvelope = match serde_json::from_slice(&received.body) {
    Ok(e) => e,
    Err(e) => {
      warn!(queue = queue.as_str(), error = %e, "dropping unparseable queue message");
      ConsumerMetrics::dispatch_outcome(queue.as_str(), "unknown", "dropped_unparseable");
      let _ = state.queue.delete(queue, &received.receipt).await;
      return;
    }
  };

  // Step 2-3: dispatch on event; unknown -> delete (drop), log.
  let outcome = fechatter_core::notify::dispatch(
    state.store.as_ref(),
    state.pusher.as_ref(),
    &envelope.event,
    &envelope.payload,
  )
  .await;

  match outcome {
    None => {
      warn!(queue = queue.as_str(), event = %envelope.event, "dropping unrecognized event type");
      ConsumerMetrics::dispatch_outcome(queue.as_str(), &envelope.event, "dropped_unknown");
      let _ = state.queue.delete(queue, &received.receipt).await;
    }
    Some(Ok(())) => {
      info!(queue = queue.as_str(), event = %envelope.event, "dispatched successfully");
      ConsumerMetrics::dispatch_outcome(queue.as_str(), &envelope.event, "success");
      ConsumerMetrics::dispatch_duration(&envelope.event, start.elapsed());
      let _ = state.queue.delete(queue, &received.receipt).await;
    }
    Some(Err(e)) => {
      warn!(queue = queue.as_str(), event = %envelope.event, error = %e, "dispatch failed, retrying");
      ConsumerMetrics::dispatch_outcome(queue.as_str(), &envelope.event, "failed");
      retry_send(state, queue, envelope, &received.receipt).await;
    }
  }
}

/// `retry_send` (§4.7): `attempt = retryCount + 1`. Past `MAX_RETRIES`,
/// dead-letter; otherwise re-enqueue to `retry` with the exponential delay
/// of §4.3/§8 and an incremented `retryCount`. The source message is always
/// deleted — retry and dlq sends carry a fresh copy, never a second lease
/// on the same receipt.
async fn retry_send(state: &AppState, source: QueueName, mut envelope: QueueEnvelope, source_receipt: &str) {
  let attempt = envelope.retry_count + 1;

  if attempt > MAX_RETRIES {
    error!(event = %envelope.event, attempt, "max retries exceeded, dead-lettering");
    envelope.retry_count = attempt;
    match serde_json::to_vec(&envelope) {
      Ok(body) => {
        if let Err(e) = state.queue.send(QueueName::Dlq, &body, None).await {
          error!(error = %e, "failed to send message to dlq");
        } else {
          ConsumerMetrics::dead_lettered(&envelope.event);
        }
      }
      Err(e) => error!(error = %e, "failed to serialize dlq envelope"),
    }
    let _ = state.queue.delete(source, source_receipt).await;
    return;
  }

  let delay = retry_delay(attempt);
  envelope.retry_count = attempt;
  envelope._retry = Some(fechatter_core::queue::RetryMeta { attempt });

  match serde_json::to_vec(&envelope) {
    Ok(body) => {
      if let Err(e) = state.queue.send(QueueName::Retry, &body, Some(delay)).await {
        error!(error = %e, "failed to send message to retry queue");
      } else {
        info!(event = %envelope.event, attempt, delay_secs = delay.as_secs(), "scheduled for retry");
        ConsumerMetrics::retry_scheduled(&envelope.event, attempt);
      }
    }
    Err(e) => error!(error = %e, "failed to serialize retry envelope"),
  }
  let _ = state.queue.delete(source, source_receipt).await;
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::collections::HashMap;
  use std::sync::Mutex;

  use fechatter_core::error::AppError;
  use fechatter_core::ids::{ConversationId, MessageId, UserId};
  use fechatter_core::models::*;
  use fechatter_core::push::{PushOutcome, PushPayload, Pusher};
  use fechatter_core::queue::{Queue, ReceivedMessage};
  use fechatter_core::store::{ConversationWithUnread, CreateConversationOutcome, ListConversationsFilter, Page, Store};

  #[derive(Default)]
  struct FakeQueue {
    sent: Mutex<Vec<(QueueName, Vec<u8>, Option<Duration>)>>,
    deleted: Mutex<Vec<(QueueName, String)>>,
  }

  #[async_trait]
  impl Queue for FakeQueue {
    async fn send(&self, queue: QueueName, body: &[u8], delay: Option<Duration>) -> Result<(), AppError> {
      self.sent.lock().unwrap().push((queue, body.to_vec(), delay));
      Ok(())
    }
    async fn receive(&self, _queue: QueueName, _max: u32, _long_poll: Duration, _visibility: Duration) -> Result<Vec<ReceivedMessage>, AppError> {
      Ok(vec![])
    }
    async fn delete(&self, queue: QueueName, receipt: &str) -> Result<(), AppError> {
      self.deleted.lock().unwrap().push((queue, receipt.to_string()));
      Ok(())
    }
  }

  /// One fixed conversation, an always-offline recipient, no device
  /// tokens and no preference doc (everything allowed) — enough to drive
  /// `dispatch_new_message`'s full path (§4.7, §8 scenario 3) without FCM.
  struct FakeStore {
    conversation: Conversation,
    notifications: Mutex<Vec<Notification>>,
    unread_notifications: Mutex<HashMap<String, i64>>,
  }

  #[async_trait]
  impl Store for FakeStore {
    async fn get_conversation(&self, c: &ConversationId) -> Result<Option<Conversation>, AppError> {
      if *c == self.conversation.id { Ok(Some(self.conversation.clone())) } else { Ok(None) }
    }
    async fn list_conversations(&self, _u: &UserId, _f: ListConversationsFilter, page: u32, size: u32) -> Result<Page<ConversationWithUnread>, AppError> {
      Ok(Page { items: vec![], page, size, total: 0 })
    }
    async fn create_conversation(&self, _t: ConversationType, _p: Vec<UserId>, _n: Option<String>, _a: Vec<UserId>, _creator: UserId, _m: Option<String>) -> Result<CreateConversationOutcome, AppError> {
      unreachable!()
    }
    async fn update_conversation_metadata(&self, _c: &ConversationId, _n: Option<String>, _d: Option<String>, _a: Option<String>) -> Result<Conversation, AppError> {
      unreachable!()
    }
    async fn add_member(&self, _c: &ConversationId, _u: UserId) -> Result<Conversation, AppError> {
      unreachable!()
    }
    async fn append_message(&self, _c: &ConversationId, _s: &UserId, _content: &str, _t: MessageType, _f: Option<FileInfo>) -> Result<Message, AppError> {
      unreachable!()
    }
    async fn get_message(&self, _c: &ConversationId, _m: &MessageId) -> Result<Option<Message>, AppError> {
      Ok(None)
    }
    async fn list_messages(&self, _c: &ConversationId, page: u32, size: u32) -> Result<Page<Message>, AppError> {
      Ok(Page { items: vec![], page, size, total: 0 })
    }
    async fn update_conversation_preview(&self, _c: &ConversationId, _p: &str, _t: MessageType, _s: &UserId, _ts: chrono::DateTime<chrono::Utc>) -> Result<(), AppError> {
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
    async fn set_reaction(&self, _c: &ConversationId, _m: &MessageId, _u: &UserId, _e: Option<String>) -> Result<HashMap<UserId, String>, AppError> {
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
    async fn insert_notification(&self, n: &Notification) -> Result<(), AppError> {
      self.notifications.lock().unwrap().push(n.clone());
      Ok(())
    }
    async fn increment_unread_notifications(&self, u: &UserId) -> Result<(), AppError> {
      *self.unread_notifications.lock().unwrap().entry(u.0.clone()).or_insert(0) += 1;
      Ok(())
    }
    async fn find_unread_inconsistencies(&self) -> Result<Vec<(ConversationId, UserId)>, AppError> {
      Ok(vec![])
    }
  }

  struct FakePusher;

  #[async_trait]
  impl Pusher for FakePusher {
    async fn send(&self, _tokens: &[DeviceToken], _payload: &PushPayload) -> Result<PushOutcome, AppError> {
      Ok(PushOutcome::default())
    }
  }

  struct AlwaysFailingStore;

  #[async_trait]
  impl Store for AlwaysFailingStore {
    async fn get_conversation(&self, _c: &ConversationId) -> Result<Option<Conversation>, AppError> {
      Err(AppError::ServiceUnavailable("store down".into()))
    }
    async fn list_conversations(&self, _u: &UserId, _f: ListConversationsFilter, page: u32, size: u32) -> Result<Page<ConversationWithUnread>, AppError> {
      Ok(Page { items: vec![], page, size, total: 0 })
    }
    async fn create_conversation(&self, _t: ConversationType, _p: Vec<UserId>, _n: Option<String>, _a: Vec<UserId>, _creator: UserId, _m: Option<String>) -> Result<CreateConversationOutcome, AppError> {
      unreachable!()
    }
    async fn update_conversation_metadata(&self, _c: &ConversationId, _n: Option<String>, _d: Option<String>, _a: Option<String>) -> Result<Conversation, AppError> {
      unreachable!()
    }
    async fn add_member(&self, _c: &ConversationId, _u: UserId) -> Result<Conversation, AppError> {
      unreachable!()
    }
    async fn append_message(&self, _c: &ConversationId, _s: &UserId, _content: &str, _t: MessageType, _f: Option<FileInfo>) -> Result<Message, AppError> {
      unreachable!()
    }
    async fn get_message(&self, _c: &ConversationId, _m: &MessageId) -> Result<Option<Message>, AppError> {
      Ok(None)
    }
    async fn list_messages(&self, _c: &ConversationId, page: u32, size: u32) -> Result<Page<Message>, AppError> {
      Ok(Page { items: vec![], page, size, total: 0 })
    }
    async fn update_conversation_preview(&self, _c: &ConversationId, _p: &str, _t: MessageType, _s: &UserId, _ts: chrono::DateTime<chrono::Utc>) -> Result<(), AppError> {
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
    async fn set_reaction(&self, _c: &ConversationId, _m: &MessageId, _u: &UserId, _e: Option<String>) -> Result<HashMap<UserId, String>, AppError> {
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

  fn sample_conversation(id: &str, participants: Vec<UserId>) -> Conversation {
    Conversation {
      id: ConversationId(id.into()),
      conversation_type: ConversationType::Direct,
      participants,
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
    }
  }

  fn state_with(store: std::sync::Arc<dyn Store>, queue: std::sync::Arc<dyn Queue>) -> AppState {
    AppState { store, queue, pusher: std::sync::Arc::new(FakePusher), instance_id: "test-consumer".into() }
  }

  fn envelope(event: &str, retry_count: u32, payload: serde_json::Value) -> QueueEnvelope {
    QueueEnvelope { event: event.into(), message_id: Some("m1".into()), timestamp: chrono::Utc::now(), retry_count, _retry: None, payload }
  }

  #[tokio::test]
  async fn new_message_dispatch_records_notification_and_increments_unread() {
    let sender = UserId("+84900000001".into());
    let recipient = UserId("+84900000002".into());
    let conversation = sample_conversation("c1", vec![sender.clone(), recipient.clone()]);
    let store = std::sync::Arc::new(FakeStore {
      conversation,
      notifications: Mutex::new(vec![]),
      unread_notifications: Mutex::new(HashMap::new()),
    });
    let queue: std::sync::Arc<dyn Queue> = std::sync::Arc::new(FakeQueue::default());
    let state = state_with(store.clone(), queue.clone());

    let env = envelope(
      "new_message",
      0,
      serde_json::json!({
        "conversationId": "c1",
        "senderId": sender.0,
        "content": "ping",
        "messageType": "text",
        "participants": [recipient.0.clone()],
      }),
    );
    let body = serde_json::to_vec(&env).unwrap();
    process_one(&state, QueueName::Main, ReceivedMessage { receipt: "r1".into(), body }).await;

    assert_eq!(store.notifications.lock().unwrap().len(), 1);
    assert_eq!(*store.unread_notifications.lock().unwrap().get(&recipient.0).unwrap(), 1);
  }

  #[tokio::test]
  async fn unparseable_message_is_dropped_not_retried() {
    let queue = std::sync::Arc::new(FakeQueue::default());
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(AlwaysFailingStore);
    let state = state_with(store, queue.clone());

    process_one(&state, QueueName::Main, ReceivedMessage { receipt: "bad".into(), body: b"not json".to_vec() }).await;

    assert!(queue.sent.lock().unwrap().is_empty(), "a malformed message must never be retried");
    assert_eq!(queue.deleted.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn unknown_event_type_is_dropped_not_retried() {
    let queue = std::sync::Arc::new(FakeQueue::default());
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(AlwaysFailingStore);
    let state = state_with(store, queue.clone());

    let env = envelope("something_unrecognized", 0, serde_json::json!({}));
    let body = serde_json::to_vec(&env).unwrap();
    process_one(&state, QueueName::Main, ReceivedMessage { receipt: "r2".into(), body }).await;

    assert!(queue.sent.lock().unwrap().is_empty());
    assert_eq!(queue.deleted.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn failed_dispatch_schedules_retry_with_incrementing_attempt() {
    // AlwaysFailingStore makes `get_conversation` error for every event,
    // so `dispatch_new_message` fails and `retry_send` runs.
    let queue = std::sync::Arc::new(FakeQueue::default());
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(AlwaysFailingStore);
    let state = state_with(store, queue.clone());

    let env = envelope(
      "new_message",
      0,
      serde_json::json!({"conversationId": "c1", "senderId": "+1", "content": "x", "messageType": "text", "participants": []}),
    );
    let body = serde_json::to_vec(&env).unwrap();
    process_one(&state, QueueName::Main, ReceivedMessage { receipt: "r3".into(), body }).await;

    let sent = queue.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (queue_name, retried_body, delay) = &sent[0];
    assert_eq!(*queue_name, QueueName::Retry);
    assert_eq!(delay.unwrap().as_secs(), 67); // attempt 1 (§8 scenario 5)
    let retried: QueueEnvelope = serde_json::from_slice(retried_body).unwrap();
    assert_eq!(retried.retry_count, 1);
  }

  #[tokio::test]
  async fn sixth_failure_dead_letters_instead_of_retrying() {
    let queue = std::sync::Arc::new(FakeQueue::default());
    let store: std::sync::Arc<dyn Store> = std::sync::Arc::new(AlwaysFailingStore);
    let state = state_with(store, queue.clone());

    // retry_count already at 5 -> attempt 6 -> past MAX_RETRIES.
    let env = envelope(
      "new_message",
      5,
      serde_json::json!({"conversationId": "c1", "senderId": "+1", "content": "x", "messageType": "text", "participants": []}),
    );
    let body = serde_json::to_vec(&env).unwrap();
    process_one(&state, QueueName::Main, ReceivedMessage { receipt: "r4".into(), body }).await;

    let sent = queue.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let (queue_name, _body, delay) = &sent[0];
    assert_eq!(*queue_name, QueueName::Dlq);
    assert!(delay.is_none(), "dlq sends carry the final event untouched, no delay");
  }

  #[test]
  fn retry_attempt_ordering_matches_spec_scenario_5() {
    let delays: Vec<u64> = (1..=5u32).map(|a| retry_delay(a).as_secs()).collect();
    assert_eq!(delays, vec![67, 144, 261, 388, 525]);
    assert!(6 > MAX_RETRIES);
  }
}
