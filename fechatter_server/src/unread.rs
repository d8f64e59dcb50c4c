//! Unread Maintenance (C6, §4.6): single-message read receipts, bulk
//! mark-all-read, per-pair recompute, and the admin repair scan.

use fechatter_core::bus::conversation_channel;
use fechatter_core::error::AppError;
use fechatter_core::events::RealtimeEvent;
use fechatter_core::ids::{ConversationId, MessageId, UserId};

use crate::observability::metrics::collectors::UnreadMetrics;
use crate::state::AppState;

/// `POST /conversations/{c}/messages/{m}/read`. Idempotent: a second call
/// for the same (c, m, u) observes no further change (§4.6, §8 round-trip).
pub async fn mark_read(
  state: &AppState,
  conversation_id: &ConversationId,
  message_id: &MessageId,
  user: &UserId,
) -> Result<(), AppError> {
  let added = state
    .store
    .add_to_read_by(conversation_id, message_id, user)
    .await?;
  if added {
    state.store.decrement_unread(conversation_id, user).await?;
  }

  let event = RealtimeEvent::MessageRead {
    conversation_id: conversation_id.clone(),
    message_id: message_id.clone(),
    user_id: user.clone(),
  };
  publish_best_effort(state, conversation_id, &event).await;
  Ok(())
}

/// `POST /conversations/{c}/mark_all_read`. Returns the number of messages
/// newly marked read.
pub async fn mark_all_read(state: &AppState, conversation_id: &ConversationId, user: &UserId) -> Result<i64, AppError> {
  let count = state.store.mark_all_read(conversation_id, user).await?;
  state.store.reset_unread(conversation_id, user).await?;

  let event = RealtimeEvent::ConversationRead {
    conversation_id: conversation_id.clone(),
    user_id: user.clone(),
    count,
  };
  publish_best_effort(state, conversation_id, &event).await;
  Ok(count)
}

/// Caller-initiated recompute for a single (conversation, user) pair
/// (§4.6). Not wired to any automatic trigger — an explicit maintenance
/// call, matching §4.6's "caller-initiated maintenance only".
pub async fn recompute_unread(state: &AppState, conversation_id: &ConversationId, user: &UserId) -> Result<i64, AppError> {
  state.store.recompute_unread(conversation_id, user).await
}

/// Admin repair scan (§4.6): finds every (conversation, user) pair whose
/// stored unread_count has drifted from the recomputed value and fixes it.
/// Bounded concurrency so a large repair run doesn't starve live traffic.
pub async fn repair_all_unread_counts(state: &AppState) -> Result<usize, AppError> {
  use futures::stream::{self, StreamExt};

  const CONCURRENCY: usize = 8;
  let started = std::time::Instant::now();

  let pairs = state.store.find_unread_inconsistencies().await?;
  let store = state.store.clone();
  let repaired = stream::iter(pairs.into_iter())
    .map(|(c, u)| {
      let store = store.clone();
      async move { store.recompute_unread(&c, &u).await }
    })
    .buffer_unordered(CONCURRENCY)
    .collect::<Vec<_>>()
    .await;

  let mut count = 0;
  for result in repaired {
    result?;
    count += 1;
  }
  UnreadMetrics::repair_completed(started.elapsed(), count);
  Ok(count)
}

async fn publish_best_effort(state: &AppState, conversation_id: &ConversationId, event: &RealtimeEvent) {
  let channel = conversation_channel(conversation_id);
  match serde_json::to_vec(event) {
    Ok(payload) => {
      if let Err(e) = state.bus.publish(&channel, &payload).await {
        tracing::warn!(channel = %channel, error = %e, "bus publish failed for unread event");
      }
    }
    Err(e) => tracing::error!(error = %e, "failed to serialize unread event"),
  }
}
