//! Message Write Path (C5, §4.5). Invoked by `POST /conversations/{c}/messages`
//! once the caller is known to be a participant. Each step's failure handling
//! is distinct: persistence aborts the request; preview/unread/publish are
//! best-effort and only logged on failure (§7 propagation policy).

use chrono::Utc;
use fechatter_core::bus::conversation_channel;
use fechatter_core::error::AppError;
use fechatter_core::events::{QueueEnvelope, RealtimeEvent};
use fechatter_core::ids::{ConversationId, UserId};
use fechatter_core::models::{Message, MessageType, truncate_preview};
use fechatter_core::queue::QueueName;

use crate::observability::metrics::collectors::WritePathMetrics;
use crate::state::AppState;

pub struct SentMessage {
  pub message: Message,
}

/// Runs all six steps of §4.5. Returns as soon as the message is durably
/// written; steps 3-6 run to completion before returning but never fail the
/// request — each logs and continues on error.
pub async fn write_message(
  state: &AppState,
  conversation_id: &ConversationId,
  sender: &UserId,
  content: &str,
  message_type: MessageType,
  file_info: Option<fechatter_core::models::FileInfo>,
) -> Result<SentMessage, AppError> {
  let started = std::time::Instant::now();

  if content.trim().is_empty() {
    return Err(AppError::Validation("content must not be empty".into()));
  }

  let conversation = state
    .store
    .get_conversation(conversation_id)
    .await?
    .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
  if !conversation.is_participant(sender) {
    WritePathMetrics::message_written(started.elapsed(), false);
    return Err(AppError::Forbidden("not a participant".into()));
  }

  // Step 2: persist. No partial state exists before this succeeds.
  let message = state
    .store
    .append_message(conversation_id, sender, content, message_type, file_info)
    .await?;

  // Step 3: preview update, best-effort.
  if let Err(e) = state
    .store
    .update_conversation_preview(
      conversation_id,
      &truncate_preview(content),
      message_type,
      sender,
      message.timestamp,
    )
    .await
  {
    tracing::warn!(conversation = %conversation_id, error = %e, "preview update failed, continuing");
  }

  // Step 4: unread fan-out over participants minus the sender, best-effort.
  let others: Vec<UserId> = conversation
    .participants
    .iter()
    .filter(|p| *p != sender)
    .cloned()
    .collect();
  if !others.is_empty() {
    if let Err(e) = state.store.bump_unread(conversation_id, &others).await {
      tracing::warn!(conversation = %conversation_id, error = %e, "unread bump failed, continuing");
    }
  }

  // Step 5: publish to the bus; fall back to local-only fan-out on failure.
  let event = RealtimeEvent::NewMessage {
    conversation_id: conversation_id.clone(),
    message_id: message.id.clone(),
    sender_id: sender.clone(),
    content: content.to_string(),
    message_type,
    timestamp: message.timestamp,
    participants: conversation.participants.clone(),
  };
  let channel = conversation_channel(conversation_id);
  let payload = serde_json::to_vec(&event).map_err(AppError::internal)?;
  if let Err(e) = state.bus.publish(&channel, &payload).await {
    tracing::warn!(channel = %channel, error = %e, "bus publish failed, message will surface on reconnect");
  }

  // Step 6: offline notification handoff, off the request path.
  let timestamp = message.timestamp;
  let handoff_state = state.clone();
  let handoff_conversation = conversation_id.clone();
  let handoff_sender = sender.clone();
  let handoff_content = content.to_string();
  tokio::spawn(async move {
    if let Err(e) = handoff_offline_notification(
      &handoff_state,
      &handoff_conversation,
      &handoff_sender,
      &handoff_content,
      message_type,
      &others,
      timestamp,
    )
    .await
    {
      tracing::error!(conversation = %handoff_conversation, error = %e, "offline notification handoff failed");
    }
  });

  WritePathMetrics::message_written(started.elapsed(), true);
  Ok(SentMessage { message })
}

async fn handoff_offline_notification(
  state: &AppState,
  conversation_id: &ConversationId,
  sender: &UserId,
  content: &str,
  message_type: MessageType,
  others: &[UserId],
  timestamp: chrono::DateTime<Utc>,
) -> Result<(), AppError> {
  let mut offline = Vec::new();
  for participant in others {
    let count = state.bus.connection_count(participant).await.unwrap_or(0);
    if count == 0 {
      offline.push(participant.clone());
    }
  }
  if offline.is_empty() {
    return Ok(());
  }

  let envelope = QueueEnvelope {
    event: "new_message".to_string(),
    message_id: Some(fechatter_core::ids::MessageId::new().0),
    timestamp,
    retry_count: 0,
    _retry: None,
    payload: serde_json::json!({
      "conversationId": conversation_id.0,
      "senderId": sender.0,
      "content": content,
      "messageType": message_type,
      "participants": offline,
    }),
  };
  let body = serde_json::to_vec(&envelope).map_err(AppError::internal)?;

  match state.queue.send(QueueName::Main, &body, None).await {
    Ok(()) => {
      WritePathMetrics::offline_handoff(true);
      Ok(())
    }
    Err(e) => {
      tracing::warn!(error = %e, "queue unavailable, processing notification in-process");
      WritePathMetrics::offline_handoff(false);
      match fechatter_core::notify::dispatch(state.store.as_ref(), state.pusher.as_ref(), &envelope.event, &envelope.payload).await {
        Some(result) => result,
        None => Ok(()),
      }
    }
  }
}
