//! Shared notification dispatch (§4.7). Used by two callers that must stay
//! behaviorally identical: the notification consumer's per-event handlers,
//! and the write path's in-process degraded-mode fallback when the queue is
//! unavailable (§4.5 step 6d, §5 back-pressure). Keeping the logic here
//! rather than duplicated in both crates is what makes that equivalence
//! actually true rather than just documented.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Deserialize;

use crate::error::AppError;
use crate::ids::{ConversationId, MessageId, UserId};
use crate::models::{MessageType, Notification, NotificationPref, NotificationType};
use crate::push::{PushPayload, Pusher};
use crate::store::Store;

#[derive(Debug, Deserialize)]
pub struct NewMessageEvent {
  #[serde(rename = "conversationId")]
  pub conversation_id: ConversationId,
  #[serde(rename = "senderId")]
  pub sender_id: UserId,
  pub content: String,
  #[serde(rename = "messageType")]
  pub message_type: MessageType,
  pub participants: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct GroupInvitationEvent {
  #[serde(rename = "conversationId")]
  pub conversation_id: ConversationId,
  #[serde(rename = "senderId")]
  pub sender_id: UserId,
  #[serde(rename = "groupName")]
  pub group_name: String,
  pub participants: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct FriendRequestEvent {
  #[serde(rename = "senderId")]
  pub sender_id: UserId,
  pub participants: Vec<UserId>,
}

/// Preference evaluation (§4.7): pushEnabled gates everything, muteUntil
/// suppresses push, then the per-type flag. A missing preference document
/// means everything is enabled.
fn is_allowed(pref: Option<&NotificationPref>, notification_type: NotificationType, now: chrono::DateTime<Utc>) -> bool {
  let Some(pref) = pref else { return true };
  if !pref.push_enabled {
    return false;
  }
  if let Some(until) = pref.mute_until {
    if until > now {
      return false;
    }
  }
  match notification_type {
    NotificationType::NewMessage => pref.message_notifications,
    NotificationType::GroupInvitation | NotificationType::GroupConversationCreated => pref.group_notifications,
    NotificationType::FriendRequest => pref.friend_request_notifications,
    NotificationType::DirectConversationCreated => pref.message_notifications,
  }
}

/// Records the Notification row and bumps `unreadNotifications`, regardless
/// of whether a push was actually sent (§4.7 step e — "always").
async fn record_and_increment(
  store: &dyn Store,
  user: &UserId,
  notification_type: NotificationType,
  title: &str,
  body: &str,
  data: BTreeMap<String, String>,
) -> Result<(), AppError> {
  let notification = Notification {
    id: MessageId::new().0,
    user_id: user.clone(),
    notification_type,
    title: title.to_string(),
    body: body.to_string(),
    data,
    is_read: false,
    created_at: Utc::now(),
  };
  store.insert_notification(&notification).await?;
  store.increment_unread_notifications(user).await?;
  Ok(())
}

/// Pushes to every device token on file for `user`, deleting tokens FCM
/// reports as permanently invalid (§4.7) regardless of overall send
/// success.
async fn push_to_user(store: &dyn Store, pusher: &dyn Pusher, user: &UserId, payload: &PushPayload) -> Result<(), AppError> {
  let tokens = store.list_device_tokens(user, None).await?;
  if tokens.is_empty() {
    return Ok(());
  }
  let outcome = pusher.send(&tokens, payload).await?;
  for invalid in outcome.invalid_tokens {
    store.delete_device_token(user, &invalid).await?;
  }
  Ok(())
}

async fn notify_one_offline_recipient(
  store: &dyn Store,
  pusher: &dyn Pusher,
  recipient: &UserId,
  notification_type: NotificationType,
  title: &str,
  body: &str,
  data: BTreeMap<String, String>,
) -> Result<(), AppError> {
  // Live re-check: the user may have reconnected between enqueue and
  // consume (§4.7 step c).
  let user = store.get_user(recipient).await?;
  let is_online = user.map(|u| u.is_online).unwrap_or(false);

  if !is_online {
    let pref = store.get_notification_pref(recipient).await?;
    if is_allowed(pref.as_ref(), notification_type, Utc::now()) {
      push_to_user(
        store,
        pusher,
        recipient,
        &PushPayload { title: title.to_string(), body: body.to_string(), data: data.clone() },
      )
      .await?;
    }
  }

  record_and_increment(store, recipient, notification_type, title, body, data).await
}

pub async fn dispatch_new_message(store: &dyn Store, pusher: &dyn Pusher, event: &NewMessageEvent) -> Result<(), AppError> {
  let conversation = store
    .get_conversation(&event.conversation_id)
    .await?
    .ok_or_else(|| AppError::NotFound("conversation not found".into()))?;
  let sender = store.get_user(&event.sender_id).await?;
  let sender_name = sender.and_then(|u| u.name).unwrap_or_else(|| event.sender_id.0.clone());

  for recipient in &event.participants {
    if !conversation.is_participant(recipient) {
      continue;
    }
    let mut data = BTreeMap::new();
    data.insert("conversationId".to_string(), event.conversation_id.0.clone());
    data.insert("senderId".to_string(), event.sender_id.0.clone());
    notify_one_offline_recipient(
      store,
      pusher,
      recipient,
      NotificationType::NewMessage,
      &sender_name,
      &event.content,
      data,
    )
    .await?;
  }
  Ok(())
}

pub async fn dispatch_group_invitation(
  store: &dyn Store,
  pusher: &dyn Pusher,
  event: &GroupInvitationEvent,
) -> Result<(), AppError> {
  let sender = store.get_user(&event.sender_id).await?;
  let sender_name = sender.and_then(|u| u.name).unwrap_or_else(|| event.sender_id.0.clone());
  let body = format!("invited you to join {}", event.group_name);

  for recipient in &event.participants {
    let mut data = BTreeMap::new();
    data.insert("conversationId".to_string(), event.conversation_id.0.clone());
    notify_one_offline_recipient(
      store,
      pusher,
      recipient,
      NotificationType::GroupInvitation,
      &sender_name,
      &body,
      data,
    )
    .await?;
  }
  Ok(())
}

pub async fn dispatch_friend_request(store: &dyn Store, pusher: &dyn Pusher, event: &FriendRequestEvent) -> Result<(), AppError> {
  let sender = store.get_user(&event.sender_id).await?;
  let sender_name = sender.and_then(|u| u.name).unwrap_or_else(|| event.sender_id.0.clone());

  for recipient in &event.participants {
    let mut data = BTreeMap::new();
    data.insert("senderId".to_string(), event.sender_id.0.clone());
    notify_one_offline_recipient(
      store,
      pusher,
      recipient,
      NotificationType::FriendRequest,
      &sender_name,
      "sent you a friend request",
      data,
    )
    .await?;
  }
  Ok(())
}

/// `direct_conversation_created` / `group_conversation_created` (§4.7):
/// identical shape to `new_message`, using the initial message if present or
/// canned text otherwise, notifying every non-creator.
pub async fn dispatch_conversation_created(
  store: &dyn Store,
  pusher: &dyn Pusher,
  event: &NewMessageEvent,
  notification_type: NotificationType,
) -> Result<(), AppError> {
  let sender = store.get_user(&event.sender_id).await?;
  let sender_name = sender.and_then(|u| u.name).unwrap_or_else(|| event.sender_id.0.clone());
  let body = if event.content.trim().is_empty() {
    "started a new conversation with you".to_string()
  } else {
    event.content.clone()
  };

  for recipient in &event.participants {
    if recipient == &event.sender_id {
      continue;
    }
    let mut data = BTreeMap::new();
    data.insert("conversationId".to_string(), event.conversation_id.0.clone());
    notify_one_offline_recipient(store, pusher, recipient, notification_type, &sender_name, &body, data).await?;
  }
  Ok(())
}

/// Parses `payload` against `event_name` and runs the matching handler.
/// Returns `None` for an unrecognized event name (§4.7 step 2: unknown ->
/// drop, log), letting callers distinguish "unknown, drop" from "known but
/// failed, retry".
pub async fn dispatch(
  store: &dyn Store,
  pusher: &dyn Pusher,
  event_name: &str,
  payload: &serde_json::Value,
) -> Option<Result<(), AppError>> {
  let parse_err = |e: serde_json::Error| AppError::Validation(format!("malformed {event_name} payload: {e}"));
  match event_name {
    "new_message" => {
      let event = match serde_json::from_value::<NewMessageEvent>(payload.clone()) {
        Ok(e) => e,
        Err(e) => return Some(Err(parse_err(e))),
      };
      Some(dispatch_new_message(store, pusher, &event).await)
    }
    "group_invitation" => {
      let event = match serde_json::from_value::<GroupInvitationEvent>(payload.clone()) {
        Ok(e) => e,
        Err(e) => return Some(Err(parse_err(e))),
      };
      Some(dispatch_group_invitation(store, pusher, &event).await)
    }
    "friend_request" => {
      let event = match serde_json::from_value::<FriendRequestEvent>(payload.clone()) {
        Ok(e) => e,
        Err(e) => return Some(Err(parse_err(e))),
      };
      Some(dispatch_friend_request(store, pusher, &event).await)
    }
    "direct_conversation_created" => {
      let event = match serde_json::from_value::<NewMessageEvent>(payload.clone()) {
        Ok(e) => e,
        Err(e) => return Some(Err(parse_err(e))),
      };
      Some(dispatch_conversation_created(store, pusher, &event, NotificationType::DirectConversationCreated).await)
    }
    "group_conversation_created" => {
      let event = match serde_json::from_value::<NewMessageEvent>(payload.clone()) {
        Ok(e) => e,
        Err(e) => return Some(Err(parse_err(e))),
      };
      Some(dispatch_conversation_created(store, pusher, &event, NotificationType::GroupConversationCreated).await)
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_preference_allows_everything() {
    assert!(is_allowed(None, NotificationType::NewMessage, Utc::now()));
  }

  #[test]
  fn push_disabled_blocks_all_types() {
    let pref = NotificationPref { push_enabled: false, ..Default::default() };
    assert!(!is_allowed(Some(&pref), NotificationType::FriendRequest, Utc::now()));
  }

  #[test]
  fn mute_until_future_blocks_push() {
    let pref = NotificationPref { mute_until: Some(Utc::now() + chrono::Duration::hours(1)), ..Default::default() };
    assert!(!is_allowed(Some(&pref), NotificationType::NewMessage, Utc::now()));
  }

  #[test]
  fn type_specific_flag_gates_independently() {
    let pref = NotificationPref { group_notifications: false, ..Default::default() };
    assert!(!is_allowed(Some(&pref), NotificationType::GroupInvitation, Utc::now()));
    assert!(is_allowed(Some(&pref), NotificationType::NewMessage, Utc::now()));
  }
}
