//! `GET /ws/{userId}` upgrade handler (§6 WS). Implements the
//! HANDSHAKE -> OPEN -> CLOSED state machine: the handshake authenticates
//! and validates the path, then the socket is registered with the
//! connection manager and two tasks (reader, writer) run until either side
//! closes.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fechatter_core::auth::{TokenVerifier, check_path_user_matches, close_code};
use fechatter_core::events::RealtimeEvent;
use fechatter_core::ids::UserId;
use fechatter_core::models::UserStatus;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
  pub token: Option<String>,
}

/// Client-originated frame shapes (§6 WS client->server frames). Anything
/// that doesn't parse into one of these is logged and dropped — the
/// socket stays open (§4.4, §5 "never close the socket on a malformed
/// client frame").
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientFrame {
  #[serde(rename = "typing")]
  Typing { #[serde(rename = "conversationId")] conversation_id: String },
  #[serde(rename = "message_read")]
  MessageRead {
    #[serde(rename = "conversationId")]
    conversation_id: String,
    #[serde(rename = "messageId")]
    message_id: String,
  },
  #[serde(rename = "heartbeat")]
  Heartbeat,
  #[serde(rename = "status_change")]
  StatusChange { status: UserStatus },
}

pub async fn ws_handler(
  ws: WebSocketUpgrade,
  Path(path_user): Path<String>,
  Query(query): Query<WsQuery>,
  State(state): State<AppState>,
) -> Response {
  let token = query.token.unwrap_or_default();
  let verified = state.auth.verify(&token);

  let user = match verified {
    Ok(user) => match check_path_user_matches(&path_user, &user) {
      Ok(()) => user,
      Err(_) => {
        return ws.on_upgrade(move |socket| close_immediately(socket, close_code::USER_ID_MISMATCH, "user id mismatch"));
      }
    },
    Err(fechatter_core::auth::AuthError::Disabled) => {
      return ws.on_upgrade(move |socket| close_immediately(socket, close_code::DISABLED, "account disabled"));
    }
    Err(_) => {
      return ws.on_upgrade(move |socket| close_immediately(socket, close_code::INVALID_TOKEN, "invalid token"));
    }
  };

  ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn close_immediately(mut socket: WebSocket, code: u16, reason: &'static str) {
  let _ = socket
    .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
    .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
  let connection_id = Uuid::new_v4().to_string();
  let (mut sink, mut stream) = futures::StreamExt::split(socket);

  let mut rx = match state.connections.accept(&user, &connection_id, None).await {
    Ok(rx) => rx,
    Err(e) => {
      warn!(user = %user, error = %e, "failed to register websocket connection");
      return;
    }
  };
  info!(user = %user, connection_id = %connection_id, "websocket connection opened");

  let writer = tokio::spawn(async move {
    use futures::SinkExt;
    while let Some(msg) = rx.recv().await {
      if sink.send(msg).await.is_err() {
        break;
      }
    }
  });

  while let Some(Ok(msg)) = futures::StreamExt::next(&mut stream).await {
    match msg {
      Message::Text(text) => handle_client_frame(&state, &user, &connection_id, &text).await,
      Message::Close(_) => break,
      Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
    }
  }

  writer.abort();
  state.connections.disconnect(&user, &connection_id);
  info!(user = %user, connection_id = %connection_id, "websocket connection closed");
}

async fn handle_client_frame(state: &AppState, user: &UserId, connection_id: &str, text: &str) {
  let frame: ClientFrame = match serde_json::from_str(text) {
    Ok(f) => f,
    Err(e) => {
      debug!(user = %user, error = %e, raw = %text, "dropping unparseable client frame");
      return;
    }
  };

  match frame {
    ClientFrame::Typing { conversation_id } => {
      let event = RealtimeEvent::Typing {
        conversation_id: fechatter_core::ids::ConversationId(conversation_id),
        user_id: user.clone(),
      };
      publish(state, &event).await;
    }
    ClientFrame::MessageRead { conversation_id, message_id } => {
      let conversation_id = fechatter_core::ids::ConversationId(conversation_id);
      let message_id = fechatter_core::ids::MessageId(message_id);
      match state.store.add_to_read_by(&conversation_id, &message_id, user).await {
        Ok(true) => {
          if let Err(e) = state.store.decrement_unread(&conversation_id, user).await {
            warn!(error = %e, "failed to decrement unread after read receipt");
          }
        }
        Ok(false) => {}
        Err(e) => {
          warn!(error = %e, "failed to record read receipt");
          return;
        }
      }
      let event = RealtimeEvent::MessageRead { conversation_id, message_id, user_id: user.clone() };
      publish(state, &event).await;
    }
    ClientFrame::Heartbeat => {
      state.connections.send_to_connection(user, connection_id, &RealtimeEvent::HeartbeatAck);
    }
    ClientFrame::StatusChange { status } => {
      if let Err(e) = state.store.set_user_status(user, status).await {
        warn!(error = %e, "failed to persist status change");
        return;
      }
      let event = RealtimeEvent::UserStatusChange { user_id: user.clone(), status };
      publish(state, &event).await;
    }
  }
}

async fn publish(state: &AppState, event: &RealtimeEvent) {
  let channel = if let Some(c) = event.conversation_id() {
    fechatter_core::bus::conversation_channel(c)
  } else if let RealtimeEvent::UserStatusChange { user_id, .. } = event {
    crate::connection_manager::user_status_channel(user_id)
  } else {
    return;
  };
  match serde_json::to_vec(event) {
    Ok(payload) => {
      if let Err(e) = state.bus.publish(&channel, &payload).await {
        warn!(channel = %channel, error = %e, "failed to publish client-originated event");
      }
    }
    Err(e) => warn!(error = %e, "failed to serialize client-originated event"),
  }
}
