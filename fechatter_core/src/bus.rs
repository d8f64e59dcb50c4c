//! PubSub Bus contract (C2, §4.2). Re-architected per §9 "Cross-instance
//! socket fan-out" note: any messaging substrate (NATS, Redis pub/sub, an
//! in-memory fake for tests) implements this trait; instances publish and
//! subscribe without knowing which substrate backs it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::ids::UserId;

pub fn conversation_channel(c: &crate::ids::ConversationId) -> String {
  format!("conversation:{}", c.0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMeta {
  pub instance_id: String,
  pub created_at: chrono::DateTime<chrono::Utc>,
  pub ip_address: Option<String>,
}

/// A single message delivered to a channel subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
  pub channel: String,
  pub payload: Vec<u8>,
}

pub type BusHandler = Arc<dyn Fn(BusMessage) + Send + Sync>;

#[async_trait]
pub trait Bus: Send + Sync {
  /// Serializes and broadcasts `payload` to all subscribers of `channel`;
  /// returns an opaque delivery count when known (diagnostics only).
  async fn publish(&self, channel: &str, payload: &[u8]) -> Result<u64, AppError>;

  async fn subscribe(&self, instance: &str, channels: &[String]) -> Result<(), AppError>;
  async fn unsubscribe(&self, instance: &str, channels: &[String]) -> Result<(), AppError>;

  /// Long-lived loop that invokes `handler` for every message received on
  /// a channel this instance is subscribed to. Retries on transient bus
  /// failures with exponential backoff capped at 60s (§4.2, §5): 5, 10,
  /// 15, 20, 25, then 60s repeating.
  async fn listener_loop(&self, instance: &str, handler: BusHandler) -> Result<(), AppError>;

  async fn register_connection(
    &self,
    user: &UserId,
    connection_id: &str,
    meta: ConnectionMeta,
  ) -> Result<(), AppError>;

  async fn unregister_connection(&self, user: &UserId, connection_id: &str) -> Result<(), AppError>;

  async fn connection_count(&self, user: &UserId) -> Result<u64, AppError>;
}

/// Backoff schedule used by `listener_loop` implementations: 5, 10, 15,
/// 20, 25s, then 60s on every attempt after that (§4.2, §5).
pub fn reconnect_backoff(attempt: u32) -> std::time::Duration {
  let secs = match attempt {
    0 => 5,
    1 => 10,
    2 => 15,
    3 => 20,
    4 => 25,
    _ => 60,
  };
  std::time::Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_schedule_matches_spec() {
    let got: Vec<u64> = (0..7).map(|a| reconnect_backoff(a).as_secs()).collect();
    assert_eq!(got, vec![5, 10, 15, 20, 25, 60, 60]);
  }

  #[test]
  fn channel_naming() {
    let c = crate::ids::ConversationId("abc".into());
    assert_eq!(conversation_channel(&c), "conversation:abc");
  }
}
