//! NATS-backed `Bus` implementation (C2, §4.2). Publish/subscribe rides on
//! NATS core pub/sub; the ephemeral connection registry (§3
//! ConnectionRegistry) rides on Redis, since both crates that need a Bus
//! already carry a Redis dependency for the Queue adapter. Which substrate
//! backs `Bus` is invisible to callers — they only see the trait.
//!
//! One tokio task per subscribed channel forwards NATS messages to the
//! handler installed by `listener_loop`; `subscribe`/`unsubscribe` spawn
//! and abort those tasks, matching §9's "instances maintain subscriptions
//! to exactly the channels for which they hold sockets" note.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{Bus, BusHandler, BusMessage, ConnectionMeta, reconnect_backoff};
use crate::error::AppError;
use crate::ids::UserId;

pub struct NatsBus {
  client: async_nats::Client,
  redis: redis::Client,
  handler: Arc<RwLock<Option<BusHandler>>>,
  tasks: Arc<DashMap<String, JoinHandle<()>>>,
}

impl NatsBus {
  pub async fn connect(nats_url: &str, redis_url: &str) -> Result<Self, AppError> {
    let client = async_nats::connect(nats_url)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    let redis =
      redis::Client::open(redis_url).map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(Self {
      client,
      redis,
      handler: Arc::new(RwLock::new(None)),
      tasks: Arc::new(DashMap::new()),
    })
  }

  async fn redis_conn(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
    self
      .redis
      .get_multiplexed_async_connection()
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))
  }

  fn spawn_channel_task(&self, channel: String) {
    if self.tasks.contains_key(&channel) {
      return;
    }
    let client = self.client.clone();
    let handler = self.handler.clone();
    let ch = channel.clone();
    let handle = tokio::spawn(async move {
      let mut attempt: u32 = 0;
      loop {
        let sub = match client.subscribe(ch.clone()).await {
          Ok(sub) => sub,
          Err(e) => {
            warn!("bus subscribe({ch}) failed: {e}; retrying");
            tokio::time::sleep(reconnect_backoff(attempt)).await;
            attempt += 1;
            continue;
          }
        };
        attempt = 0;
        let mut sub = sub;
        while let Some(msg) = sub.next().await {
          if let Some(h) = handler.read().await.as_ref() {
            h(BusMessage {
              channel: ch.clone(),
              payload: msg.payload.to_vec(),
            });
          }
        }
        warn!("bus subscription to {ch} ended; reconnecting");
        tokio::time::sleep(reconnect_backoff(attempt)).await;
        attempt += 1;
      }
    });
    self.tasks.insert(channel, handle);
  }
}

#[async_trait]
impl Bus for NatsBus {
  async fn publish(&self, channel: &str, payload: &[u8]) -> Result<u64, AppError> {
    self
      .client
      .publish(channel.to_string(), payload.to_vec().into())
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    // NATS core pub/sub does not report subscriber counts synchronously;
    // diagnostics-only, so 0 is a legitimate "unknown" answer (§4.2).
    Ok(0)
  }

  async fn subscribe(&self, instance: &str, channels: &[String]) -> Result<(), AppError> {
    let mut conn = self.redis_conn().await?;
    let key = format!("subscriptions:{instance}");
    for ch in channels {
      let _: () = conn
        .sadd(&key, ch)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      self.spawn_channel_task(ch.clone());
    }
    Ok(())
  }

  async fn unsubscribe(&self, instance: &str, channels: &[String]) -> Result<(), AppError> {
    let mut conn = self.redis_conn().await?;
    let key = format!("subscriptions:{instance}");
    for ch in channels {
      let _: () = conn
        .srem(&key, ch)
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
      if let Some((_, handle)) = self.tasks.remove(ch) {
        handle.abort();
      }
    }
    Ok(())
  }

  async fn listener_loop(&self, _instance: &str, handler: BusHandler) -> Result<(), AppError> {
    *self.handler.write().await = Some(handler);
    // Tasks are spawned by `subscribe`; this just keeps the handler alive
    // and gives callers a future to hold onto for the process lifetime.
    std::future::pending::<()>().await;
    Ok(())
  }

  async fn register_connection(
    &self,
    user: &UserId,
    connection_id: &str,
    meta: ConnectionMeta,
  ) -> Result<(), AppError> {
    let mut conn = self.redis_conn().await?;
    let key = format!("connections:{}", user.0);
    let value = serde_json::to_string(&meta).map_err(AppError::internal)?;
    let _: () = conn
      .hset(&key, connection_id, value)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    info!("registered connection {connection_id} for user {}", user.0);
    Ok(())
  }

  async fn unregister_connection(&self, user: &UserId, connection_id: &str) -> Result<(), AppError> {
    let mut conn = self.redis_conn().await?;
    let key = format!("connections:{}", user.0);
    let _: () = conn
      .hdel(&key, connection_id)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(())
  }

  async fn connection_count(&self, user: &UserId) -> Result<u64, AppError> {
    let mut conn = self.redis_conn().await?;
    let key = format!("connections:{}", user.0);
    let count: u64 = conn
      .hlen(&key)
      .await
      .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;
    Ok(count)
  }
}

impl Drop for NatsBus {
  fn drop(&mut self) {
    for entry in self.tasks.iter() {
      entry.value().abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reconnect_backoff_used_on_error_path() {
    // Smoke check that the shared backoff table is what channel tasks use.
    assert_eq!(reconnect_backoff(0).as_secs(), 5);
  }
}
