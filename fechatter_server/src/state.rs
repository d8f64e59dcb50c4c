//! Root wiring (§9: "shared mutable singletons... recast as explicit
//! handles passed through construction"). `AppState` is built once in
//! `main` and cloned (cheaply, via `Arc`) into every handler.

use std::sync::Arc;

use fechatter_core::auth::{Environment, JwtVerifier};
use fechatter_core::bus::Bus;
use fechatter_core::bus_nats::NatsBus;
use fechatter_core::push::{FcmPusher, Pusher};
use fechatter_core::queue::Queue;
use fechatter_core::queue_redis::RedisQueue;
use fechatter_core::store::Store;
use fechatter_core::store_pg::PgStore;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub bus: Arc<dyn Bus>,
  pub queue: Arc<dyn Queue>,
  /// Only exercised by the write path's in-process fallback when the queue
  /// is unavailable (§4.5 step 6d, §5 back-pressure); the notification
  /// consumer is the primary pusher in normal operation.
  pub pusher: Arc<dyn Pusher>,
  pub auth: Arc<JwtVerifier>,
  pub instance_id: String,
}

impl AppState {
  /// Connects every adapter once, at process startup (§9 "shared mutable
  /// singletons... recast as explicit handles passed through construction").
  pub async fn try_new(config: &AppConfig) -> anyhow::Result<Self> {
    let pg = PgStore::connect(&config.server.db_url).await?;
    pg.migrate().await?;

    let bus = NatsBus::connect(&config.bus.nats_url, &config.bus.redis_url).await?;
    let queue = RedisQueue::open(&config.queue.redis_url)?;

    let environment = match config.auth.environment.to_uppercase().as_str() {
      "PROD" | "PRODUCTION" => Environment::Prod,
      _ => Environment::Dev,
    };
    let auth = JwtVerifier::new(environment, &config.auth.secret);

    let pusher = FcmPusher::new(reqwest::Client::new(), config.fcm.clone().into());

    Ok(Self {
      store: Arc::new(pg),
      bus: Arc::new(bus),
      queue: Arc::new(queue),
      pusher: Arc::new(pusher),
      auth: Arc::new(auth),
      instance_id: config.server.instance_id.clone(),
    })
  }
}
