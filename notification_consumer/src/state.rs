//! Root wiring (§9: "shared mutable singletons... recast as explicit
//! handles passed through construction"). Built once in `main`, cloned
//! into both pollers.

use std::sync::Arc;

use fechatter_core::push::{FcmPusher, Pusher};
use fechatter_core::queue::Queue;
use fechatter_core::queue_redis::RedisQueue;
use fechatter_core::store::Store;
use fechatter_core::store_pg::PgStore;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub queue: Arc<dyn Queue>,
  pub pusher: Arc<dyn Pusher>,
  pub instance_id: String,
}

impl AppState {
  pub async fn try_new(config: &AppConfig) -> anyhow::Result<Self> {
    let pg = PgStore::connect(&config.store.db_url).await?;
    pg.migrate().await?;

    let queue = RedisQueue::open(&config.queue.redis_url)?;
    let pusher = FcmPusher::new(reqwest::Client::new(), config.fcm.clone().into());

    Ok(Self {
      store: Arc::new(pg),
      queue: Arc::new(queue),
      pusher: Arc::new(pusher),
      instance_id: config.server.instance_id.clone(),
    })
  }
}
