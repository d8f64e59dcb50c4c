//! Root wiring for the realtime delivery plane (§9). Built once in `main`
//! and cloned into every handler and into the connection manager's
//! background tasks.

use std::sync::Arc;

use fechatter_core::auth::{Environment, JwtVerifier};
use fechatter_core::bus::Bus;
use fechatter_core::bus_nats::NatsBus;
use fechatter_core::store::Store;
use fechatter_core::store_pg::PgStore;

use crate::config::AppConfig;
use crate::connection_manager::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
  pub store: Arc<dyn Store>,
  pub bus: Arc<dyn Bus>,
  pub auth: Arc<JwtVerifier>,
  pub instance_id: String,
  pub connections: Arc<ConnectionManager>,
}

impl AppState {
  pub async fn try_new(config: &AppConfig) -> anyhow::Result<Self> {
    let pg = PgStore::connect(&config.server.db_url).await?;
    pg.migrate().await?;

    let bus = Arc::new(NatsBus::connect(&config.bus.nats_url, &config.bus.redis_url).await?);

    let environment = match config.auth.environment.to_uppercase().as_str() {
      "PROD" | "PRODUCTION" => Environment::Prod,
      _ => Environment::Dev,
    };
    let auth = Arc::new(JwtVerifier::new(environment, &config.auth.secret));

    let store: Arc<dyn Store> = Arc::new(pg);
    let connections = Arc::new(ConnectionManager::new(
      store.clone(),
      bus.clone() as Arc<dyn Bus>,
      config.server.instance_id.clone(),
    ));

    Ok(Self { store, bus, auth, instance_id: config.server.instance_id.clone(), connections })
  }
}
