//! Notification Consumer — entry point. Runs the main and retry pollers
//! (§4.7) as background tasks and serves a thin health/metrics HTTP
//! surface alongside them.

use notification_consumer::{AppConfig, AppState, get_router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fechatter_core::queue::QueueName;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = AppConfig::load()?;

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::EnvFilter::new("info"))
    .init();

  if let Err(e) = notification_consumer::observability::init_observability(config.server.port + 1000).await {
    eprintln!("failed to initialize observability: {e}");
    std::process::exit(1);
  }

  info!("{}", config.get_summary());

  let state = AppState::try_new(&config).await?;

  // Both pollers share the same dispatcher (§4.7); main handles fresh
  // events, retry handles delayed re-deliveries.
  tokio::spawn(notification_consumer::consumer::run_poller(
    state.clone(),
    QueueName::Main,
    config.polling.clone(),
  ));
  tokio::spawn(notification_consumer::consumer::run_poller(
    state.clone(),
    QueueName::Retry,
    config.polling.clone(),
  ));

  let app = get_router(state);
  let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
  let listener = TcpListener::bind(addr).await?;
  info!("notification_consumer health surface listening on {addr}");
  axum::serve(listener, app.into_make_service()).await?;

  Ok(())
}
