//! Notify Server — entry point.

use notify_server::{AppConfig, AppState, get_router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = AppConfig::load()?;

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::EnvFilter::new("info"))
    .init();

  if let Err(e) = notify_server::observability::init_observability().await {
    eprintln!("failed to initialize observability: {e}");
    std::process::exit(1);
  }

  info!("{}", config.get_summary());

  let state = AppState::try_new(&config).await?;
  notify_server::bus_listener::spawn(state.clone());

  let app = get_router(state);

  let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
  let listener = TcpListener::bind(addr).await?;
  info!("notify_server listening on {addr}");
  axum::serve(listener, app.into_make_service()).await?;

  Ok(())
}
