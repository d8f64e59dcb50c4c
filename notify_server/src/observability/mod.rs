pub mod metrics;

/// Initialize observability (metrics and tracing).
pub async fn init_observability() -> anyhow::Result<()> {
  metrics::init_metrics().await?;
  tracing::info!("observability initialized for notify_server");
  Ok(())
}

pub async fn shutdown_observability() {
  tracing::info!("shutting down observability");
}
