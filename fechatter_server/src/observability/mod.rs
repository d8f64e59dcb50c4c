pub mod metrics;

/// Initialize observability (metrics and tracing), mirroring
/// `notify_server::observability::init_observability` (§ ambient stack).
pub async fn init_observability() -> anyhow::Result<()> {
  metrics::init_metrics().await?;
  tracing::info!("observability initialized for fechatter_server");
  Ok(())
}
