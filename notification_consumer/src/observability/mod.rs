pub mod metrics;

/// Initialize observability (metrics and tracing). Bound to a different
/// port than `notify_server`'s exporter so both can run on one host.
pub async fn init_observability(metrics_port: u16) -> anyhow::Result<()> {
  metrics::init_metrics(&format!("0.0.0.0:{metrics_port}")).await?;
  tracing::info!("observability initialized for notification_consumer");
  Ok(())
}
