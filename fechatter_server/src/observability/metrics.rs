use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::info;

/// Initialize Prometheus metrics for fechatter_server. Bound to a
/// different port than `notify_server`'s exporter (9091) so both can run
/// on one host.
pub async fn init_metrics() -> anyhow::Result<()> {
  let builder = PrometheusBuilder::new();

  register_server_metrics();

  let bind_address = "0.0.0.0:9092";
  builder
    .with_http_listener(bind_address.parse::<std::net::SocketAddr>()?)
    .install()?;

  info!("prometheus metrics server started on {}", bind_address);
  Ok(())
}

fn register_server_metrics() {
  counter!("server_messages_written_total", "status" => "ok").absolute(0);
  counter!("server_messages_written_total", "status" => "forbidden").absolute(0);
  histogram!("server_write_path_duration_seconds").record(0.0);

  counter!("server_offline_handoff_total", "mode" => "queued").absolute(0);
  counter!("server_offline_handoff_total", "mode" => "degraded_inline").absolute(0);

  counter!("server_unread_repair_total", "status" => "repaired").absolute(0);
  histogram!("server_unread_repair_duration_seconds").record(0.0);

  info!("metrics registered");
}

/// Metrics collection utilities for fechatter_server.
pub mod collectors {
  use super::*;

  pub struct WritePathMetrics;

  impl WritePathMetrics {
    pub fn message_written(duration: Duration, success: bool) {
      let status = if success { "ok" } else { "forbidden" };
      counter!("server_messages_written_total", "status" => status).increment(1);
      histogram!("server_write_path_duration_seconds").record(duration.as_secs_f64());
    }

    pub fn offline_handoff(queued: bool) {
      let mode = if queued { "queued" } else { "degraded_inline" };
      counter!("server_offline_handoff_total", "mode" => mode).increment(1);
    }
  }

  pub struct UnreadMetrics;

  impl UnreadMetrics {
    pub fn repair_completed(duration: Duration, repaired: usize) {
      counter!("server_unread_repair_total", "status" => "repaired").increment(repaired as u64);
      histogram!("server_unread_repair_duration_seconds").record(duration.as_secs_f64());
    }
  }
}
