use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::info;

/// Initialize Prometheus metrics for notification_consumer.
pub async fn init_metrics(bind_address: &str) -> anyhow::Result<()> {
  let builder = PrometheusBuilder::new();

  register_consumer_metrics();

  builder
    .with_http_listener(bind_address.parse::<std::net::SocketAddr>()?)
    .install()?;

  info!("prometheus metrics server started on {}", bind_address);
  Ok(())
}

fn register_consumer_metrics() {
  counter!("consumer_messages_received_total", "queue" => "main").absolute(0);
  counter!("consumer_messages_received_total", "queue" => "retry").absolute(0);

  counter!("consumer_dispatch_total", "queue" => "main", "event_type" => "new_message", "outcome" => "success").absolute(0);
  histogram!("consumer_dispatch_duration_seconds", "event_type" => "new_message").record(0.0);

  counter!("consumer_retry_scheduled_total", "event_type" => "new_message").absolute(0);
  counter!("consumer_dead_lettered_total", "event_type" => "new_message").absolute(0);

  gauge!("consumer_pollers_active").set(0.0);

  info!("metrics registered");
}

pub mod collectors {
  use super::*;

  pub struct ConsumerMetrics;

  impl ConsumerMetrics {
    pub fn message_received(queue: &str) {
      counter!("consumer_messages_received_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn dispatch_outcome(queue: &str, event_type: &str, outcome: &str) {
      counter!(
        "consumer_dispatch_total",
        "queue" => queue.to_string(),
        "event_type" => event_type.to_string(),
        "outcome" => outcome.to_string()
      )
      .increment(1);
    }

    pub fn dispatch_duration(event_type: &str, duration: Duration) {
      histogram!("consumer_dispatch_duration_seconds", "event_type" => event_type.to_string())
        .record(duration.as_secs_f64());
    }

    pub fn retry_scheduled(event_type: &str, attempt: u32) {
      counter!(
        "consumer_retry_scheduled_total",
        "event_type" => event_type.to_string(),
        "attempt" => attempt.to_string()
      )
      .increment(1);
    }

    pub fn dead_lettered(event_type: &str) {
      counter!("consumer_dead_lettered_total", "event_type" => event_type.to_string()).increment(1);
    }

    pub fn pollers_active(count: usize) {
      gauge!("consumer_pollers_active").set(count as f64);
    }
  }
}
