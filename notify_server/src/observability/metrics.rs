use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;
use tracing::info;

/// Initialize Prometheus metrics for notify_server.
pub async fn init_metrics() -> anyhow::Result<()> {
  let builder = PrometheusBuilder::new();

  register_notify_metrics();

  let bind_address = "0.0.0.0:9091";
  builder
    .with_http_listener(bind_address.parse::<std::net::SocketAddr>()?)
    .install()?;

  info!("prometheus metrics server started on {}", bind_address);
  Ok(())
}

fn register_notify_metrics() {
  gauge!("notify_ws_connections_active").set(0.0);
  counter!("notify_ws_connections_total", "status" => "connected").absolute(0);
  counter!("notify_ws_connections_total", "status" => "disconnected").absolute(0);
  histogram!("notify_ws_connection_duration_seconds").record(0.0);

  counter!("notify_bus_messages_received_total", "channel" => "conversation").absolute(0);
  counter!("notify_bus_messages_processed_total", "channel" => "conversation", "status" => "success").absolute(0);
  counter!("notify_bus_messages_failed_total", "channel" => "conversation", "error_type" => "parse_error").absolute(0);
  histogram!("notify_bus_message_processing_duration_seconds", "channel" => "conversation").record(0.0);

  gauge!("notify_online_users_count").set(0.0);

  counter!("notify_events_broadcast_total", "event_type" => "new_message").absolute(0);
  counter!("notify_events_broadcast_failed_total", "event_type" => "new_message", "error_type" => "send_failed").absolute(0);
  histogram!("notify_event_broadcast_duration_seconds", "event_type" => "new_message").record(0.0);

  counter!("notify_health_checks_total", "status" => "healthy").absolute(0);
  histogram!("notify_health_check_duration_seconds").record(0.0);

  info!("metrics registered");
}

/// Metrics collection utilities for notify_server.
pub mod collectors {
  use super::*;

  pub struct WsMetrics;

  impl WsMetrics {
    pub fn connection_opened() {
      gauge!("notify_ws_connections_active").increment(1.0);
      counter!("notify_ws_connections_total", "status" => "connected").increment(1);
    }

    pub fn connection_closed(duration: Duration) {
      gauge!("notify_ws_connections_active").decrement(1.0);
      counter!("notify_ws_connections_total", "status" => "disconnected").increment(1);
      histogram!("notify_ws_connection_duration_seconds").record(duration.as_secs_f64());
    }

    pub fn record_active_connections(count: usize) {
      gauge!("notify_ws_connections_active").set(count as f64);
    }
  }

  pub struct BusMetrics;

  impl BusMetrics {
    pub fn message_received(channel: &str) {
      counter!("notify_bus_messages_received_total", "channel" => channel.to_string()).increment(1);
    }

    pub fn message_processed(channel: &str, duration: Duration, success: bool) {
      if success {
        counter!("notify_bus_messages_processed_total", "channel" => channel.to_string(), "status" => "success")
          .increment(1);
      } else {
        counter!("notify_bus_messages_failed_total", "channel" => channel.to_string(), "error_type" => "processing_error")
          .increment(1);
      }
      histogram!("notify_bus_message_processing_duration_seconds", "channel" => channel.to_string())
        .record(duration.as_secs_f64());
    }

    pub fn parse_error(channel: &str) {
      counter!("notify_bus_messages_failed_total", "channel" => channel.to_string(), "error_type" => "parse_error")
        .increment(1);
    }
  }

  pub struct OnlineUsersMetrics;

  impl OnlineUsersMetrics {
    pub fn set_count(count: usize) {
      gauge!("notify_online_users_count").set(count as f64);
    }
  }

  pub struct EventMetrics;

  impl EventMetrics {
    pub fn broadcast_event(event_type: &str, duration: Duration, success: bool) {
      if success {
        counter!("notify_events_broadcast_total", "event_type" => event_type.to_string()).increment(1);
      } else {
        counter!("notify_events_broadcast_failed_total", "event_type" => event_type.to_string(), "error_type" => "send_failed")
          .increment(1);
      }
      histogram!("notify_event_broadcast_duration_seconds", "event_type" => event_type.to_string())
        .record(duration.as_secs_f64());
    }
  }

  pub struct HealthMetrics;

  impl HealthMetrics {
    pub fn health_check_completed(duration: Duration, healthy: bool) {
      let status = if healthy { "healthy" } else { "unhealthy" };
      counter!("notify_health_checks_total", "status" => status.to_string()).increment(1);
      histogram!("notify_health_check_duration_seconds").record(duration.as_secs_f64());
    }
  }
}
