//! Wires the Bus's `listener_loop` into the Connection Manager: every
//! message delivered on a channel this instance subscribes to is
//! deserialized into a `RealtimeEvent` and handed to
//! `ConnectionManager::on_bus_event` (§4.2, §4.4). Unknown/malformed
//! payloads are logged and dropped, never fatal to the loop.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use fechatter_core::bus::BusMessage;
use fechatter_core::events::RealtimeEvent;

use crate::observability::metrics::collectors::BusMetrics;
use crate::state::AppState;

pub fn spawn(state: AppState) {
  tokio::spawn(async move {
    let connections = state.connections.clone();
    let handler: fechatter_core::bus::BusHandler = Arc::new(move |msg: BusMessage| {
      let connections = connections.clone();
      tokio::spawn(async move { handle_message(connections, msg).await });
    });

    if let Err(e) = state.bus.listener_loop(&state.instance_id, handler).await {
      warn!(error = %e, "bus listener loop exited");
    }
  });
}

async fn handle_message(connections: Arc<crate::connection_manager::ConnectionManager>, msg: BusMessage) {
  let start = Instant::now();
  BusMetrics::message_received(&msg.channel);

  match serde_json::from_slice::<RealtimeEvent>(&msg.payload) {
    Ok(event) => {
      connections.on_bus_event(event).await;
      BusMetrics::message_processed(&msg.channel, start.elapsed(), true);
    }
    Err(e) => {
      warn!(channel = %msg.channel, error = %e, "dropping unparseable bus message");
      BusMetrics::parse_error(&msg.channel);
    }
  }
}
