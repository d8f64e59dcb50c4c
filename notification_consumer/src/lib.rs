//! Notification Consumer (C7, §4.7) — a standalone binary polling the
//! main and retry queues, applying user preferences, batching FCM, and
//! implementing retry/DLQ with exponential backoff. Shares its dispatch
//! logic (`fechatter_core::notify`) with `fechatter_server`'s write-path
//! degraded-mode fallback (§4.5 step 6d), so the two stay behaviorally
//! identical without duplicating the handler table.

pub mod config;
pub mod consumer;
pub mod handlers;
pub mod observability;
pub mod state;

pub use config::AppConfig;
pub use state::AppState;

use axum::{Router, routing::get};

/// Thin health/metrics surface. The consumer's real work happens off this
/// router entirely (§7 "the consumer never surfaces to end users").
pub fn get_router(state: AppState) -> Router {
  Router::new()
    .route("/health", get(handlers::health_handler))
    .with_state(state)
}
