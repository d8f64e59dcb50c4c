//! Fechatter Server — HTTP surface (§6), Message Write Path (C5, §4.5), and
//! Unread Maintenance (C6, §4.6). Router assembly mirrors the teacher's
//! `get_router` shape: public routes, then bearer-auth-gated routes layered
//! with `verify_token_middleware`.

pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middlewares;
pub mod observability;
pub mod openapi;
pub mod state;
pub mod unread;
pub mod write_path;

pub use config::AppConfig;
pub use state::AppState;

use axum::{
  Router,
  middleware::from_fn_with_state,
  routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Builds the full router: `/api/v1` prefix, bearer auth on everything but
/// `/health` (§6).
pub fn get_router(state: AppState) -> Router {
  let authed = Router::new()
    .route("/whoami", get(handlers::health::whoami_handler))
    .route(
      "/conversations",
      get(handlers::conversations::list_conversations_handler).post(handlers::conversations::create_conversation_handler),
    )
    .route(
      "/conversations/{c}",
      get(handlers::conversations::get_conversation_handler).put(handlers::conversations::update_conversation_handler),
    )
    .route("/conversations/{c}/members", post(handlers::conversations::add_member_handler))
    .route(
      "/conversations/{c}/messages",
      get(handlers::messages::list_messages_handler).post(handlers::messages::send_message_handler),
    )
    .route(
      "/conversations/{c}/messages/{m}/read",
      post(handlers::messages::mark_read_handler),
    )
    .route("/conversations/{c}/mark_all_read", post(handlers::messages::mark_all_read_handler))
    .route(
      "/conversations/{c}/messages/{m}/reactions",
      post(handlers::messages::set_reaction_handler),
    )
    .route("/conversations/{c}/typing", post(handlers::conversations::typing_handler))
    .route("/user/status", post(handlers::user::set_status_handler))
    .route("/maintenance/recompute_unread", post(handlers::maintenance::recompute_unread_handler))
    .route(
      "/maintenance/find_inconsistencies",
      post(handlers::maintenance::find_inconsistencies_handler),
    )
    .route(
      "/maintenance/repair_all_unread_counts",
      post(handlers::maintenance::repair_all_unread_counts_handler),
    )
    .layer(from_fn_with_state(state.clone(), middlewares::verify_token_middleware));

  let public = Router::new().route("/health", get(handlers::health::health_handler));

  Router::new()
    .nest("/api/v1", public.merge(authed))
    .merge(openapi::swagger_ui())
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
