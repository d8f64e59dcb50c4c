pub mod auth;
pub mod bus;
pub mod bus_nats;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod notify;
pub mod push;
pub mod queue;
pub mod queue_redis;
pub mod store;
pub mod store_pg;

pub use error::AppError;
pub use ids::{ConversationId, MessageId, UserId};
