//! Error taxonomy (§7). Every fallible operation in the store/bus/queue
//! adapters, the write path, and the consumer returns `AppError`; HTTP
//! handlers map it to a status code, the consumer maps it to retry/drop/dlq.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
  #[error("validation error: {0}")]
  Validation(String),

  #[error("authentication error: {0}")]
  Auth(String),

  #[error("forbidden: {0}")]
  Forbidden(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("service unavailable: {0}")]
  ServiceUnavailable(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl AppError {
  pub fn internal(e: impl std::fmt::Display) -> Self {
    AppError::Internal(e.to_string())
  }

  /// Transient faults (store/bus/queue connectivity) are retryable by the
  /// caller; this mirrors the "transient" consumer-side error kind of §7.
  pub fn is_transient(&self) -> bool {
    matches!(self, AppError::ServiceUnavailable(_) | AppError::Internal(_))
  }
}

impl From<sqlx::Error> for AppError {
  fn from(e: sqlx::Error) -> Self {
    match e {
      sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
      other => AppError::ServiceUnavailable(other.to_string()),
    }
  }
}

/// Consumer-side error kind (§7): distinguishes transient failures (retry),
/// permanent failures (drop/dead-letter without consuming a retry slot is
/// NOT a thing we do — permanent still goes through retry_send, matching
/// §4.7's uniform handler-returns-bool contract), and token invalidity
/// (delete the device token, but the event itself still succeeds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
  Success,
  Transient,
}
