//! Token verification (§4.4 Authentication, §6 HTTP/WS auth). Dev mode
//! accepts a bare, canonicalizable phone number as the token; prod mode
//! verifies a JWT against the configured key pair. The external auth
//! provider itself is out of scope (§1); this module only implements the
//! verification contract the spec requires of callers.

use jsonwebtoken::{DecodingKey, EncodingKey, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{UserId, canonicalize_phone};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub exp: i64,
  #[serde(default)]
  pub disabled: bool,
}

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("invalid token")]
  InvalidToken,
  #[error("user id mismatch")]
  UserIdMismatch,
  #[error("account disabled")]
  Disabled,
}

/// WebSocket close codes (§4.4, §6).
pub mod close_code {
  pub const INVALID_TOKEN: u16 = 4001;
  pub const USER_ID_MISMATCH: u16 = 4002;
  pub const DISABLED: u16 = 4003;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
  Dev,
  Prod,
}

impl Environment {
  pub fn from_env() -> Self {
    match std::env::var("ENVIRONMENT").unwrap_or_default().to_uppercase().as_str() {
      "PROD" | "PRODUCTION" => Environment::Prod,
      _ => Environment::Dev,
    }
  }
}

pub trait TokenVerifier {
  fn verify(&self, token: &str) -> Result<UserId, AuthError>;
  fn encode(&self, user: &UserId) -> Result<String, AuthError>;
}

pub struct JwtVerifier {
  env: Environment,
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
  validation: Validation,
}

impl JwtVerifier {
  pub fn new(env: Environment, secret: &str) -> Self {
    Self {
      env,
      encoding_key: EncodingKey::from_secret(secret.as_bytes()),
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
      validation: Validation::default(),
    }
  }
}

impl TokenVerifier for JwtVerifier {
  fn verify(&self, token: &str) -> Result<UserId, AuthError> {
    if self.env == Environment::Dev {
      // Dev mode accepts a bare phone number as the token (§4.4, §6 env).
      if let Some(user) = canonicalize_phone(token) {
        return Ok(user);
      }
    }

    let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
      .map_err(|_| AuthError::InvalidToken)?;
    if data.claims.disabled {
      return Err(AuthError::Disabled);
    }
    canonicalize_phone(&data.claims.sub).ok_or(AuthError::InvalidToken)
  }

  fn encode(&self, user: &UserId) -> Result<String, AuthError> {
    let claims = Claims {
      sub: user.0.clone(),
      exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp(),
      disabled: false,
    };
    encode(&jsonwebtoken::Header::default(), &claims, &self.encoding_key)
      .map_err(|_| AuthError::InvalidToken)
  }
}

/// Verifies that the path's userId matches the token's userId after
/// normalization (§4.4).
pub fn check_path_user_matches(path_user: &str, token_user: &UserId) -> Result<(), AuthError> {
  let path = canonicalize_phone(path_user).ok_or(AuthError::InvalidToken)?;
  if &path != token_user {
    return Err(AuthError::UserIdMismatch);
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dev_mode_accepts_bare_phone() {
    let v = JwtVerifier::new(Environment::Dev, "secret");
    let user = v.verify("+84900000001").unwrap();
    assert_eq!(user.0, "+84900000001");
  }

  #[test]
  fn prod_mode_roundtrips_jwt() {
    let v = JwtVerifier::new(Environment::Prod, "secret");
    let user = UserId("+84900000002".into());
    let token = v.encode(&user).unwrap();
    let verified = v.verify(&token).unwrap();
    assert_eq!(user, verified);
  }

  #[test]
  fn path_user_mismatch_is_rejected() {
    let token_user = UserId("+84900000001".into());
    assert!(check_path_user_matches("+84900000002", &token_user).is_err());
    assert!(check_path_user_matches("+84900000001", &token_user).is_ok());
  }
}
