//! Newtype wrappers for the identifier types that cross the adapter
//! boundaries (store, bus, queue). Conversations and messages use
//! store-assigned opaque ids (UUIDs in the reference implementation);
//! users are identified by their E.164 phone number, matching the source
//! system's choice of phone-number-as-identity.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct UserId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct ConversationId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for ConversationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for MessageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<String> for UserId {
  fn from(s: String) -> Self {
    UserId(s)
  }
}

impl From<&str> for UserId {
  fn from(s: &str) -> Self {
    UserId(s.to_string())
  }
}

impl ConversationId {
  pub fn new() -> Self {
    ConversationId(Uuid::new_v4().to_string())
  }
}

impl Default for ConversationId {
  fn default() -> Self {
    Self::new()
  }
}

impl MessageId {
  pub fn new() -> Self {
    MessageId(Uuid::new_v4().to_string())
  }
}

impl Default for MessageId {
  fn default() -> Self {
    Self::new()
  }
}

/// Canonicalize a phone number into E.164 shape: a leading `+` followed by
/// digits only. Best-effort — strips common separators, assumes the input
/// already carries (or is missing only) the leading `+`.
pub fn canonicalize_phone(raw: &str) -> Option<UserId> {
  let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
  if digits.is_empty() || digits.len() > 15 {
    return None;
  }
  Some(UserId(format!("+{digits}")))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonicalizes_plain_digits() {
    assert_eq!(
      canonicalize_phone("84900000001").unwrap(),
      UserId("+84900000001".to_string())
    );
  }

  #[test]
  fn canonicalizes_with_separators() {
    assert_eq!(
      canonicalize_phone("+84 900-000-001").unwrap(),
      UserId("+84900000001".to_string())
    );
  }

  #[test]
  fn rejects_empty() {
    assert!(canonicalize_phone("").is_none());
  }

  #[test]
  fn ids_are_display_and_hashable() {
    let id = ConversationId::new();
    assert_eq!(format!("{id}"), id.0);
  }
}
