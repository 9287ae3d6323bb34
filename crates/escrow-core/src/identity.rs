//! # Identity Newtypes
//!
//! Each identifier is a distinct type. UUID-based identifiers are valid by
//! construction; [`UserId`] and [`IdempotencyKey`] are caller-supplied
//! strings and validate their format at construction time.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// UUID-based identifiers (always valid by construction)
// ---------------------------------------------------------------------------

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| ValidationError::InvalidUuid(s.to_string()))
            }
        }
    };
}

uuid_identifier!(
    /// Identifier of an escrow transaction, the unit of custody.
    TransactionId
);

uuid_identifier!(
    /// Identifier of a piece of delivery evidence.
    ProofId
);

uuid_identifier!(
    /// Identifier of a dispute raised against a transaction.
    DisputeId
);

uuid_identifier!(
    /// Identifier of a post-settlement rating.
    RatingId
);

uuid_identifier!(
    /// Identifier of a compensation record issued by arbitration.
    CompensationId
);

// ---------------------------------------------------------------------------
// String-based identifiers (validated at construction)
// ---------------------------------------------------------------------------

const MAX_USER_ID_LEN: usize = 128;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Identifier of a user (buyer, seller, rater). Issued by the surrounding
/// identity system, so the engine only checks its shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a validated user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the identifier is empty, longer than
    /// 128 characters, or contains whitespace/control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyUserId);
        }
        if id.chars().count() > MAX_USER_ID_LEN {
            return Err(ValidationError::UserIdTooLong(id));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ValidationError::UserIdCharacters(id));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied key making a mutating request safe to repeat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create a validated idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidIdempotencyKey`] unless the key is
    /// 1-128 printable ASCII characters.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        let valid = !key.is_empty()
            && key.len() <= MAX_IDEMPOTENCY_KEY_LEN
            && key.bytes().all(|b| b.is_ascii_graphic());
        if !valid {
            return Err(ValidationError::InvalidIdempotencyKey(key));
        }
        Ok(Self(key))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_identifiers_are_distinct_and_parse_back() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn uuid_identifier_rejects_garbage() {
        assert!("not-a-uuid".parse::<DisputeId>().is_err());
    }

    #[test]
    fn uuid_identifier_serializes_transparently() {
        let uuid = Uuid::new_v4();
        let id = ProofId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }

    #[test]
    fn user_id_accepts_typical_values() {
        assert!(UserId::new("alice").is_ok());
        assert!(UserId::new("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
        assert!(UserId::new("user-42@example.org").is_ok());
    }

    #[test]
    fn user_id_rejects_empty_and_whitespace() {
        assert_eq!(UserId::new(""), Err(ValidationError::EmptyUserId));
        assert_eq!(UserId::new("   "), Err(ValidationError::EmptyUserId));
        assert!(matches!(
            UserId::new("alice bob"),
            Err(ValidationError::UserIdCharacters(_))
        ));
    }

    #[test]
    fn user_id_rejects_overlong() {
        let long = "a".repeat(129);
        assert!(matches!(
            UserId::new(long),
            Err(ValidationError::UserIdTooLong(_))
        ));
        assert!(UserId::new("a".repeat(128)).is_ok());
    }

    #[test]
    fn user_id_deserialization_validates() {
        let ok: Result<UserId, _> = serde_json::from_str("\"bob\"");
        assert!(ok.is_ok());
        let bad: Result<UserId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn idempotency_key_validation() {
        assert!(IdempotencyKey::new("req-2026-10-16-0001").is_ok());
        assert!(IdempotencyKey::new("").is_err());
        assert!(IdempotencyKey::new("has space").is_err());
        assert!(IdempotencyKey::new("k".repeat(129)).is_err());
    }
}
