//! # Actors
//!
//! Who is asking for a mutation. Authorization decisions are made against
//! the actor and the transaction's parties; the engine never infers an
//! actor from request data.

use serde::{Deserialize, Serialize};

use crate::identity::UserId;

/// The originator of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// An end user, acting as buyer or seller depending on the transaction.
    User(UserId),
    /// A human operator (arbiter, support, settlement callback).
    Operator(String),
    /// The engine itself: expiry sweep, review-window timers, and
    /// arbitration outcomes.
    System,
}

impl Actor {
    /// The user behind this actor, if any.
    pub fn user(&self) -> Option<&UserId> {
        match self {
            Self::User(id) => Some(id),
            Self::Operator(_) | Self::System => None,
        }
    }

    /// Whether the actor is the engine itself.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// Whether the actor is a human operator.
    pub fn is_operator(&self) -> bool {
        matches!(self, Self::Operator(_))
    }

    /// Stable label for logs and audit entries.
    pub fn label(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Operator(name) => format!("operator:{name}"),
            Self::System => "system".to_string(),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let alice = Actor::User(UserId::new("alice").unwrap());
        assert_eq!(alice.label(), "user:alice");
        assert_eq!(Actor::Operator("ops-1".into()).label(), "operator:ops-1");
        assert_eq!(Actor::System.label(), "system");
    }

    #[test]
    fn user_accessor() {
        let id = UserId::new("bob").unwrap();
        assert_eq!(Actor::User(id.clone()).user(), Some(&id));
        assert_eq!(Actor::System.user(), None);
        assert!(Actor::System.is_system());
        assert!(Actor::Operator("x".into()).is_operator());
    }

    #[test]
    fn serde_shape() {
        let json = serde_json::to_value(Actor::User(UserId::new("carol").unwrap())).unwrap();
        assert_eq!(json["kind"], "user");
        assert_eq!(json["id"], "carol");
        let system = serde_json::to_value(Actor::System).unwrap();
        assert_eq!(system["kind"], "system");
    }
}
