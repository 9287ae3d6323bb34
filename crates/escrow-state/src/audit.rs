//! # Audit Chain
//!
//! Every mutation of a transaction appends an [`AuditEntry`]. Each entry's
//! hash covers the previous entry's hash, so rewriting history anywhere in
//! the log breaks every later link. The first entry chains to the zero hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::status::EscrowStatus;

/// Hash that the first entry of every log chains to.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One append-only audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at zero.
    pub sequence: u64,
    /// Status before the mutation (`None` for creation).
    pub from_status: Option<EscrowStatus>,
    /// Status after the mutation.
    pub to_status: EscrowStatus,
    /// What happened (`"fund"`, `"cancel_consent"`, `"expire"`, ...).
    pub action: String,
    /// Who did it, as an actor label.
    pub actor: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Hash of the previous entry.
    pub previous_hash: String,
    /// Hash of this entry.
    pub entry_hash: String,
}

impl AuditEntry {
    /// Build the next entry after `previous` (or the genesis entry).
    pub(crate) fn next(
        previous: Option<&AuditEntry>,
        from_status: Option<EscrowStatus>,
        to_status: EscrowStatus,
        action: &str,
        actor: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (sequence, previous_hash) = match previous {
            Some(prev) => (prev.sequence + 1, prev.entry_hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };
        let mut entry = Self {
            sequence,
            from_status,
            to_status,
            action: action.to_string(),
            actor,
            timestamp,
            previous_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();
        entry
    }

    /// SHA-256 over the previous hash and this entry's content.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(self.from_status.map(|s| s.as_str()).unwrap_or("-").as_bytes());
        hasher.update(b"|");
        hasher.update(self.to_status.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(self.action.as_bytes());
        hasher.update(b"|");
        hasher.update(self.actor.as_bytes());
        hasher.update(b"|");
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

/// Check hash continuity and per-entry integrity of a log.
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    let mut expected_prev = GENESIS_HASH;
    for (i, entry) in entries.iter().enumerate() {
        if entry.sequence != i as u64
            || entry.previous_hash != expected_prev
            || entry.entry_hash != entry.compute_hash()
        {
            return false;
        }
        expected_prev = &entry.entry_hash;
    }
    true
}
