//! # Dispute Sub-Machine
//!
//! Active only while the parent transaction is `DISPUTED`.
//!
//! ```text
//! OPENED ──begin_review()──▶ REVIEWING ──request_evidence()──▶ EVIDENCE_REQUESTED
//!                              │  ▲                                   │
//!                              │  └──────────resume_review()──────────┘
//!                              │
//!          ┌───────────────────┼─────────────── confidence < threshold
//!          │                   │                        │
//!          │                   ▼                        ▼
//!          │        RESOLVED_BUYER / SELLER / SPLIT ◀── ESCALATED
//!          │                   │                (manual decision)
//!          │                close()
//!          │                   ▼
//!          └─────────────▶  CLOSED
//! ```
//!
//! Each transition has a dedicated method. Decisions are idempotent:
//! re-delivering an assessment already recorded, any decision after
//! `CLOSED`, or an automated assessment while `ESCALATED` is a no-op
//! reported as [`DecisionOutcome::Ignored`]. A *different* verdict after
//! resolution is an integrity violation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use escrow_core::{Amount, DisputeId, TransactionId, UserId};

use crate::decision::{ArbitrationDecision, Assessment, Award, DecisionSource, ManualDecision, Verdict};
use crate::error::ArbitrationError;

const MAX_REASON_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 5000;

/// The lifecycle state of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeStatus {
    /// Created; case bundle not yet accepted by the arbitration collaborator.
    Opened,
    /// Case bundle submitted; awaiting an assessment.
    Reviewing,
    /// An operator asked the parties for more evidence.
    EvidenceRequested,
    /// Automated confidence was too low; awaiting a manual decision.
    Escalated,
    /// Decided for the buyer.
    ResolvedBuyer,
    /// Decided for the seller.
    ResolvedSeller,
    /// Decided as a split.
    ResolvedSplit,
    /// Settlement applied. Terminal.
    Closed,
}

impl DisputeStatus {
    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "OPENED",
            Self::Reviewing => "REVIEWING",
            Self::EvidenceRequested => "EVIDENCE_REQUESTED",
            Self::Escalated => "ESCALATED",
            Self::ResolvedBuyer => "RESOLVED_BUYER",
            Self::ResolvedSeller => "RESOLVED_SELLER",
            Self::ResolvedSplit => "RESOLVED_SPLIT",
            Self::Closed => "CLOSED",
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether a verdict has been reached.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::ResolvedBuyer | Self::ResolvedSeller | Self::ResolvedSplit
        )
    }

    /// Whether a verdict may still be recorded.
    pub fn is_undecided(&self) -> bool {
        matches!(
            self,
            Self::Opened | Self::Reviewing | Self::EvidenceRequested | Self::Escalated
        )
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [DisputeStatus] {
        match self {
            Self::Opened => &[
                Self::Reviewing,
                Self::ResolvedBuyer,
                Self::ResolvedSeller,
                Self::ResolvedSplit,
            ],
            Self::Reviewing => &[
                Self::EvidenceRequested,
                Self::Escalated,
                Self::ResolvedBuyer,
                Self::ResolvedSeller,
                Self::ResolvedSplit,
            ],
            Self::EvidenceRequested => &[
                Self::Reviewing,
                Self::ResolvedBuyer,
                Self::ResolvedSeller,
                Self::ResolvedSplit,
            ],
            Self::Escalated => &[
                Self::ResolvedBuyer,
                Self::ResolvedSeller,
                Self::ResolvedSplit,
            ],
            Self::ResolvedBuyer | Self::ResolvedSeller | Self::ResolvedSplit => &[Self::Closed],
            Self::Closed => &[],
        }
    }

    fn for_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::ResolvedBuyer => Self::ResolvedBuyer,
            Verdict::ResolvedSeller => Self::ResolvedSeller,
            Verdict::ResolvedSplit => Self::ResolvedSplit,
        }
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the dispute came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOrigin {
    /// Opened by the buyer or seller.
    Party,
    /// Forced by the expiry sweep on a funded transaction.
    Expiry,
}

/// Result of delivering a decision to a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The dispute resolved with this verdict.
    Resolved(Verdict),
    /// Confidence was below threshold; awaiting a manual decision.
    Escalated,
    /// Duplicate or late delivery; nothing changed.
    Ignored,
}

/// A record of a dispute state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeTransition {
    /// State before.
    pub from_state: DisputeStatus,
    /// State after.
    pub to_state: DisputeStatus,
    /// Who drove it (actor label).
    pub actor: String,
    /// Optional note (evidence request text, escalation reason).
    pub note: Option<String>,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// A dispute over one escrow transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowDispute {
    /// Unique dispute identifier.
    pub id: DisputeId,
    /// The disputed transaction.
    pub escrow_transaction_id: TransactionId,
    /// The buyer or seller who opened it (buyer for expiry-forced disputes).
    pub initiator_id: UserId,
    /// Short reason.
    pub reason: String,
    /// Longer description.
    pub description: String,
    status: DisputeStatus,
    /// Party-opened or expiry-forced.
    pub origin: DisputeOrigin,
    /// When the dispute was opened.
    pub created_at: DateTime<Utc>,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
    /// When a verdict was reached.
    pub resolved_at: Option<DateTime<Utc>>,
    /// The verdict.
    pub resolution: Option<Verdict>,
    /// Human-readable award summary.
    pub resolution_detail: Option<String>,
    /// Assessment id of the last automated assessment accepted.
    pub arbitration_assessment_id: Option<String>,
    /// The decision that resolved (or escalated) the dispute.
    pub decision: Option<ArbitrationDecision>,
    /// Fund movements fixed at resolution.
    pub award: Option<Award>,
    /// Note from the latest evidence request.
    pub evidence_request: Option<String>,
    transition_log: Vec<DisputeTransition>,
}

impl EscrowDispute {
    /// Open a dispute in [`DisputeStatus::Opened`].
    ///
    /// Whether the initiator is a party and whether the transaction is
    /// disputable is checked by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidDispute`] for an empty or overlong
    /// reason or an overlong description.
    pub fn open(
        escrow_transaction_id: TransactionId,
        initiator_id: UserId,
        reason: &str,
        description: &str,
        origin: DisputeOrigin,
        now: DateTime<Utc>,
    ) -> Result<Self, ArbitrationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ArbitrationError::InvalidDispute(
                "reason must not be empty".into(),
            ));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(ArbitrationError::InvalidDispute(format!(
                "reason exceeds {MAX_REASON_LEN} characters"
            )));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ArbitrationError::InvalidDispute(format!(
                "description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Ok(Self {
            id: DisputeId::new(),
            escrow_transaction_id,
            initiator_id,
            reason: reason.to_string(),
            description: description.to_string(),
            status: DisputeStatus::Opened,
            origin,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            resolution: None,
            resolution_detail: None,
            arbitration_assessment_id: None,
            decision: None,
            award: None,
            evidence_request: None,
            transition_log: Vec::new(),
        })
    }

    /// Current state.
    pub fn status(&self) -> DisputeStatus {
        self.status
    }

    /// Append-only transition history.
    pub fn transition_log(&self) -> &[DisputeTransition] {
        &self.transition_log
    }

    /// Whether the dispute still blocks other disputes on its transaction.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether the case still needs an automated assessment: not yet
    /// reviewed, or under review with nothing recorded.
    pub fn awaiting_assessment(&self) -> bool {
        match self.status {
            DisputeStatus::Opened => true,
            DisputeStatus::Reviewing => self.decision.is_none(),
            _ => false,
        }
    }

    /// `OPENED → REVIEWING` once the case bundle has been submitted.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] if not `OPENED`.
    pub fn begin_review(&mut self, now: DateTime<Utc>) -> Result<(), ArbitrationError> {
        self.require_state(DisputeStatus::Opened, DisputeStatus::Reviewing)?;
        self.record_transition(DisputeStatus::Reviewing, "system", None, now);
        Ok(())
    }

    /// `REVIEWING → EVIDENCE_REQUESTED`.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] if not `REVIEWING` or the note is empty.
    pub fn request_evidence(
        &mut self,
        actor: &str,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ArbitrationError> {
        self.require_state(DisputeStatus::Reviewing, DisputeStatus::EvidenceRequested)?;
        let note = note.trim();
        if note.is_empty() {
            return Err(ArbitrationError::InvalidDispute(
                "evidence request must say what is needed".into(),
            ));
        }
        self.evidence_request = Some(note.to_string());
        self.record_transition(
            DisputeStatus::EvidenceRequested,
            actor,
            Some(note.to_string()),
            now,
        );
        Ok(())
    }

    /// `EVIDENCE_REQUESTED → REVIEWING`. Clears any recorded assessment so
    /// the case is re-assessed with the new evidence.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] if not `EVIDENCE_REQUESTED`.
    pub fn resume_review(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), ArbitrationError> {
        self.require_state(DisputeStatus::EvidenceRequested, DisputeStatus::Reviewing)?;
        self.decision = None;
        self.record_transition(DisputeStatus::Reviewing, actor, None, now);
        Ok(())
    }

    /// Deliver an automated assessment.
    ///
    /// At or above `threshold` the dispute resolves and the award is fixed;
    /// below it the dispute escalates.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::InvalidDecision`] for a malformed
    /// assessment, [`ArbitrationError::ConflictingDecision`] for a different
    /// verdict after resolution, or [`ArbitrationError::InvalidTransition`]
    /// when the dispute is not under review.
    pub fn apply_assessment(
        &mut self,
        assessment: &Assessment,
        threshold: f64,
        amount: Amount,
        fee: Amount,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ArbitrationError> {
        assessment.validate()?;
        if self.status.is_terminal() || self.status == DisputeStatus::Escalated {
            return Ok(DecisionOutcome::Ignored);
        }
        if self.status.is_resolved() {
            return self.check_redelivery(assessment.decision);
        }
        if self.arbitration_assessment_id.as_deref() == Some(assessment.assessment_id.as_str())
            && self.decision.is_some()
        {
            return Ok(DecisionOutcome::Ignored);
        }
        if self.status != DisputeStatus::Reviewing {
            return Err(ArbitrationError::InvalidTransition {
                from: self.status.to_string(),
                to: DisputeStatus::for_verdict(assessment.decision).to_string(),
                reason: "assessments are accepted only while REVIEWING".into(),
            });
        }

        let decision = ArbitrationDecision::automated(assessment, now);
        self.arbitration_assessment_id = Some(assessment.assessment_id.clone());

        if assessment.confidence < threshold {
            let note = format!(
                "confidence {:.2} below threshold {:.2}",
                assessment.confidence, threshold
            );
            self.decision = Some(decision);
            self.record_transition(DisputeStatus::Escalated, "system", Some(note), now);
            return Ok(DecisionOutcome::Escalated);
        }

        self.resolve(decision, amount, fee, now);
        Ok(DecisionOutcome::Resolved(assessment.decision))
    }

    /// Deliver an operator's decision. Accepted from any undecided state.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::ConflictingDecision`] for a different
    /// verdict after resolution.
    pub fn accept_manual_decision(
        &mut self,
        manual: &ManualDecision,
        decided_by: &str,
        amount: Amount,
        fee: Amount,
        now: DateTime<Utc>,
    ) -> Result<DecisionOutcome, ArbitrationError> {
        if self.status.is_terminal() {
            return Ok(DecisionOutcome::Ignored);
        }
        if self.status.is_resolved() {
            return self.check_redelivery(manual.verdict);
        }
        let decision = ArbitrationDecision {
            assessment_id: format!("manual:{}", self.id),
            verdict: manual.verdict,
            confidence: 1.0,
            rationale: manual.rationale.clone(),
            compensation_amount: manual.compensation_amount,
            source: DecisionSource::Manual,
            decided_by: decided_by.to_string(),
            decided_at: now,
        };
        self.resolve(decision, amount, fee, now);
        Ok(DecisionOutcome::Resolved(manual.verdict))
    }

    /// `RESOLVED_* → CLOSED` after settlement has been applied.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] if not resolved.
    pub fn close(&mut self, now: DateTime<Utc>) -> Result<(), ArbitrationError> {
        if self.status.is_terminal() {
            return Err(self.terminal_error());
        }
        if !self.status.is_resolved() {
            return Err(ArbitrationError::InvalidTransition {
                from: self.status.to_string(),
                to: DisputeStatus::Closed.to_string(),
                reason: "dispute has no verdict".into(),
            });
        }
        self.record_transition(DisputeStatus::Closed, "system", None, now);
        Ok(())
    }

    fn resolve(
        &mut self,
        decision: ArbitrationDecision,
        amount: Amount,
        fee: Amount,
        now: DateTime<Utc>,
    ) {
        let verdict = decision.verdict;
        let award = Award::compute(verdict, amount, fee, decision.compensation_amount);
        let actor = decision.decided_by.clone();
        self.resolution = Some(verdict);
        self.resolution_detail = Some(award.describe());
        self.award = Some(award);
        self.decision = Some(decision);
        self.resolved_at = Some(now);
        self.record_transition(DisputeStatus::for_verdict(verdict), &actor, None, now);
    }

    fn check_redelivery(&self, verdict: Verdict) -> Result<DecisionOutcome, ArbitrationError> {
        match self.resolution {
            Some(recorded) if recorded == verdict => Ok(DecisionOutcome::Ignored),
            Some(recorded) => Err(ArbitrationError::ConflictingDecision {
                dispute_id: self.id.to_string(),
                recorded: recorded.to_string(),
                attempted: verdict.to_string(),
            }),
            None => Ok(DecisionOutcome::Ignored),
        }
    }

    fn require_state(
        &self,
        expected: DisputeStatus,
        target: DisputeStatus,
    ) -> Result<(), ArbitrationError> {
        if self.status.is_terminal() {
            return Err(self.terminal_error());
        }
        if self.status != expected {
            return Err(ArbitrationError::InvalidTransition {
                from: self.status.to_string(),
                to: target.to_string(),
                reason: format!("expected state {expected}, got {}", self.status),
            });
        }
        Ok(())
    }

    fn terminal_error(&self) -> ArbitrationError {
        ArbitrationError::TerminalState {
            dispute_id: self.id.to_string(),
            state: self.status.to_string(),
        }
    }

    fn record_transition(
        &mut self,
        to: DisputeStatus,
        actor: &str,
        note: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.transition_log.push(DisputeTransition {
            from_state: self.status,
            to_state: to,
            actor: actor.to_string(),
            note,
            timestamp: now,
        });
        self.status = to;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(units: u64) -> Amount {
        Amount::from_units(units)
    }

    fn opened() -> EscrowDispute {
        EscrowDispute::open(
            TransactionId::new(),
            UserId::new("buyer").unwrap(),
            "item not as described",
            "the synthesizer has a cracked case",
            DisputeOrigin::Party,
            Utc::now(),
        )
        .unwrap()
    }

    fn reviewing() -> EscrowDispute {
        let mut d = opened();
        d.begin_review(Utc::now()).unwrap();
        d
    }

    fn assessment(verdict: Verdict, confidence: f64) -> Assessment {
        Assessment {
            assessment_id: "as-1".into(),
            decision: verdict,
            confidence,
            rationale: "photos show damage".into(),
            compensation_amount: None,
        }
    }

    #[test]
    fn open_requires_reason() {
        let err = EscrowDispute::open(
            TransactionId::new(),
            UserId::new("buyer").unwrap(),
            "   ",
            "",
            DisputeOrigin::Party,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ArbitrationError::InvalidDispute(_)));
    }

    #[test]
    fn high_confidence_resolves() {
        let mut d = reviewing();
        let outcome = d
            .apply_assessment(
                &assessment(Verdict::ResolvedBuyer, 0.92),
                0.75,
                amt(100),
                amt(1),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Resolved(Verdict::ResolvedBuyer));
        assert_eq!(d.status(), DisputeStatus::ResolvedBuyer);
        assert_eq!(d.arbitration_assessment_id.as_deref(), Some("as-1"));
        assert_eq!(d.award.unwrap().buyer_refund, amt(100));

        d.close(Utc::now()).unwrap();
        assert_eq!(d.status(), DisputeStatus::Closed);
        assert!(!d.is_open());
        assert_eq!(d.transition_log().len(), 3);
    }

    #[test]
    fn low_confidence_escalates_and_waits_for_manual() {
        let mut d = reviewing();
        let outcome = d
            .apply_assessment(
                &assessment(Verdict::ResolvedBuyer, 0.4),
                0.75,
                amt(100),
                amt(1),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Escalated);
        assert_eq!(d.status(), DisputeStatus::Escalated);
        assert!(d.award.is_none());

        let again = d
            .apply_assessment(
                &assessment(Verdict::ResolvedSeller, 0.99),
                0.75,
                amt(100),
                amt(1),
                Utc::now(),
            )
            .unwrap();
        assert_eq!(again, DecisionOutcome::Ignored);
        assert_eq!(d.status(), DisputeStatus::Escalated);

        let manual = ManualDecision {
            verdict: Verdict::ResolvedSeller,
            rationale: "delivery confirmed by carrier".into(),
            compensation_amount: None,
        };
        let outcome = d
            .accept_manual_decision(&manual, "operator:ops", amt(100), amt(1), Utc::now())
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Resolved(Verdict::ResolvedSeller));
        assert_eq!(d.decision.as_ref().unwrap().source, DecisionSource::Manual);
        assert_eq!(d.award.unwrap().seller_release, amt(99));
    }

    #[test]
    fn redelivery_after_close_is_noop() {
        let mut d = reviewing();
        let a = assessment(Verdict::ResolvedBuyer, 0.9);
        d.apply_assessment(&a, 0.75, amt(100), amt(0), Utc::now())
            .unwrap();
        d.close(Utc::now()).unwrap();
        let before = d.clone();

        let outcome = d
            .apply_assessment(&a, 0.75, amt(100), amt(0), Utc::now())
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Ignored);

        let manual = ManualDecision {
            verdict: Verdict::ResolvedSeller,
            rationale: String::new(),
            compensation_amount: None,
        };
        let outcome = d
            .accept_manual_decision(&manual, "operator:ops", amt(100), amt(0), Utc::now())
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Ignored);
        assert_eq!(d, before);
    }

    #[test]
    fn conflicting_verdict_before_close_is_integrity_violation() {
        let mut d = reviewing();
        d.apply_assessment(
            &assessment(Verdict::ResolvedBuyer, 0.9),
            0.75,
            amt(100),
            amt(0),
            Utc::now(),
        )
        .unwrap();
        let err = d
            .apply_assessment(
                &assessment(Verdict::ResolvedSeller, 0.9),
                0.75,
                amt(100),
                amt(0),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::ConflictingDecision { .. }));
        assert_eq!(d.status(), DisputeStatus::ResolvedBuyer);
    }

    #[test]
    fn assessment_rejected_before_review() {
        let mut d = opened();
        let err = d
            .apply_assessment(
                &assessment(Verdict::ResolvedBuyer, 0.9),
                0.75,
                amt(100),
                amt(0),
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::InvalidTransition { .. }));
        assert_eq!(d.status(), DisputeStatus::Opened);
    }

    #[test]
    fn evidence_request_round_trip() {
        let mut d = reviewing();
        d.request_evidence("operator:ops", "photo of serial number", Utc::now())
            .unwrap();
        assert_eq!(d.status(), DisputeStatus::EvidenceRequested);
        assert!(!d.awaiting_assessment());

        d.resume_review("operator:ops", Utc::now()).unwrap();
        assert_eq!(d.status(), DisputeStatus::Reviewing);
        assert!(d.awaiting_assessment());
    }

    #[test]
    fn split_award_recorded_once() {
        let mut d = reviewing();
        let mut a = assessment(Verdict::ResolvedSplit, 0.8);
        a.compensation_amount = Some(amt(25));
        d.apply_assessment(&a, 0.75, amt(100), amt(1), Utc::now())
            .unwrap();
        let award = d.award.unwrap();
        assert_eq!(award.buyer_refund, amt(25));
        assert_eq!(award.seller_release, amt(74));
        assert!(d.resolution_detail.as_deref().unwrap().contains("25%"));
    }

    #[test]
    fn close_requires_verdict() {
        let mut d = reviewing();
        assert!(d.close(Utc::now()).is_err());
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&DisputeStatus::EvidenceRequested).unwrap();
        assert_eq!(json, "\"EVIDENCE_REQUESTED\"");
        for s in [DisputeStatus::Opened, DisputeStatus::Closed] {
            assert_eq!(
                serde_json::to_string(&s).unwrap(),
                format!("\"{}\"", s.as_str())
            );
        }
    }
}
