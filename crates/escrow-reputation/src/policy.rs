//! # Reputation Policy
//!
//! Thresholds that turn counters into trust levels and strikes into
//! cooldowns. Loaded from the environment by `escrow-engine`'s config.

use chrono::Duration;

use crate::error::ReputationError;

/// Scoring and gating thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReputationPolicy {
    /// Strike count at which a user becomes `flagged`.
    pub strike_threshold: u32,
    /// Cooldown applied at the threshold; doubles with each further strike.
    pub cooldown_base: Duration,
    /// Upper bound on any single cooldown.
    pub cooldown_cap: Duration,
    /// Minimum transactions for `elite`.
    pub elite_min_transactions: u64,
    /// Minimum score for `elite`.
    pub elite_min_score: f64,
    /// Minimum transactions for `verified`.
    pub verified_min_transactions: u64,
    /// Minimum transactions for `trusted`.
    pub trusted_min_transactions: u64,
    /// Minimum score for `trusted`.
    pub trusted_min_score: f64,
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        Self {
            strike_threshold: 3,
            cooldown_base: Duration::seconds(86_400),
            cooldown_cap: Duration::days(30),
            elite_min_transactions: 50,
            elite_min_score: 0.85,
            verified_min_transactions: 10,
            trusted_min_transactions: 5,
            trusted_min_score: 0.6,
        }
    }
}

impl ReputationPolicy {
    /// Check that thresholds are internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ReputationError::InvalidPolicy`] for a zero strike threshold,
    /// a negative cooldown, a cap below the base, or scores outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ReputationError> {
        if self.strike_threshold == 0 {
            return Err(ReputationError::InvalidPolicy(
                "strike_threshold must be at least 1".into(),
            ));
        }
        if self.cooldown_base < Duration::zero() {
            return Err(ReputationError::InvalidPolicy(
                "cooldown_base must not be negative".into(),
            ));
        }
        if self.cooldown_cap < self.cooldown_base {
            return Err(ReputationError::InvalidPolicy(
                "cooldown_cap must be at least cooldown_base".into(),
            ));
        }
        for (name, score) in [
            ("elite_min_score", self.elite_min_score),
            ("trusted_min_score", self.trusted_min_score),
        ] {
            if !(0.0..=1.0).contains(&score) {
                return Err(ReputationError::InvalidPolicy(format!(
                    "{name} must be within [0, 1], got {score}"
                )));
            }
        }
        Ok(())
    }

    /// Cooldown for a user holding `strikes`, or `None` below the threshold.
    ///
    /// `base × 2^(strikes − threshold)`, capped at `cooldown_cap`.
    pub fn cooldown_for(&self, strikes: u32) -> Option<Duration> {
        let excess = strikes.checked_sub(self.strike_threshold)?;
        let cooldown = 2i32
            .checked_pow(excess)
            .and_then(|factor| self.cooldown_base.checked_mul(factor))
            .unwrap_or(self.cooldown_cap);
        Some(cooldown.min(self.cooldown_cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        assert!(ReputationPolicy::default().validate().is_ok());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let policy = ReputationPolicy {
            strike_threshold: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn cooldown_doubles_and_caps() {
        let policy = ReputationPolicy::default();
        assert_eq!(policy.cooldown_for(2), None);
        assert_eq!(policy.cooldown_for(3), Some(Duration::days(1)));
        assert_eq!(policy.cooldown_for(4), Some(Duration::days(2)));
        assert_eq!(policy.cooldown_for(5), Some(Duration::days(4)));
        assert_eq!(policy.cooldown_for(9), Some(Duration::days(30)));
        assert_eq!(policy.cooldown_for(200), Some(Duration::days(30)));
    }
}
