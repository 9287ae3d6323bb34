//! Engine configuration.
//!
//! Parsed once at startup from environment variables. Every variable has a
//! default; a variable that is set but malformed is a [`ConfigError`], never
//! silently replaced by the default.

use std::time::Duration;

use escrow_reputation::ReputationPolicy;
use escrow_state::ReviewWindows;

/// Retry behavior for collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// First backoff delay; doubles per retry.
    pub base_delay: Duration,
    /// Bound on each individual attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Automated assessments below this confidence escalate.
    pub confidence_threshold: f64,
    /// Escrow fee in basis points of the amount.
    pub fee_bps: u32,
    /// Collaborator timeout and backoff.
    pub retry: RetryPolicy,
    /// Auto-verify / auto-release windows.
    pub review_windows: ReviewWindows,
    /// Period of the background sweep.
    pub sweep_interval: Duration,
    /// Reputation thresholds.
    pub reputation: ReputationPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.75,
            fee_bps: 100,
            retry: RetryPolicy::default(),
            review_windows: ReviewWindows {
                auto_verify: Some(chrono::Duration::days(7)),
                auto_release: Some(chrono::Duration::days(3)),
            },
            sweep_interval: Duration::from_secs(60),
            reputation: ReputationPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `ESCROW_CONFIDENCE_THRESHOLD` (default: 0.75)
    /// - `ESCROW_FEE_BPS` (default: 100)
    /// - `ESCROW_COLLABORATOR_TIMEOUT_MS` (default: 5000)
    /// - `ESCROW_RETRY_MAX` (default: 3)
    /// - `ESCROW_RETRY_BASE_MS` (default: 200)
    /// - `ESCROW_AUTO_VERIFY_SECS` (default: 7 days; 0 disables)
    /// - `ESCROW_AUTO_RELEASE_SECS` (default: 3 days; 0 disables)
    /// - `ESCROW_SWEEP_INTERVAL_SECS` (default: 60)
    /// - `ESCROW_STRIKE_THRESHOLD` (default: 3)
    /// - `ESCROW_COOLDOWN_SECS` (default: 86400)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |var: &'static str| lookup(var).map(|raw| (var, raw.trim().to_string()));

        let confidence_threshold = match get("ESCROW_CONFIDENCE_THRESHOLD") {
            Some((var, raw)) => {
                let value: f64 = parse(var, &raw)?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigError::invalid(var, &raw, "must be within [0, 1]"));
                }
                value
            }
            None => defaults.confidence_threshold,
        };

        let fee_bps = match get("ESCROW_FEE_BPS") {
            Some((var, raw)) => {
                let value: u32 = parse(var, &raw)?;
                if value > 10_000 {
                    return Err(ConfigError::invalid(var, &raw, "must not exceed 10000"));
                }
                value
            }
            None => defaults.fee_bps,
        };

        let timeout = match get("ESCROW_COLLABORATOR_TIMEOUT_MS") {
            Some((var, raw)) => {
                let ms: u64 = parse(var, &raw)?;
                if ms == 0 {
                    return Err(ConfigError::invalid(var, &raw, "must be positive"));
                }
                Duration::from_millis(ms)
            }
            None => defaults.retry.timeout,
        };

        let max_retries = match get("ESCROW_RETRY_MAX") {
            Some((var, raw)) => {
                let value: u32 = parse(var, &raw)?;
                if value > 10 {
                    return Err(ConfigError::invalid(var, &raw, "must not exceed 10"));
                }
                value
            }
            None => defaults.retry.max_retries,
        };

        let base_delay = match get("ESCROW_RETRY_BASE_MS") {
            Some((var, raw)) => Duration::from_millis(parse(var, &raw)?),
            None => defaults.retry.base_delay,
        };

        let auto_verify = match get("ESCROW_AUTO_VERIFY_SECS") {
            Some((var, raw)) => window(var, &raw)?,
            None => defaults.review_windows.auto_verify,
        };

        let auto_release = match get("ESCROW_AUTO_RELEASE_SECS") {
            Some((var, raw)) => window(var, &raw)?,
            None => defaults.review_windows.auto_release,
        };

        let sweep_interval = match get("ESCROW_SWEEP_INTERVAL_SECS") {
            Some((var, raw)) => {
                let secs: u64 = parse(var, &raw)?;
                if secs == 0 {
                    return Err(ConfigError::invalid(var, &raw, "must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => defaults.sweep_interval,
        };

        let mut reputation = defaults.reputation;
        if let Some((var, raw)) = get("ESCROW_STRIKE_THRESHOLD") {
            reputation.strike_threshold = parse(var, &raw)?;
        }
        if let Some((var, raw)) = get("ESCROW_COOLDOWN_SECS") {
            let secs: i64 = parse(var, &raw)?;
            reputation.cooldown_base = chrono::Duration::try_seconds(secs)
                .ok_or_else(|| ConfigError::invalid(var, &raw, "out of range"))?;
        }
        reputation
            .validate()
            .map_err(|e| ConfigError::Policy(e.to_string()))?;

        Ok(Self {
            confidence_threshold,
            fee_bps,
            retry: RetryPolicy {
                max_retries,
                base_delay,
                timeout,
            },
            review_windows: ReviewWindows {
                auto_verify,
                auto_release,
            },
            sweep_interval,
            reputation,
        })
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::invalid(var, raw, &e.to_string()))
}

fn window(var: &'static str, raw: &str) -> Result<Option<chrono::Duration>, ConfigError> {
    let secs: i64 = parse(var, raw)?;
    match secs {
        0 => Ok(None),
        s if s < 0 => Err(ConfigError::invalid(var, raw, "must not be negative")),
        s => chrono::Duration::try_seconds(s)
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(var, raw, "out of range")),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid reputation policy: {0}")]
    Policy(String),
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: &str) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(load(&[]).unwrap(), EngineConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            ("ESCROW_CONFIDENCE_THRESHOLD", "0.9"),
            ("ESCROW_FEE_BPS", "250"),
            ("ESCROW_RETRY_MAX", "0"),
            ("ESCROW_AUTO_VERIFY_SECS", "0"),
            ("ESCROW_AUTO_RELEASE_SECS", "60"),
            ("ESCROW_STRIKE_THRESHOLD", "5"),
        ])
        .unwrap();
        assert_eq!(cfg.confidence_threshold, 0.9);
        assert_eq!(cfg.fee_bps, 250);
        assert_eq!(cfg.retry.max_retries, 0);
        assert_eq!(cfg.review_windows.auto_verify, None);
        assert_eq!(
            cfg.review_windows.auto_release,
            Some(chrono::Duration::seconds(60))
        );
        assert_eq!(cfg.reputation.strike_threshold, 5);
    }

    #[test]
    fn malformed_values_are_errors() {
        assert!(load(&[("ESCROW_FEE_BPS", "lots")]).is_err());
        assert!(load(&[("ESCROW_CONFIDENCE_THRESHOLD", "1.5")]).is_err());
        assert!(load(&[("ESCROW_SWEEP_INTERVAL_SECS", "0")]).is_err());
        assert!(load(&[("ESCROW_AUTO_VERIFY_SECS", "-5")]).is_err());
        assert!(matches!(
            load(&[("ESCROW_STRIKE_THRESHOLD", "0")]),
            Err(ConfigError::Policy(_))
        ));
    }
}
