//! # Scoring
//!
//! `overall = 0.8 × (positive + 1) / (positive + negative + 2)
//!          + 0.2 × transactions / (transactions + 10)`
//!
//! The first term is a Laplace-smoothed approval ratio, so a user with no
//! ratings starts at 0.5 rather than 0 or 1. The second term rewards volume
//! with diminishing returns. The result is a pure function of the counters.

const RATING_WEIGHT: f64 = 0.8;
const VOLUME_WEIGHT: f64 = 0.2;
const VOLUME_HALF_POINT: f64 = 10.0;

/// Deterministic overall score in `[0, 1]`.
pub fn overall_score(positive: u64, negative: u64, transactions: u64) -> f64 {
    let positive = positive as f64;
    let negative = negative as f64;
    let transactions = transactions as f64;
    let approval = (positive + 1.0) / (positive + negative + 2.0);
    let volume = transactions / (transactions + VOLUME_HALF_POINT);
    (RATING_WEIGHT * approval + VOLUME_WEIGHT * volume).clamp(0.0, 1.0)
}
