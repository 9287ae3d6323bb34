//! # Fixed-Point Amounts
//!
//! Escrowed value is represented as [`Amount`], a non-negative
//! `rust_decimal::Decimal`. Floating point never appears on any path that
//! touches money: ratios used for split awards are computed in decimal and
//! rounded explicitly.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Decimal places kept when deriving an amount (fees, split shares).
pub const AMOUNT_SCALE: u32 = 8;

/// A non-negative fixed-point amount of some token.
///
/// Serializes as a decimal string (e.g. `"100.50"`) so no precision is lost
/// in transit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// The zero amount.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Create an amount from a decimal.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NegativeAmount`] if `value` is negative.
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValidationError::NegativeAmount(value.to_string()));
        }
        Ok(Self(value.normalize()))
    }

    /// Parse an amount from its decimal string form.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidAmount`] for non-numeric input and
    /// [`ValidationError::NegativeAmount`] for negative values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| ValidationError::InvalidAmount(s.to_string()))?;
        Self::new(value)
    }

    /// Amount from an integer number of whole units.
    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    /// The underlying decimal.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Whether the amount is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Whether the amount is strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        !self.0.is_zero()
    }

    /// Subtract, returning `None` if the result would be negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        let diff = self.0.checked_sub(other.0)?;
        if diff.is_sign_negative() && !diff.is_zero() {
            None
        } else {
            Some(Amount(diff.normalize()))
        }
    }

    /// The smaller of two amounts.
    pub fn min(self, other: Amount) -> Amount {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// `self × basis_points / 10_000`, rounded half-even to [`AMOUNT_SCALE`].
    pub fn basis_points(self, bps: u32) -> Amount {
        let scaled = self.0 * Decimal::from(bps) / Decimal::from(10_000u32);
        Amount(round(scaled))
    }

    /// `self` as a percentage of `whole`, rounded to two decimal places.
    /// Returns zero when `whole` is zero.
    pub fn percent_of(self, whole: Amount) -> Decimal {
        if whole.is_zero() {
            return Decimal::ZERO;
        }
        (self.0 * Decimal::ONE_HUNDRED / whole.0)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
            .normalize()
    }
}

fn round(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointNearestEven)
        .normalize()
}

impl TryFrom<Decimal> for Amount {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_accepts_decimal_strings() {
        assert_eq!(Amount::parse("100").unwrap(), Amount::from_units(100));
        assert_eq!(Amount::parse(" 25.50 ").unwrap().to_string(), "25.5");
        assert!(Amount::parse("0").unwrap().is_zero());
    }

    #[test]
    fn parse_rejects_garbage_and_negatives() {
        assert!(matches!(
            Amount::parse("abc"),
            Err(ValidationError::InvalidAmount(_))
        ));
        assert!(matches!(
            Amount::parse("-1"),
            Err(ValidationError::NegativeAmount(_))
        ));
    }

    #[test]
    fn checked_sub_refuses_to_go_negative() {
        let a = Amount::from_units(10);
        let b = Amount::from_units(4);
        assert_eq!(a.checked_sub(b), Some(Amount::from_units(6)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(a.checked_sub(a), Some(Amount::ZERO));
    }

    #[test]
    fn basis_points_fee() {
        let amount = Amount::from_units(100);
        assert_eq!(amount.basis_points(100), Amount::from_units(1));
        assert_eq!(amount.basis_points(0), Amount::ZERO);
        assert_eq!(
            Amount::parse("0.00000001").unwrap().basis_points(100),
            Amount::ZERO
        );
    }

    #[test]
    fn percent_of_whole() {
        let part = Amount::from_units(30);
        let whole = Amount::from_units(100);
        assert_eq!(part.percent_of(whole), Decimal::from(30));
        assert_eq!(
            Amount::from_units(1).percent_of(Amount::from_units(3)),
            Decimal::from_str("33.33").unwrap()
        );
        assert_eq!(part.percent_of(Amount::ZERO), Decimal::ZERO);
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Amount::parse("12.34").unwrap()).unwrap();
        assert_eq!(json, "\"12.34\"");
        let back: Amount = serde_json::from_str("\"12.34\"").unwrap();
        assert_eq!(back, Amount::parse("12.34").unwrap());
    }

    #[test]
    fn deserialization_rejects_negative() {
        let result: Result<Amount, _> = serde_json::from_str("\"-3\"");
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn fee_never_exceeds_amount(units in 0u64..1_000_000_000, bps in 0u32..=10_000) {
            let amount = Amount::from_units(units);
            prop_assert!(amount.basis_points(bps) <= amount);
        }
    }
}
