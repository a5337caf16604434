//! Money types with precise decimal arithmetic
//!
//! Billing is single-currency (GBP). Amounts are held as `rust_decimal`
//! values and rounded to whole pence at every pricing step, using half-up
//! rounding so that penny totals match what the invoicing screens show.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};
use thiserror::Error;

/// Decimal places used for pence
pub const PENCE_DP: u32 = 2;

/// Rounds a decimal to whole pence, midpoints away from zero
pub fn round_pence(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PENCE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Overflow during calculation")]
    Overflow,
}

/// A monetary amount in pounds sterling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Creates a Money value without rounding
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates a Money value rounded to whole pence
    pub fn pounds(amount: Decimal) -> Self {
        Self(round_pence(amount))
    }

    /// Creates Money from an integer number of pence
    pub fn from_pence(pence: i64) -> Self {
        Self(Decimal::new(pence, PENCE_DP))
    }

    /// Parses an amount such as `"500.00"`
    pub fn parse(raw: &str) -> Result<Self, MoneyError> {
        raw.trim()
            .parse::<Decimal>()
            .map(Self::pounds)
            .map_err(|_| MoneyError::InvalidAmount(raw.to_string()))
    }

    /// Returns the amount
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns the amount rounded to whole pence
    pub fn round_pence(&self) -> Self {
        Self(round_pence(self.0))
    }

    /// Prices `quantity` units at this unit price, rounded to pence
    pub fn times(&self, quantity: Decimal) -> Self {
        Self(round_pence(self.0 * quantity))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Checked addition that reports overflow instead of panicking
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction that reports overflow instead of panicking
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Money)
            .ok_or(MoneyError::Overflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rounded = round_pence(self.0);
        if rounded.is_sign_negative() && !rounded.is_zero() {
            write!(f, "-£{:.2}", rounded.abs())
        } else {
            write!(f, "£{:.2}", rounded.abs())
        }
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + *m)
    }
}

/// A VAT rate expressed as a percentage (e.g. 20 for 20%)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VatRate(Decimal);

impl VatRate {
    /// VAT-exempt / zero-rated
    pub const ZERO: VatRate = VatRate(Decimal::ZERO);

    /// Creates a rate from a percentage (e.g. 20.0 for 20%)
    pub fn percent(percentage: Decimal) -> Self {
        Self(percentage.normalize())
    }

    /// UK standard rate
    pub fn standard() -> Self {
        Self(dec!(20))
    }

    /// Returns the rate as a percentage
    pub fn as_percentage(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// VAT due on a net amount, rounded to pence
    pub fn vat_on(&self, net: Money) -> Money {
        Money::pounds(net.amount() * self.0 / dec!(100))
    }

    /// Net amount plus VAT, rounded to pence
    pub fn gross(&self, net: Money) -> Money {
        Money::pounds(net.amount() + self.vat_on(net).amount())
    }
}

impl fmt::Display for VatRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn gross_equals_net_plus_vat(pence in 0i64..10_000_000i64, pct in 0u32..30u32) {
            let net = Money::from_pence(pence);
            let rate = VatRate::percent(Decimal::from(pct));
            prop_assert_eq!(rate.gross(net), net + rate.vat_on(net));
        }

        #[test]
        fn rounding_is_idempotent(mantissa in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..6u32) {
            let value = Decimal::new(mantissa, scale);
            prop_assert_eq!(round_pence(round_pence(value)), round_pence(value));
        }
    }
}
