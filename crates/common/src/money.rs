//! Decimal money amounts.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A money amount in the store's single currency.
///
/// Stored as a decimal with two fractional digits. Providers that speak in
/// minor units (tiyin, cents) go through [`Money::from_minor_units`] and
/// [`Money::to_minor_units`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Number of fractional digits carried by every amount.
    pub const SCALE: u32 = 2;

    /// Wraps a decimal, rounding it to two places.
    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp(Self::SCALE))
    }

    /// Creates an amount from minor currency units (`amount_major * 100`).
    pub fn from_minor_units(units: i64) -> Self {
        Self(Decimal::new(units, Self::SCALE))
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(Decimal::new(0, Self::SCALE))
    }

    /// Returns the amount as a decimal.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns the amount in minor currency units.
    ///
    /// Returns `None` if the value does not fit an `i64`.
    pub fn to_minor_units(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED).round().to_i64()
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Returns the absolute amount.
    pub fn abs(&self) -> Money {
        Money(self.0.abs())
    }

    /// Multiplies by a quantity.
    pub fn times(&self, quantity: u32) -> Money {
        Money(self.0 * Decimal::from(quantity))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::str::FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<Decimal>().map(Self::new)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_roundtrip() {
        let money = Money::from_minor_units(1_500_000);
        assert_eq!(money.amount(), dec!(15000.00));
        assert_eq!(money.to_minor_units(), Some(1_500_000));
    }

    #[test]
    fn new_rounds_to_two_places() {
        assert_eq!(Money::new(dec!(10.005)).amount(), dec!(10.00));
        assert_eq!(Money::new(dec!(10.015)).amount(), dec!(10.02));
    }

    #[test]
    fn equality_ignores_scale() {
        assert_eq!(Money::new(dec!(15)), Money::from_minor_units(1500));
    }

    #[test]
    fn display_uses_two_places() {
        assert_eq!(Money::new(dec!(12.5)).to_string(), "12.50");
        assert_eq!((-Money::new(dec!(3))).to_string(), "-3.00");
    }

    #[test]
    fn arithmetic() {
        let a = Money::new(dec!(10.00));
        let b = Money::new(dec!(2.50));
        assert_eq!((a + b).amount(), dec!(12.50));
        assert_eq!((a - b).amount(), dec!(7.50));
        assert_eq!(b.times(3).amount(), dec!(7.50));
        assert_eq!(vec![a, b, b].into_iter().sum::<Money>().amount(), dec!(15.00));
    }

    #[test]
    fn sign_predicates() {
        assert!(Money::new(dec!(1)).is_positive());
        assert!(Money::zero().is_zero());
        assert!(!Money::zero().is_positive());
        assert!((-Money::new(dec!(1))).is_negative());
        assert_eq!((-Money::new(dec!(4))).abs(), Money::new(dec!(4)));
    }

    #[test]
    fn deserializing_rounds_to_two_places() {
        let money: Money = serde_json::from_str("\"10.015\"").unwrap();
        assert_eq!(money.amount(), dec!(10.02));
        assert_eq!(money.amount().scale(), 2);
        assert_eq!(serde_json::to_string(&money).unwrap(), "\"10.02\"");
    }

    #[test]
    fn parses_decimal_strings() {
        let money: Money = " 1000.50 ".parse().unwrap();
        assert_eq!(money.amount(), dec!(1000.50));
        assert!("abc".parse::<Money>().is_err());
    }
}
