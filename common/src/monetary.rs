//! Monetary types for the walletd ledger.

use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

/// An exact decimal monetary amount.
///
/// Amounts never pass through binary floating point. Rendering for display or
/// the wire always uses [`Amount::SCALE`] fractional digits, matching the
/// `NUMERIC(20, 4)` columns the store keeps balances in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(Decimal);

impl Amount {
    /// Fixed number of fractional digits used for storage and the wire.
    pub const SCALE: u32 = 4;

    /// Maximum number of integer digits the store can hold.
    pub const INTEGER_DIGITS: u32 = 16;

    /// The zero amount.
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    /// Wrap an existing decimal.
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Build an amount from whole units.
    pub fn from_units(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Get the underlying decimal.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Check if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Add two amounts, returning `None` on decimal overflow.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Subtract two amounts, returning `None` on decimal overflow.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Render with exactly [`Amount::SCALE`] fractional digits.
    pub fn to_fixed_string(&self) -> String {
        let mut value = self.0.round_dp(Self::SCALE);
        value.rescale(Self::SCALE);
        value.to_string()
    }

    /// Parse a decimal string without rounding.
    ///
    /// Values with more than [`Amount::SCALE`] significant fractional digits,
    /// or more integer digits than the store holds, are rejected.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let trimmed = input.trim();
        let value = Decimal::from_str(trimmed)
            .map_err(|_| AmountError::Malformed(trimmed.to_string()))?;
        Self::checked(value)
    }

    /// Validate that a decimal fits the store's fixed scale and precision.
    pub fn checked(value: Decimal) -> Result<Self, AmountError> {
        if value.normalize().scale() > Self::SCALE {
            return Err(AmountError::TooPrecise {
                value: value.to_string(),
                max_scale: Self::SCALE,
            });
        }

        let limit = Decimal::from(10_i64.pow(Self::INTEGER_DIGITS));
        if value.abs() >= limit {
            return Err(AmountError::OutOfRange(value.to_string()));
        }

        Ok(Self(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_fixed_string())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0 + other.0)
    }
}

impl Sub for Amount {
    type Output = Amount;

    fn sub(self, other: Amount) -> Amount {
        Amount(self.0 - other.0)
    }
}

impl Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, other: Amount) {
        self.0 += other.0;
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, other: Amount) {
        self.0 -= other.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, amount| acc + amount)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_fixed_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal amount string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        Amount::parse(v).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        Amount::checked(Decimal::from(v)).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        Amount::checked(Decimal::from(v)).map_err(E::custom)
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Amount, E> {
        Err(E::custom(
            "fractional amounts must be sent as decimal strings",
        ))
    }
}

/// Errors produced when parsing or validating an [`Amount`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Not a decimal number.
    #[error("invalid decimal amount: {0:?}")]
    Malformed(String),

    /// More fractional digits than the store keeps.
    #[error("amount {value} has more than {max_scale} fractional digits")]
    TooPrecise { value: String, max_scale: u32 },

    /// Too many integer digits for the store.
    #[error("amount {0} is out of range")]
    OutOfRange(String),
}

/// A currency code.
///
/// Codes are compared exactly and case-sensitively; no normalization is
/// applied, so `"usd"` and `"USD"` are different currencies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Longest accepted code.
    pub const MAX_LEN: usize = 16;

    /// Create a currency from a code, as-is.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Create a currency, rejecting malformed codes.
    pub fn parse(code: &str) -> Result<Self, CurrencyError> {
        let currency = Self::new(code);
        if currency.is_valid() {
            Ok(currency)
        } else {
            Err(CurrencyError(code.to_string()))
        }
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Non-empty, bounded, ASCII alphanumeric.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= Self::MAX_LEN
            && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Malformed currency code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid currency code: {0:?}")]
pub struct CurrencyError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_arithmetic() {
        let a = Amount::parse("500.00").unwrap();
        let b = Amount::parse("150.00").unwrap();

        assert_eq!(a - b, Amount::new(dec!(350)));
        assert_eq!(a + b, Amount::new(dec!(650)));
        assert_eq!(-b, Amount::new(dec!(-150)));
        assert!(b < a);
        assert!((-b).is_negative());
    }

    #[test]
    fn test_fixed_scale_rendering() {
        assert_eq!(Amount::new(dec!(550)).to_fixed_string(), "550.0000");
        assert_eq!(Amount::new(dec!(0.1)).to_fixed_string(), "0.1000");
        assert_eq!(Amount::ZERO.to_string(), "0.0000");
    }

    #[test]
    fn test_parse_rejects_extra_precision() {
        assert!(matches!(
            Amount::parse("1.00001"),
            Err(AmountError::TooPrecise { .. })
        ));
        // Trailing zeros beyond the scale are not significant.
        assert_eq!(Amount::parse("1.50000").unwrap(), Amount::new(dec!(1.5)));
        assert!(matches!(Amount::parse("abc"), Err(AmountError::Malformed(_))));
        assert!(matches!(
            Amount::parse("10000000000000000"),
            Err(AmountError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_repeated_tenths_do_not_drift() {
        let tenth = Amount::parse("0.1").unwrap();
        let total: Amount = std::iter::repeat(tenth).take(1000).sum();
        assert_eq!(total, Amount::from_units(100));
    }

    #[test]
    fn test_amount_serde() {
        let json = serde_json::to_string(&Amount::new(dec!(50))).unwrap();
        assert_eq!(json, "\"50.0000\"");

        let parsed: Amount = serde_json::from_str("\"12.3400\"").unwrap();
        assert_eq!(parsed, Amount::new(dec!(12.34)));

        let whole: Amount = serde_json::from_str("7").unwrap();
        assert_eq!(whole, Amount::from_units(7));

        assert!(serde_json::from_str::<Amount>("0.1").is_err());
    }

    #[test]
    fn test_currency_is_case_sensitive() {
        assert_ne!(Currency::new("usd"), Currency::usd());
        assert_eq!(Currency::new("USD"), Currency::usd());
        assert_eq!(Currency::new("usd").code(), "usd");
    }

    #[test]
    fn test_currency_validation() {
        assert!(Currency::parse("USD").is_ok());
        assert!(Currency::parse("FIAT").is_ok());
        assert!(Currency::parse("").is_err());
        assert!(Currency::parse("US D").is_err());
        assert!(Currency::parse("ABCDEFGHIJKLMNOPQ").is_err());
    }
}
