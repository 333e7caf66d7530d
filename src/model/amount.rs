//! Amount type for monetary values as they appear on bank statements.
//!
//! Statement text is messy: `₹1,234.50`, `Rs. 500`, `1,234.50 Dr`, `(200.00)`. `Amount` parses all
//! of these into a `Decimal` and always writes itself back out in a single canonical form.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

/// Currency markers that are stripped from the front of an amount before parsing.
const CURRENCY_PREFIXES: &[&str] = &["INR", "Rs.", "Rs", "₹", "$"];

/// Debit/credit markers that some statements print after the number.
const DIRECTION_SUFFIXES: &[&str] = &["Dr.", "Dr", "Cr.", "Cr"];

/// A signed monetary amount.
///
/// Serializes as a plain decimal string (`"-1234.50"`) so that checkpoints round-trip exactly.
/// `Display` uses thousands separators and two decimal places (`-1,234.50`).
///
/// ```
/// # use budget_sync::model::Amount;
/// # use std::str::FromStr;
/// let amount = Amount::from_str("₹1,234.50 Dr").unwrap();
/// assert_eq!(amount.to_string(), "1,234.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount {
    value: Decimal,
}

impl Amount {
    pub const ZERO: Amount = Amount {
        value: Decimal::ZERO,
    };

    pub const fn new(value: Decimal) -> Self {
        Self { value }
    }

    /// Returns the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.value
    }

    pub fn abs(&self) -> Amount {
        Amount::new(self.value.abs())
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.value.is_zero()
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        !self.is_zero() && self.value.is_sign_negative()
    }

    /// The canonical text form used for serialization and for spreadsheet cells, e.g. `-1234.50`.
    pub fn plain(&self) -> String {
        self.value.round_dp(2).to_string()
    }
}

/// An error that can occur when parsing strings into `Amount` values.
pub struct AmountError {
    input: String,
    inner: rust_decimal::Error,
}

impl Debug for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AmountError({:?}, {:?})", self.input, self.inner)
    }
}

impl Display for AmountError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' is not an amount: {}", self.input, self.inner)
    }
}

impl Error for AmountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.inner)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut text = s.trim();
        if text.is_empty() {
            return Ok(Amount::ZERO);
        }

        // Accounting style negatives: (200.00)
        let mut negative = false;
        if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            negative = true;
            text = inner.trim();
        }
        if let Some(rest) = text.strip_prefix('-') {
            negative = !negative;
            text = rest.trim();
        }
        for prefix in CURRENCY_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim();
                break;
            }
        }
        // A sign can also come after the currency marker: ₹-50.00
        if let Some(rest) = text.strip_prefix('-') {
            negative = !negative;
            text = rest.trim();
        }
        for suffix in DIRECTION_SUFFIXES {
            let lower = text.to_ascii_lowercase();
            if lower.ends_with(&suffix.to_ascii_lowercase()) {
                text = text[..text.len() - suffix.len()].trim();
                break;
            }
        }

        let digits: String = text.chars().filter(|c| *c != ',' && *c != ' ').collect();
        let value = Decimal::from_str(&digits).map_err(|inner| AmountError {
            input: s.to_string(),
            inner,
        })?;
        Ok(Amount::new(if negative { -value } else { value }))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.is_negative() { "-" } else { "" };
        let num = self.value.abs().to_f64().unwrap_or_default();
        write!(f, "{sign}{}", format_num::format_num!(",.2", num))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.value.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Accepts strings (`"₹1,200.00"`) as well as JSON numbers, which is what language models tend to
/// return.
struct AmountVisitor;

impl<'de> Visitor<'de> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("an amount as a string or a number")
    }

    fn visit_str<E: DeError>(self, v: &str) -> Result<Self::Value, E> {
        Amount::from_str(v).map_err(E::custom)
    }

    fn visit_i64<E: DeError>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Amount::new(Decimal::from(v)))
    }

    fn visit_u64<E: DeError>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Amount::new(Decimal::from(v)))
    }

    fn visit_f64<E: DeError>(self, v: f64) -> Result<Self::Value, E> {
        // Going through the shortest decimal text avoids binary noise like 0.1000000000000000055.
        Amount::from_str(&v.to_string()).map_err(E::custom)
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_plain() {
        assert_eq!(dec("50.00"), Amount::from_str("50.00").unwrap().value());
        assert_eq!(dec("-50.00"), Amount::from_str("-50.00").unwrap().value());
    }

    #[test]
    fn test_parse_currency_prefixes() {
        assert_eq!(dec("1234.50"), Amount::from_str("₹1,234.50").unwrap().value());
        assert_eq!(dec("500"), Amount::from_str("Rs. 500").unwrap().value());
        assert_eq!(dec("75.25"), Amount::from_str("INR 75.25").unwrap().value());
        assert_eq!(dec("-9.99"), Amount::from_str("-$9.99").unwrap().value());
        assert_eq!(dec("-9.99"), Amount::from_str("₹-9.99").unwrap().value());
    }

    #[test]
    fn test_parse_direction_suffix() {
        assert_eq!(dec("1234.50"), Amount::from_str("1,234.50 Dr").unwrap().value());
        assert_eq!(dec("20"), Amount::from_str("20.00 CR").unwrap().value());
    }

    #[test]
    fn test_parse_parentheses() {
        assert_eq!(dec("-200.00"), Amount::from_str("(200.00)").unwrap().value());
    }

    #[test]
    fn test_parse_empty_is_zero() {
        assert!(Amount::from_str("   ").unwrap().is_zero());
    }

    #[test]
    fn test_parse_garbage() {
        let err = Amount::from_str("twelve").unwrap_err();
        assert!(err.to_string().contains("'twelve' is not an amount"));
    }

    #[test]
    fn test_display() {
        assert_eq!("1,234.50", Amount::new(dec("1234.5")).to_string());
        assert_eq!("-60,000.00", Amount::new(dec("-60000")).to_string());
        assert_eq!("0.00", Amount::ZERO.to_string());
    }

    #[test]
    fn test_plain() {
        assert_eq!("-1234.50", Amount::new(dec("-1234.50")).plain());
        assert_eq!("3.33", Amount::new(dec("3.333")).plain());
    }

    #[test]
    fn test_serde_string_is_exact() {
        let amount = Amount::new(dec("-1234.567"));
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!("\"-1234.567\"", json);
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(amount, back);
    }

    #[test]
    fn test_deserialize_numbers() {
        let a: Amount = serde_json::from_str("1200").unwrap();
        assert_eq!(dec("1200"), a.value());
        let b: Amount = serde_json::from_str("0.1").unwrap();
        assert_eq!(dec("0.1"), b.value());
        let c: Amount = serde_json::from_str("\"₹1,200.00\"").unwrap();
        assert_eq!(dec("1200.00"), c.value());
    }
}
