//! Fixed-point currency amounts.
//!
//! `Money` counts minor units (cents) in an `i64`. It never goes through
//! floating point: JSON carries it as a decimal string (`"5.00"`), the
//! database as `BIGINT`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_neg(self) -> Option<Money> {
        self.0.checked_neg().map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid money amount {input:?}: {reason}")]
pub struct ParseMoneyError {
    input: String,
    reason: &'static str,
}

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Parse `"5"`, `"5.5"`, `"5.50"` or `"-4.00"`. More than two fraction
    /// digits is rejected rather than rounded.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseMoneyError {
            input: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(err("expected digits before the decimal point"));
        }
        if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err("at most two fraction digits are allowed"));
        }
        let whole: i64 = whole.parse().map_err(|_| err("amount too large"))?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| err("bad fraction"))? * 10,
            _ => frac.parse::<i64>().map_err(|_| err("bad fraction"))?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(|| err("amount too large"))?;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_pads_cents() {
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-400).to_string(), "-4.00");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn parse_accepts_common_forms() {
        assert_eq!("5".parse::<Money>().unwrap(), Money::from_cents(500));
        assert_eq!("5.5".parse::<Money>().unwrap(), Money::from_cents(550));
        assert_eq!("0.75".parse::<Money>().unwrap(), Money::from_cents(75));
        assert_eq!(" 12.30 ".parse::<Money>().unwrap(), Money::from_cents(1230));
        assert_eq!("-4.00".parse::<Money>().unwrap(), Money::from_cents(-400));
    }

    #[test]
    fn parse_rejects_sub_cent_and_garbage() {
        for bad in ["1.005", "abc", "", ".50", "1.2x", "1e3", "--1"] {
            assert!(bad.parse::<Money>().is_err(), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn parse_rejects_overflow() {
        assert!("999999999999999999999".parse::<Money>().is_err());
        assert!("92233720368547758.08".parse::<Money>().is_err());
    }

    #[test]
    fn json_uses_decimal_strings() {
        let json = serde_json::to_string(&Money::from_cents(1999)).unwrap();
        assert_eq!(json, "\"19.99\"");
        let back: Money = serde_json::from_str("\"19.99\"").unwrap();
        assert_eq!(back, Money::from_cents(1999));
        assert!(serde_json::from_str::<Money>("19.99").is_err());
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        assert!(Money::from_cents(i64::MAX)
            .checked_add(Money::from_cents(1))
            .is_none());
        assert_eq!(
            Money::from_cents(1000).checked_sub(Money::from_cents(400)),
            Some(Money::from_cents(600))
        );
    }
}
