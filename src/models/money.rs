// models/money.rs
//
// KES amounts as integer minor units (cents). All arithmetic on money runs
// on the integer representation; floats only appear at the JSON boundary.
use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(cents: i64) -> Self {
        Money(cents)
    }

    pub fn from_major(units: i64) -> Self {
        Money(units * 100)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    // Whole-KES amount, rounded half up. Daraja only accepts whole units.
    pub fn major_rounded(self) -> i64 {
        (self.0 + 50) / 100
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl FromStr for Money {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.starts_with('-') {
            return Err(format!("invalid amount: {:?}", s));
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("invalid amount: {:?}", s));
        }
        if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("amount has more than 2 decimal places: {:?}", s));
        }

        let units: i64 = whole.parse().map_err(|_| format!("amount out of range: {:?}", s))?;
        let cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| "bad fraction".to_string())? * 10,
            _ => frac.parse::<i64>().map_err(|_| "bad fraction".to_string())?,
        };

        units
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .map(Money)
            .ok_or_else(|| format!("amount out of range: {:?}", s))
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct MoneyVisitor;

impl<'de> Visitor<'de> for MoneyVisitor {
    type Value = Money;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a decimal money string or number with at most 2 decimal places")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
        v.parse().map_err(de::Error::custom)
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
        if !v.is_finite() || v < 0.0 {
            return Err(de::Error::custom(format!("invalid amount: {}", v)));
        }
        Ok(Money((v * 100.0).round() as i64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
        Ok(Money::from_major(v as i64))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
        if v < 0 {
            return Err(de::Error::custom(format!("invalid amount: {}", v)));
        }
        Ok(Money::from_major(v))
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Money, D::Error> {
        deserializer.deserialize_any(MoneyVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("1500".parse::<Money>().unwrap(), Money::from_minor(150_000));
        assert_eq!("1500.5".parse::<Money>().unwrap(), Money::from_minor(150_050));
        assert_eq!("1500.55".parse::<Money>().unwrap(), Money::from_minor(150_055));
        assert_eq!("0.01".parse::<Money>().unwrap(), Money::from_minor(1));
    }

    #[test]
    fn rejects_bad_amounts() {
        assert!("".parse::<Money>().is_err());
        assert!("-3".parse::<Money>().is_err());
        assert!("15.555".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!(".50".parse::<Money>().is_err());
    }

    #[test]
    fn displays_two_decimals() {
        assert_eq!(Money::from_minor(150_050).to_string(), "1500.50");
        assert_eq!(Money::from_major(2000).to_string(), "2000.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
    }

    #[test]
    fn deserializes_from_string_and_number() {
        assert_eq!(
            serde_json::from_str::<Money>("\"1500.00\"").unwrap(),
            Money::from_major(1500)
        );
        assert_eq!(serde_json::from_str::<Money>("1500").unwrap(), Money::from_major(1500));
        assert_eq!(
            serde_json::from_str::<Money>("1500.5").unwrap(),
            Money::from_minor(150_050)
        );
        assert!(serde_json::from_str::<Money>("-1").is_err());
    }

    #[test]
    fn rounds_to_whole_units_for_daraja() {
        assert_eq!(Money::from_minor(150_050).major_rounded(), 1501);
        assert_eq!(Money::from_minor(150_049).major_rounded(), 1500);
    }

    // Sum of paid amounts in minor units must match the naive float sum
    // rounded to 2 decimals, for any inputs with at most 2 decimal places.
    #[test]
    fn minor_unit_sums_match_rounded_float_sums() {
        let cases: &[&[&str]] = &[
            &["0.10", "0.20", "0.30"],
            &["1500.00", "2300.55", "980.45", "12.99"],
            &["0.01"; 100],
            &["19999.99", "0.02", "345.67"],
        ];

        for amounts in cases {
            let parsed: Vec<Money> = amounts.iter().map(|a| a.parse().unwrap()).collect();
            let minor_sum: Money = parsed.iter().copied().sum();

            let float_sum: f64 = amounts.iter().map(|a| a.parse::<f64>().unwrap()).sum();
            let float_rounded = (float_sum * 100.0).round() as i64;

            assert_eq!(minor_sum.minor(), float_rounded, "inputs: {:?}", amounts);
        }
    }
}
