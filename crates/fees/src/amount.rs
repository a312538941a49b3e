use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::FeeError;

/// Decimal places of the native token.
pub const DECIMALS: u32 = 18;

const UNIT: u128 = 10u128.pow(DECIMALS);

/// Fixed-point scale applied to per-second rates and prices.
pub const RATE_SCALE: u128 = 10u128.pow(18);

/// A non-negative token amount in base units.
///
/// Serialized as a decimal string (`"0.00002"`) so JSON consumers never see
/// a lossy float.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_base_units(units: u128) -> Self {
        Self(units)
    }

    /// Whole tokens, for tests and fixtures.
    pub const fn from_tokens(tokens: u64) -> Self {
        Self(tokens as u128 * UNIT)
    }

    pub const fn base_units(self) -> u128 {
        self.0
    }

    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u128) -> Amount {
        Amount(self.0.saturating_mul(factor))
    }

    /// Scales by `percent / 100`, rounding up.
    pub fn mul_percent(self, percent: u32) -> Amount {
        let scaled = self.0.saturating_mul(percent as u128);
        Amount(scaled.div_ceil(100))
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        *self = self.saturating_add(rhs);
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / UNIT;
        let frac = self.0 % UNIT;
        if frac == 0 {
            return write!(f, "{whole}");
        }
        let digits = format!("{frac:018}");
        write!(f, "{whole}.{}", digits.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || FeeError::InvalidAmount(s.to_string());
        if s.is_empty() {
            return Err(invalid());
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > DECIMALS as usize {
            return Err(invalid());
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let frac_units: u128 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<18}");
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Amount)
            .ok_or(FeeError::Overflow)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A per-second charge rate, in base units scaled by [`RATE_SCALE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowRate(pub u128);

impl FlowRate {
    pub const ZERO: FlowRate = FlowRate(0);

    /// Amount accrued over `secs` seconds, rounded up to a whole base unit.
    pub fn over(self, secs: u64) -> Amount {
        let scaled = self.0.saturating_mul(secs as u128);
        Amount::from_base_units(scaled.div_ceil(RATE_SCALE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fractional_amount() {
        let a: Amount = "0.00002".parse().unwrap();
        assert_eq!(a.base_units(), 20_000_000_000_000);
        assert_eq!(a.to_string(), "0.00002");
    }

    #[test]
    fn parses_whole_amount() {
        let a: Amount = "12".parse().unwrap();
        assert_eq!(a, Amount::from_tokens(12));
        assert_eq!(a.to_string(), "12");
    }

    #[test]
    fn parses_leading_dot() {
        let a: Amount = ".5".parse().unwrap();
        assert_eq!(a.to_string(), "0.5");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", ".", "-1", "1.2.3", "abc", "0.0000000000000000001"] {
            assert!(bad.parse::<Amount>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let a = Amount::from_tokens(1);
        let b = Amount::from_tokens(2);
        assert_eq!(a.saturating_sub(b), Amount::ZERO);
    }

    #[test]
    fn mul_percent_rounds_up() {
        let a = Amount::from_base_units(101);
        assert_eq!(a.mul_percent(105).base_units(), 107);
        assert_eq!(Amount::from_tokens(2).mul_percent(105), "2.1".parse().unwrap());
    }

    #[test]
    fn sum_of_amounts() {
        let total: Amount = ["0.1", "0.2", "0.3"]
            .iter()
            .map(|s| s.parse::<Amount>().unwrap())
            .sum();
        assert_eq!(total.to_string(), "0.6");
    }

    #[test]
    fn serde_uses_strings() {
        let a: Amount = "1.25".parse().unwrap();
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"1.25\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn flow_rate_over_rounds_up() {
        // Half a base unit per second for three seconds is 1.5, rounded to 2.
        let rate = FlowRate(RATE_SCALE / 2);
        assert_eq!(rate.over(3).base_units(), 2);
        assert_eq!(FlowRate::ZERO.over(1_000), Amount::ZERO);
    }
}
