//! Money and the local cost model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

use crate::model::Pricing;
use crate::usage::TokenUsage;

/// Represents a monetary amount in USD.
///
/// Internally stored as microdollars (millionths of a dollar) so that
/// summing many small per-message costs does not drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    microdollars: i64,
}

impl Money {
    const MICRODOLLARS_PER_DOLLAR: i64 = 1_000_000;

    /// Creates Money from a USD dollar amount.
    pub fn from_usd(dollars: f64) -> Self {
        let microdollars = (dollars * Self::MICRODOLLARS_PER_DOLLAR as f64).round() as i64;
        Self { microdollars }
    }

    /// Returns the amount in USD as a float.
    pub fn as_usd(&self) -> f64 {
        self.microdollars as f64 / Self::MICRODOLLARS_PER_DOLLAR as f64
    }

    /// Returns true if the amount is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.microdollars > 0
    }

    /// Saturating subtraction, clamped at zero.
    pub fn saturating_sub(&self, other: Money) -> Self {
        Self {
            microdollars: self.microdollars.saturating_sub(other.microdollars).max(0),
        }
    }

    /// Formats the amount for display.
    ///
    /// Sub-cent amounts keep four decimals so a cheap turn never shows "$0.00".
    pub fn format(&self) -> String {
        let dollars = self.as_usd();
        if dollars < 0.01 && dollars > 0.0 {
            format!("${dollars:.4}")
        } else {
            format!("${dollars:.2}")
        }
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            microdollars: self.microdollars.saturating_add(other.microdollars),
        }
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Self) {
        self.microdollars = self.microdollars.saturating_add(other.microdollars);
    }
}

impl Serialize for Money {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Serialize as USD float for JSON compatibility
        serializer.serialize_f64(self.as_usd())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let dollars = f64::deserialize(deserializer)?;
        Ok(Money::from_usd(dollars))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Estimates the cost of a usage record under the given pricing.
///
/// Pure function of its inputs. The result is advisory: the CLI's own
/// `total_cost_usd` replaces it whenever that figure is present.
pub fn estimate_cost(usage: &TokenUsage, pricing: &Pricing) -> Money {
    let per_token = |count: u64, per_million: f64| count as f64 * per_million / 1_000_000.0;

    let dollars = per_token(usage.input.as_u64(), pricing.input_per_million)
        + per_token(usage.output.as_u64(), pricing.output_per_million)
        + per_token(usage.cache_creation.as_u64(), pricing.cache_write_per_million)
        + per_token(usage.cache_read.as_u64(), pricing.cache_read_per_million);

    Money::from_usd(dollars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_precision() {
        let a = Money::from_usd(0.001);
        let b = Money::from_usd(0.001);
        let sum = a + b;
        assert_eq!(sum, Money::from_usd(0.002));
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(Money::from_usd(0.0042).format(), "$0.0042");
        assert_eq!(Money::from_usd(0.35).format(), "$0.35");
        assert_eq!(Money::from_usd(12.345).format(), "$12.35");
        assert_eq!(Money::default().format(), "$0.00");
    }

    #[test]
    fn test_money_saturating_sub() {
        let a = Money::from_usd(0.002);
        let b = Money::from_usd(0.005);
        assert_eq!(a.saturating_sub(b), Money::default());
        assert_eq!(b.saturating_sub(a), Money::from_usd(0.003));
    }

    #[test]
    fn test_estimate_cost_sonnet() {
        // 1M input at $3 + 100k output at $15 = $4.50
        let usage = TokenUsage::new(1_000_000, 100_000, 0, 0);
        let cost = estimate_cost(&usage, &Pricing::SONNET);
        assert_eq!(cost, Money::from_usd(4.5));
    }

    #[test]
    fn test_estimate_cost_includes_cache() {
        let usage = TokenUsage::new(0, 0, 1_000_000, 1_000_000);
        let cost = estimate_cost(&usage, &Pricing::SONNET);
        assert_eq!(cost, Money::from_usd(3.75 + 0.30));
    }

    #[test]
    fn test_estimate_cost_empty_usage() {
        assert_eq!(
            estimate_cost(&TokenUsage::default(), &Pricing::OPUS),
            Money::default()
        );
    }
}
