//! Billing rate and charge amounts.
//!
//! Money is held as integer cents. A rate is configured as a decimal string
//! with at most two fraction digits (e.g. `"2.00"`), and every charge is
//! rounded half-up to the nearest cent.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Seconds per billed minute.
const SECONDS_PER_MINUTE: u64 = 60;

/// Error parsing a decimal billing rate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid billing rate '{0}': expected a decimal with at most 2 fraction digits")]
pub struct ParseRateError(String);

/// Per-minute billing rate in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingRate {
    cents_per_minute: u64,
}

impl BillingRate {
    /// Create a rate from whole cents per minute.
    #[must_use]
    pub const fn from_cents(cents_per_minute: u64) -> Self {
        Self { cents_per_minute }
    }

    /// Cents charged per full minute.
    #[must_use]
    pub const fn cents_per_minute(&self) -> u64 {
        self.cents_per_minute
    }

    /// Charge accrued after `elapsed_seconds`: `(elapsed / 60) * rate`, rounded to the cent.
    #[must_use]
    pub fn amount_for(&self, elapsed_seconds: u64) -> Amount {
        let scaled = u128::from(elapsed_seconds) * u128::from(self.cents_per_minute);
        let divisor = u128::from(SECONDS_PER_MINUTE);
        let cents = (scaled + divisor / 2) / divisor;
        Amount::from_cents(u64::try_from(cents).unwrap_or(u64::MAX))
    }
}

impl Default for BillingRate {
    fn default() -> Self {
        Self::from_cents(200)
    }
}

impl FromStr for BillingRate {
    type Err = ParseRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseRateError(s.to_string());
        let trimmed = s.trim();

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) || fraction.len() > 2 {
            return Err(invalid());
        }
        if trimmed.ends_with('.') {
            return Err(invalid());
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let fraction_cents: u64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<u64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        whole
            .checked_mul(100)
            .and_then(|cents| cents.checked_add(fraction_cents))
            .map(Self::from_cents)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for BillingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Amount::from_cents(self.cents_per_minute).fmt(f)
    }
}

/// A charge in cents, displayed with exactly two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(u64);

impl Amount {
    /// Create an amount from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Amount in cents.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_two_dollars_per_minute() {
        let rate: BillingRate = "2.00".parse().unwrap();
        assert_eq!(rate.amount_for(60).to_string(), "2.00");
        assert_eq!(rate.amount_for(90).to_string(), "3.00");
        assert_eq!(rate.amount_for(0).to_string(), "0.00");
    }

    #[test]
    fn test_partial_minutes_round_to_nearest_cent() {
        let rate = BillingRate::from_cents(200);
        // 1s at $2/min = 3.33 cents
        assert_eq!(rate.amount_for(1).to_string(), "0.03");
        // 61s = 203.33 cents
        assert_eq!(rate.amount_for(61).to_string(), "2.03");

        let rate = BillingRate::from_cents(1);
        // 30s at 1 cent/min = 0.5 cents, rounds half-up
        assert_eq!(rate.amount_for(30).cents(), 1);
        assert_eq!(rate.amount_for(29).cents(), 0);
    }

    #[test]
    fn test_parse_rate_forms() {
        let cents = |input: &str| input.parse::<BillingRate>().unwrap().cents_per_minute();
        assert_eq!(cents("2"), 200);
        assert_eq!(cents("2.5"), 250);
        assert_eq!(cents("0.99"), 99);
        assert_eq!(cents(" 3.10 "), 310);
    }

    #[test]
    fn test_parse_rate_rejects_invalid() {
        for input in ["", "-1.00", "2.001", "abc", "2.", ".50", "1.2.3", "1e3"] {
            assert!(
                input.parse::<BillingRate>().is_err(),
                "expected '{input}' to be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rate_overflow_is_rejected() {
        assert!("99999999999999999999".parse::<BillingRate>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(BillingRate::from_cents(200).to_string(), "2.00");
        assert_eq!(Amount::from_cents(5).to_string(), "0.05");
        assert_eq!(Amount::from_cents(12345).to_string(), "123.45");
    }
}
