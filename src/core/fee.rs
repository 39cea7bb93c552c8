//! Fee rates and amounts
//!
//! Explorers report fee estimates in coins per kilobyte for a few
//! confirmation targets. They are converted to satoshis per byte and
//! repaired when a target has no estimate.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Satoshis in one coin
pub const SATOSHIS_PER_COIN: u64 = 100_000_000;

/// Confirmation targets (blocks) queried for high, medium and low priority
pub const FEE_TARGET_BLOCKS: [u32; 3] = [2, 4, 8];

// =============================================================================
// Conversions
// =============================================================================

/// Coins to satoshis, rounded to the nearest satoshi
pub fn btc_to_satoshis(coins: f64) -> f64 {
    (coins * SATOSHIS_PER_COIN as f64).round()
}

/// Satoshis to coins
pub fn satoshis_to_btc(satoshis: u64) -> f64 {
    satoshis as f64 / SATOSHIS_PER_COIN as f64
}

/// A coins-per-kB estimate as satoshis per byte
pub fn btc_per_kb_to_sat_per_byte(rate: f64) -> f64 {
    btc_to_satoshis(rate) / 1000.0
}

/// Fixed eight-decimal display, e.g. `0.00050000`
pub fn format_coins(satoshis: u64) -> String {
    format!(
        "{}.{:08}",
        satoshis / SATOSHIS_PER_COIN,
        satoshis % SATOSHIS_PER_COIN
    )
}

// =============================================================================
// Fee Rates
// =============================================================================

/// Every fee estimate was missing or non-positive
#[derive(Error, Debug, Clone, PartialEq)]
#[error("No usable fee rate (high {high}, medium {medium}, low {low})")]
pub struct InvalidFeeRates {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

/// Fee rates in satoshis per byte
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl FeeRates {
    /// Same rate for every priority, used for manual overrides
    pub fn flat(rate: f64) -> Self {
        Self {
            high: rate,
            medium: rate,
            low: rate,
        }
    }

    /// Fill missing estimates from the next lower priority
    ///
    /// Explorers answer -1 when they have no estimate for a target. A missing
    /// medium rate takes the low one, then a missing high rate takes medium.
    /// If high is still unusable the whole estimate is rejected.
    pub fn corrected(high: f64, medium: f64, low: f64) -> Result<Self, InvalidFeeRates> {
        let medium_fixed = if medium <= 0.0 { low } else { medium };
        let high_fixed = if high <= 0.0 { medium_fixed } else { high };

        if high_fixed <= 0.0 {
            return Err(InvalidFeeRates { high, medium, low });
        }

        Ok(Self {
            high: high_fixed,
            medium: medium_fixed,
            low,
        })
    }

    /// Fee for a transaction of `size_bytes` at the high rate
    pub fn fee_for_size(&self, size_bytes: usize) -> u64 {
        (self.high * size_bytes as f64).round().max(0.0) as u64
    }
}

impl fmt::Display for FeeRates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "high {:.3} sat/B, medium {:.3} sat/B, low {:.3} sat/B",
            self.high, self.medium, self.low
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_fills_missing_rates() {
        let rates = FeeRates::corrected(-1.0, -1.0, 5.0).unwrap();
        assert_eq!(rates, FeeRates::flat(5.0));

        let rates = FeeRates::corrected(-1.0, 3.0, 1.0).unwrap();
        assert_eq!(rates.high, 3.0);
        assert_eq!(rates.medium, 3.0);
        assert_eq!(rates.low, 1.0);

        let rates = FeeRates::corrected(10.0, 0.0, 2.0).unwrap();
        assert_eq!(rates.high, 10.0);
        assert_eq!(rates.medium, 2.0);
    }

    #[test]
    fn test_cascade_rejects_all_missing() {
        let err = FeeRates::corrected(-1.0, -1.0, -1.0).unwrap_err();
        assert_eq!(err.low, -1.0);
    }

    #[test]
    fn test_unit_conversion() {
        assert_eq!(btc_to_satoshis(0.00001), 1000.0);
        assert_eq!(btc_per_kb_to_sat_per_byte(0.00001), 1.0);
        assert_eq!(btc_per_kb_to_sat_per_byte(0.00012345), 12.345);
        assert_eq!(btc_per_kb_to_sat_per_byte(-1.0), -100_000.0);
        assert_eq!(satoshis_to_btc(150_000_000), 1.5);
    }

    #[test]
    fn test_fee_for_size() {
        let rates = FeeRates::flat(1.5);
        assert_eq!(rates.fee_for_size(225), 338);
        assert_eq!(rates.fee_for_size(0), 0);
    }

    #[test]
    fn test_format_coins() {
        assert_eq!(format_coins(0), "0.00000000");
        assert_eq!(format_coins(50_000), "0.00050000");
        assert_eq!(format_coins(123_456_789_012), "1234.56789012");
    }
}
