//! Amount types in asset base units
//!
//! Amounts are unsigned 128-bit counts of the smallest unit of an asset
//! (wei for the native currency, 10^-6 for a 6-decimal stablecoin). All
//! arithmetic is checked.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{MarketError, Result};

/// A non-negative amount in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Create an amount from whole units of an asset with `decimals` places
    pub fn from_whole(whole: u128, decimals: u8) -> Result<Self> {
        10u128
            .checked_pow(decimals as u32)
            .and_then(|m| whole.checked_mul(m))
            .map(Self)
            .ok_or(MarketError::AmountOverflow)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(MarketError::AmountOverflow)
    }

    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(MarketError::AmountUnderflow)
    }

    /// Take `numerator / denominator` of this amount, rounding down
    pub fn fraction(self, numerator: u128, denominator: u128) -> Result<Self> {
        if denominator == 0 {
            return Err(MarketError::invalid_input("denominator", "must be non-zero"));
        }
        // floor(a * n / d) == (a / d) * n + (a % d) * n / d, without the wide product
        let whole = (self.0 / denominator).checked_mul(numerator);
        let rest = (self.0 % denominator)
            .checked_mul(numerator)
            .map(|v| v / denominator);
        whole
            .zip(rest)
            .and_then(|(whole, rest)| whole.checked_add(rest))
            .map(Self)
            .ok_or(MarketError::AmountOverflow)
    }

    /// Split off a fee of `fee_numerator / denominator`
    ///
    /// The fee rounds down and the remainder absorbs the rounding, so
    /// `fee + remainder` is always exactly `self`.
    pub fn split_fee(self, fee_numerator: u128, denominator: u128) -> Result<FeeSplit> {
        if fee_numerator > denominator {
            return Err(MarketError::invalid_input("fee", "fee rate exceeds 100%"));
        }
        let fee = self.fraction(fee_numerator, denominator)?;
        let remainder = self.checked_sub(fee)?;
        Ok(FeeSplit { fee, remainder })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for Amount {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

/// An amount divided into a fee and the remainder paid to the main recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub fee: Amount,
    pub remainder: Amount,
}

impl FeeSplit {
    pub fn total(&self) -> Result<Amount> {
        self.fee.checked_add(self.remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FEE_DENOMINATOR, MODERATOR_FEE, VALIDATOR_FEE};
    use proptest::prelude::*;

    #[test]
    fn test_from_whole() {
        assert_eq!(Amount::from_whole(100, 6).unwrap(), Amount::new(100_000_000));
        assert!(Amount::from_whole(u128::MAX, 18).is_err());
    }

    #[test]
    fn test_validator_fee_split() {
        let split = Amount::new(100_000_000)
            .split_fee(VALIDATOR_FEE, FEE_DENOMINATOR)
            .unwrap();
        assert_eq!(split.fee, Amount::new(2_000_000));
        assert_eq!(split.remainder, Amount::new(98_000_000));
    }

    #[test]
    fn test_moderator_fee_split() {
        let split = Amount::new(100_000_000)
            .split_fee(MODERATOR_FEE, FEE_DENOMINATOR)
            .unwrap();
        assert_eq!(split.fee, Amount::new(10_000_000));
        assert_eq!(split.remainder, Amount::new(90_000_000));
    }

    #[test]
    fn test_dust_goes_to_remainder() {
        let split = Amount::new(49).split_fee(VALIDATOR_FEE, FEE_DENOMINATOR).unwrap();
        assert_eq!(split.fee, Amount::ZERO);
        assert_eq!(split.remainder, Amount::new(49));
    }

    #[test]
    fn test_fee_on_amounts_near_max() {
        let amount = Amount::new(u128::MAX);
        let split = amount.split_fee(MODERATOR_FEE, FEE_DENOMINATOR).unwrap();
        assert_eq!(split.fee, Amount::new(u128::MAX / 10));
        assert_eq!(split.fee.checked_add(split.remainder).unwrap(), amount);

        let amount = Amount::new(u128::MAX / 1_000);
        let split = amount.split_fee(VALIDATOR_FEE, FEE_DENOMINATOR).unwrap();
        assert_eq!(split.fee, Amount::new(u128::MAX / 1_000 / 50));
    }

    #[test]
    fn test_checked_arithmetic() {
        assert_eq!(
            Amount::new(u128::MAX).checked_add(Amount::new(1)).unwrap_err().error_code(),
            "AMOUNT_OVERFLOW"
        );
        assert_eq!(
            Amount::new(1).checked_sub(Amount::new(2)).unwrap_err().error_code(),
            "AMOUNT_UNDERFLOW"
        );
        assert!(Amount::new(10).fraction(1, 0).is_err());
        assert!(Amount::new(u128::MAX).fraction(2, 1).is_err());
        assert!(Amount::new(10).split_fee(2, 1).is_err());
    }

    proptest! {
        #[test]
        fn prop_fee_split_conserves_value(
            amount in any::<u128>(),
            rate in prop_oneof![Just(VALIDATOR_FEE), Just(MODERATOR_FEE), 0u128..=FEE_DENOMINATOR],
        ) {
            let split = Amount::new(amount).split_fee(rate, FEE_DENOMINATOR).unwrap();
            prop_assert_eq!(split.total().unwrap(), Amount::new(amount));
            prop_assert!(split.fee <= Amount::new(amount));
        }
    }
}
