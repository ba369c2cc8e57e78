//! Protocol parameters
//!
//! These values are part of the protocol and must not drift between
//! deployments. Durations are in seconds.

use crate::Amount;

/// Decimal places of the native currency
pub const NATIVE_DECIMALS: u8 = 18;

/// Bond required to join as a validator (0.1 native)
pub const VALIDATOR_STAKE: Amount = Amount::new(100_000_000_000_000_000);

/// Bond required to join as a moderator (0.2 native)
pub const MODERATOR_STAKE: Amount = Amount::new(200_000_000_000_000_000);

/// How long a slash request stays open for approvals and execution
pub const SLASH_REQUEST_DURATION: u64 = 2 * 7 * 24 * 60 * 60;

/// Furthest a deal deadline may lie after its creation
pub const DEAL_LIFESPAN: u64 = 2 * 7 * 24 * 60 * 60;

/// Grace window after a deal deadline for the validator to submit a result
pub const VALIDATE_PERIOD: u64 = 10 * 60;

/// How long an appeal may wait for a moderator verdict
pub const APPEAL_PERIOD: u64 = 7 * 24 * 60 * 60;

/// Denominator of all fee rates
pub const FEE_DENOMINATOR: u128 = 100_000;

/// Validator fee on the validated path (2%)
pub const VALIDATOR_FEE: u128 = 2_000;

/// Moderator fee on the appeal path (10%)
pub const MODERATOR_FEE: u128 = 10_000;

/// Default number of moderator approvals needed to execute a slash
pub const DEFAULT_REQUIRED_APPROVALS: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moderator_bond_exceeds_validator_bond() {
        assert!(MODERATOR_STAKE > VALIDATOR_STAKE);
        let one_native = Amount::from_whole(1, NATIVE_DECIMALS).unwrap();
        assert_eq!(one_native.value() / 10, VALIDATOR_STAKE.value());
    }

    #[test]
    fn test_periods() {
        assert_eq!(SLASH_REQUEST_DURATION, 1_209_600);
        assert_eq!(DEAL_LIFESPAN, 1_209_600);
        assert_eq!(VALIDATE_PERIOD, 600);
        assert_eq!(APPEAL_PERIOD, 604_800);
    }
}
