//! # Exchange Rate Math
//!
//! Pure share/asset conversions used by every vault pipeline.
//!
//! All products go through a 256-bit intermediate so `amount * supply` cannot
//! overflow before the division. Callers choose the rounding direction, so the
//! two conversions are not exact inverses of each other.

use sp_arithmetic::{helpers_128bit::multiply_by_rational_with_rounding, Rounding};
use yield_vault_primitives::RoundingMode;

/// Failure modes of a conversion.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RateError {
    /// Shares are outstanding but the vault reports no assets behind them.
    NoBackingAssets,
    /// The converted amount does not fit in 128 bits.
    Overflow,
}

fn rounding(mode: RoundingMode) -> Rounding {
    match mode {
        RoundingMode::Down => Rounding::Down,
        RoundingMode::Up => Rounding::Up,
    }
}

/// `a * b / c` with the requested rounding. `c` must be non-zero.
pub fn mul_div(a: u128, b: u128, c: u128, mode: RoundingMode) -> Result<u128, RateError> {
    multiply_by_rational_with_rounding(a, b, c, rounding(mode)).ok_or(RateError::Overflow)
}

/// Shares worth `assets` at the current rate.
///
/// An empty vault converts 1:1 so the first depositor is never diluted by
/// rounding.
pub fn assets_to_shares(
    assets: u128,
    total_supply: u128,
    total_assets: u128,
    mode: RoundingMode,
) -> Result<u128, RateError> {
    if total_supply == 0 {
        return Ok(assets);
    }
    if total_assets == 0 {
        return Err(RateError::NoBackingAssets);
    }
    mul_div(assets, total_supply, total_assets, mode)
}

/// Assets claimed by `shares` at the current rate.
pub fn shares_to_assets(
    shares: u128,
    total_supply: u128,
    total_assets: u128,
    mode: RoundingMode,
) -> Result<u128, RateError> {
    if total_supply == 0 {
        return Ok(shares);
    }
    if total_assets == 0 {
        return Err(RateError::NoBackingAssets);
    }
    mul_div(shares, total_assets, total_supply, mode)
}

/// Assets per whole share, scaled by `base_unit`.
pub fn exchange_rate(
    total_supply: u128,
    total_assets: u128,
    base_unit: u128,
) -> Result<u128, RateError> {
    if total_supply == 0 {
        return Ok(base_unit);
    }
    mul_div(total_assets, base_unit, total_supply, RoundingMode::Down)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yield_vault_primitives::BASE_UNIT_18 as UNIT;

    #[test]
    fn test_bootstrap_rate_is_one_to_one() {
        let shares = assets_to_shares(UNIT, 0, 0, RoundingMode::Down).unwrap();
        assert_eq!(shares, UNIT);
        assert_eq!(shares_to_assets(shares, 0, 0, RoundingMode::Down).unwrap(), UNIT);
        assert_eq!(exchange_rate(0, 0, UNIT).unwrap(), UNIT);
    }

    #[test]
    fn test_rounding_direction_is_respected() {
        // 3 shares backed by 10 assets: one share is worth 3.33 assets
        assert_eq!(shares_to_assets(1, 3, 10, RoundingMode::Down).unwrap(), 3);
        assert_eq!(shares_to_assets(1, 3, 10, RoundingMode::Up).unwrap(), 4);

        // 10 shares backed by 3 assets: one asset buys 3.33 shares
        assert_eq!(assets_to_shares(1, 10, 3, RoundingMode::Down).unwrap(), 3);
        assert_eq!(assets_to_shares(1, 10, 3, RoundingMode::Up).unwrap(), 4);
    }

    #[test]
    fn test_conversions_are_not_inverses_under_rounding() {
        let shares = assets_to_shares(5, 10, 3, RoundingMode::Down).unwrap();
        assert_eq!(shares, 16);
        // Converting back loses the remainder to the vault
        assert_eq!(shares_to_assets(shares, 10, 3, RoundingMode::Down).unwrap(), 4);
    }

    #[test]
    fn test_wide_intermediate_does_not_overflow() {
        // u128::MAX / 2 assets against a supply of 10^30 would overflow a
        // plain u128 multiplication
        let big = u128::MAX / 2;
        let supply = 1_000_000_000_000_000_000_000_000_000_000u128;
        let shares = assets_to_shares(big, supply, supply, RoundingMode::Down).unwrap();
        assert_eq!(shares, big);
    }

    #[test]
    fn test_result_overflow_is_reported() {
        assert_eq!(
            assets_to_shares(u128::MAX, 2, 1, RoundingMode::Down),
            Err(RateError::Overflow)
        );
    }

    #[test]
    fn test_supply_without_assets_is_rejected() {
        assert_eq!(
            assets_to_shares(UNIT, UNIT, 0, RoundingMode::Down),
            Err(RateError::NoBackingAssets)
        );
        assert_eq!(
            shares_to_assets(UNIT, UNIT, 0, RoundingMode::Up),
            Err(RateError::NoBackingAssets)
        );
    }

    #[test]
    fn test_exchange_rate_tracks_gains() {
        // 1 share outstanding, 2 units under management
        assert_eq!(exchange_rate(UNIT, 2 * UNIT, UNIT).unwrap(), 2 * UNIT);
    }
}
