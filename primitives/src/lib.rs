//! Yield Vault Shared Primitives
//!
//! Common types used by the vault pallet and the runtimes that host it.

#![cfg_attr(not(feature = "std"), no_std)]

use codec::{Decode, DecodeWithMemTracking, Encode, MaxEncodedLen};
use scale_info::TypeInfo;

// ============================================================================
// Common ID Types
// ============================================================================

/// Vault identifier
pub type VaultId = u64;

/// Strategy identifier, resolved by the runtime's strategy registry
pub type StrategyId = u32;

/// Share amount (fixed-point, scaled by the vault's base unit)
pub type Shares = u128;

// ============================================================================
// Allocation Types
// ============================================================================

/// One row of a vault's allocation table.
///
/// `percentage` is a fraction of the vault's base unit, so a base unit of
/// 10^18 means `950_000_000_000_000_000` is 95%.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Encode, Decode, DecodeWithMemTracking, TypeInfo, MaxEncodedLen)]
pub struct AllocationEntry {
    /// Strategy receiving the allocation
    pub strategy: StrategyId,
    /// Target share of newly deposited capital, scaled by the base unit
    pub percentage: u128,
}

impl AllocationEntry {
    pub fn new(strategy: StrategyId, percentage: u128) -> Self {
        Self { strategy, percentage }
    }
}

/// Rounding direction requested by a share/asset conversion.
///
/// Each pipeline picks the direction that favours the vault.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Encode, Decode, DecodeWithMemTracking, TypeInfo, MaxEncodedLen)]
pub enum RoundingMode {
    /// Floor division (deposit, redeem)
    Down,
    /// Ceiling division (mint, withdraw)
    Up,
}

// ============================================================================
// Vault Constants
// ============================================================================

/// Base unit used by 18-decimal assets (one whole token)
pub const BASE_UNIT_18: u128 = 1_000_000_000_000_000_000;

/// Default upper bound on the number of strategies in one allocation table
pub const DEFAULT_MAX_STRATEGIES: u32 = 16;
