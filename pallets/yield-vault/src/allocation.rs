//! # Allocation Table
//!
//! Validation of a vault's strategy table and the split of a deposit across it.

use crate::rate::{mul_div, RateError};
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use yield_vault_primitives::{AllocationEntry, RoundingMode, StrategyId};

/// Reasons a proposed table is rejected, in the order they are checked.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocationError {
    /// Strategy and percentage lists differ in length.
    LengthMismatch,
    /// A strategy appears more than once.
    DuplicateStrategy,
    /// Percentages add up to more than one base unit.
    AllocationOverflow,
}

/// Zip `strategies` and `percentages` into a table, enforcing equal length,
/// unique strategies and a total of at most `base_unit`.
pub fn build_allocations(
    strategies: &[StrategyId],
    percentages: &[u128],
    base_unit: u128,
) -> Result<Vec<AllocationEntry>, AllocationError> {
    if strategies.len() != percentages.len() {
        return Err(AllocationError::LengthMismatch);
    }

    let mut seen = BTreeSet::new();
    if !strategies.iter().all(|strategy| seen.insert(*strategy)) {
        return Err(AllocationError::DuplicateStrategy);
    }

    let total = percentages
        .iter()
        .try_fold(0u128, |acc, pct| acc.checked_add(*pct))
        .ok_or(AllocationError::AllocationOverflow)?;
    if total > base_unit {
        return Err(AllocationError::AllocationOverflow);
    }

    Ok(strategies
        .iter()
        .zip(percentages)
        .map(|(strategy, pct)| AllocationEntry::new(*strategy, *pct))
        .collect())
}

/// Sum of all percentages in a validated table.
pub fn allocated_total(entries: &[AllocationEntry]) -> u128 {
    entries
        .iter()
        .fold(0u128, |acc, entry| acc.saturating_add(entry.percentage))
}

/// Portion of `amount` owed to each strategy (floored). Whatever the floors
/// and the unallocated percentage leave behind stays idle.
pub fn split_deposit(
    amount: u128,
    entries: &[AllocationEntry],
    base_unit: u128,
) -> Result<Vec<(StrategyId, u128)>, RateError> {
    entries
        .iter()
        .map(|entry| {
            mul_div(amount, entry.percentage, base_unit, RoundingMode::Down)
                .map(|portion| (entry.strategy, portion))
        })
        .collect()
}
