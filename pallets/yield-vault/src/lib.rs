//! # Yield Vault Pallet
//!
//! Pooled-capital vaults. Depositors hand over a fungible asset and receive
//! shares that are a proportional claim on everything the vault controls.
//!
//! ## Overview
//!
//! - Each vault keeps part of its capital idle in a pallet-derived pool account
//!   and pushes the rest into strategies according to its allocation table.
//! - The exchange rate is `(idle + Σ strategy values) / share supply` and is
//!   recomputed from live queries on every call.
//! - Withdrawals drain the idle balance first, then strategies in table order.
//!   A strategy may hand back less than asked; the vault pays out only what it
//!   actually recovered.
//! - Allocation tables are owner-managed and replaced as a whole. Replacing a
//!   table never moves capital that already sits in a strategy.
//!
//! ## Rounding
//!
//! | entry point | conversion       | rounding |
//! |-------------|------------------|----------|
//! | `deposit`   | assets -> shares | down     |
//! | `mint`      | shares -> assets | up       |
//! | `withdraw`  | assets -> shares | up       |
//! | `redeem`    | shares -> assets | down     |
//!
//! ## Key Invariants
//!
//! 1. **Share Supply**: shares are minted or burned only together with the
//!    matching asset movement, inside a single storage layer
//! 2. **No Charge Without Delivery**: `withdraw` burns shares for the capital
//!    actually recovered, never for the amount requested
//! 3. **Bounded Table**: allocation percentages never sum past one base unit

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use pallet::*;

pub mod allocation;
pub mod rate;

#[cfg(test)]
mod mock;


use sp_runtime::DispatchError;

pub use yield_vault_primitives::{AllocationEntry, RoundingMode, Shares, StrategyId, VaultId};

const LOG_TARGET: &str = "yield-vault";

// =============================================================================
//                              Traits
// =============================================================================

/// Registry of the strategies a vault can allocate to.
///
/// Strategies are addressed by id and act on behalf of a `holder`, which is
/// always the vault's pool account. Funds move between the holder and the
/// strategy inside `deposit` / `withdraw`.
pub trait StrategyInterface<AccountId> {
    type AssetId;
    type Balance;

    /// Whether `strategy` resolves to a live implementation.
    fn is_registered(strategy: StrategyId) -> bool;

    /// Move `amount` of `asset` from `holder` into the strategy.
    fn deposit(
        strategy: StrategyId,
        holder: &AccountId,
        asset: Self::AssetId,
        amount: Self::Balance,
    ) -> Result<(), DispatchError>;

    /// Return up to `amount` of `asset` to `holder`.
    ///
    /// Returning less than requested is a normal outcome, not an error. The
    /// vault counts only what actually lands in `holder`; the returned amount
    /// is logged and otherwise ignored.
    fn withdraw(
        strategy: StrategyId,
        holder: &AccountId,
        asset: Self::AssetId,
        amount: Self::Balance,
    ) -> Result<Self::Balance, DispatchError>;

    /// Current value the strategy reports for `holder`.
    fn value(strategy: StrategyId, holder: &AccountId, asset: Self::AssetId) -> Self::Balance;
}

impl<AccountId> StrategyInterface<AccountId> for () {
    type AssetId = u32;
    type Balance = u128;

    fn is_registered(_: StrategyId) -> bool {
        false
    }

    fn deposit(_: StrategyId, _: &AccountId, _: u32, _: u128) -> Result<(), DispatchError> {
        Err(DispatchError::Other("no strategies registered"))
    }

    fn withdraw(_: StrategyId, _: &AccountId, _: u32, _: u128) -> Result<u128, DispatchError> {
        Err(DispatchError::Other("no strategies registered"))
    }

    fn value(_: StrategyId, _: &AccountId, _: u32) -> u128 {
        0
    }
}

/// Vault operations for other pallets.
pub trait VaultApi<AccountId> {
    type Balance;

    /// Deposit `assets` from `who`, minting shares to `receiver`.
    fn deposit(
        vault_id: VaultId,
        who: &AccountId,
        assets: Self::Balance,
        receiver: &AccountId,
    ) -> Result<Shares, DispatchError>;

    /// Mint exactly `shares` to `receiver`, charging `who` what they cost.
    fn mint(
        vault_id: VaultId,
        who: &AccountId,
        shares: Shares,
        receiver: &AccountId,
    ) -> Result<Self::Balance, DispatchError>;

    /// Withdraw `assets` worth of `owner`'s position to `receiver`.
    /// Returns the shares burned.
    fn withdraw(
        vault_id: VaultId,
        who: &AccountId,
        assets: Self::Balance,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<Shares, DispatchError>;

    /// Redeem `shares` of `owner` to `receiver`. Returns the assets paid.
    fn redeem(
        vault_id: VaultId,
        who: &AccountId,
        shares: Shares,
        receiver: &AccountId,
        owner: &AccountId,
    ) -> Result<Self::Balance, DispatchError>;

    /// Idle balance plus every strategy's reported value.
    fn total_assets(vault_id: VaultId) -> Result<Self::Balance, DispatchError>;

    /// Shares held by `who`.
    fn share_balance(vault_id: VaultId, who: &AccountId) -> Shares;
}

#[frame_support::pallet]
pub mod pallet {
    use super::*;
    use crate::allocation::{self, AllocationError};
    use crate::rate::{self, RateError};
    use alloc::vec::Vec;
    use frame_support::pallet_prelude::*;
    use frame_support::storage::with_storage_layer;
    use frame_support::traits::fungibles::{Inspect, Mutate};
    use frame_support::traits::tokens::Preservation;
    use frame_support::{CloneNoBound, DefaultNoBound, EqNoBound, PalletId, PartialEqNoBound, RuntimeDebugNoBound};
    use frame_system::pallet_prelude::*;
    use sp_runtime::traits::{AccountIdConversion, MaybeSerializeDeserialize, Saturating, Zero};

    // =========================================================================
    //                                  Types
    // =========================================================================

    pub type AllocationsOf<T> = BoundedVec<AllocationEntry, <T as Config>::MaxStrategies>;

    /// Immutable vault parameters plus the owner-managed allocation table.
    #[derive(
        Encode,
        Decode,
        CloneNoBound,
        PartialEqNoBound,
        EqNoBound,
        RuntimeDebugNoBound,
        TypeInfo,
        MaxEncodedLen,
    )]
    #[scale_info(skip_type_params(T))]
    #[codec(mel_bound())]
    pub struct VaultInfo<T: Config> {
        /// Account allowed to replace the allocation table
        pub owner: T::AccountId,
        /// Asset accepted by the vault
        pub asset: T::AssetId,
        /// Fixed-point scale; also the value of 100% in `allocations`
        pub base_unit: u128,
        /// Strategies in withdrawal order with their share of new deposits
        pub allocations: AllocationsOf<T>,
    }

    /// Vault created at genesis
    #[derive(Clone, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GenesisVault<AccountId, AssetId> {
        pub owner: AccountId,
        pub asset: AssetId,
        pub base_unit: u128,
        pub strategies: Vec<StrategyId>,
        pub percentages: Vec<u128>,
    }

    // =========================================================================
    //                                  Config
    // =========================================================================

    #[pallet::config]
    pub trait Config: frame_system::Config {
        type RuntimeEvent: From<Event<Self>> + IsType<<Self as frame_system::Config>::RuntimeEvent>;

        /// Balance type
        type Balance: Parameter
            + Member
            + From<u128>
            + Into<u128>
            + Copy
            + Default
            + MaxEncodedLen
            + Zero
            + Ord
            + Saturating;

        /// Asset ID type
        type AssetId: Parameter + Member + Copy + MaxEncodedLen + MaybeSerializeDeserialize;

        /// Fungibles implementation holding depositor and pool balances
        type Assets: Mutate<Self::AccountId, AssetId = Self::AssetId, Balance = Self::Balance>
            + Inspect<Self::AccountId>;

        /// Registry of strategies vaults may allocate to
        type Strategies: StrategyInterface<
            Self::AccountId,
            AssetId = Self::AssetId,
            Balance = Self::Balance,
        >;

        /// Pallet ID used to derive each vault's pool account
        #[pallet::constant]
        type PalletId: Get<PalletId>;

        /// Maximum number of strategies in one allocation table
        #[pallet::constant]
        type MaxStrategies: Get<u32>;
    }

    // =========================================================================
    //                                  Storage
    // =========================================================================

    #[pallet::pallet]
    pub struct Pallet<T>(_);

    /// Vault parameters and allocation table per vault
    #[pallet::storage]
    #[pallet::getter(fn vault_info)]
    pub type Vaults<T: Config> = StorageMap<_, Blake2_128Concat, VaultId, VaultInfo<T>, OptionQuery>;

    /// Next vault ID to assign
    #[pallet::storage]
    #[pallet::getter(fn next_vault_id)]
    pub type NextVaultId<T> = StorageValue<_, VaultId, ValueQuery>;

    /// Share supply per vault
    #[pallet::storage]
    #[pallet::getter(fn total_shares)]
    pub type TotalShares<T: Config> = StorageMap<_, Blake2_128Concat, VaultId, Shares, ValueQuery>;

    /// Share balance per (vault, account)
    #[pallet::storage]
    pub type ShareBalances<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        VaultId,
        Blake2_128Concat,
        T::AccountId,
        Shares,
        ValueQuery,
    >;

    /// Shares a spender may withdraw or redeem on an owner's behalf,
    /// keyed by (vault, (owner, spender))
    #[pallet::storage]
    pub type ShareAllowances<T: Config> = StorageDoubleMap<
        _,
        Blake2_128Concat,
        VaultId,
        Blake2_128Concat,
        (T::AccountId, T::AccountId),
        Shares,
        ValueQuery,
    >;

    // =========================================================================
    //                           Genesis Configuration
    // =========================================================================

    #[pallet::genesis_config]
    #[derive(DefaultNoBound)]
    pub struct GenesisConfig<T: Config> {
        /// Vaults to create at genesis, assigned IDs in order
        pub vaults: Vec<GenesisVault<T::AccountId, T::AssetId>>,
    }

    #[pallet::genesis_build]
    impl<T: Config> BuildGenesisConfig for GenesisConfig<T> {
        fn build(&self) {
            for vault in self.vaults.iter() {
                Pallet::<T>::do_create_vault(
                    &vault.owner,
                    vault.asset,
                    vault.base_unit,
                    &vault.strategies,
                    &vault.percentages,
                )
                .expect("Invalid genesis vault");
            }
        }
    }

    // =========================================================================
    //                                  Events
    // =========================================================================

    #[pallet::event]
    #[pallet::generate_deposit(pub(super) fn deposit_event)]
    pub enum Event<T: Config> {
        /// A vault was created. [vault_id, owner, asset, base_unit]
        VaultCreated {
            vault_id: VaultId,
            owner: T::AccountId,
            asset: T::AssetId,
            base_unit: u128,
        },
        /// Allocation table replaced. [vault_id, allocations]
        AllocationsUpdated {
            vault_id: VaultId,
            allocations: Vec<AllocationEntry>,
        },
        /// Vault ownership moved. [vault_id, previous_owner, new_owner]
        OwnershipTransferred {
            vault_id: VaultId,
            previous_owner: T::AccountId,
            new_owner: T::AccountId,
        },
        /// Assets deposited and shares minted. [vault_id, caller, receiver, assets, shares]
        Deposited {
            vault_id: VaultId,
            caller: T::AccountId,
            receiver: T::AccountId,
            assets: T::Balance,
            shares: Shares,
        },
        /// Shares burned and assets paid out.
        /// [vault_id, caller, receiver, owner, requested, assets, shares]
        Withdrawn {
            vault_id: VaultId,
            caller: T::AccountId,
            receiver: T::AccountId,
            owner: T::AccountId,
            requested: T::Balance,
            assets: T::Balance,
            shares: Shares,
        },
        /// Part of a deposit pushed into a strategy. [vault_id, strategy, amount]
        CapitalAllocated {
            vault_id: VaultId,
            strategy: StrategyId,
            amount: T::Balance,
        },
        /// Capital pulled back from a strategy. [vault_id, strategy, requested, received]
        CapitalRecalled {
            vault_id: VaultId,
            strategy: StrategyId,
            requested: T::Balance,
            received: T::Balance,
        },
        /// Shares moved between accounts. [vault_id, from, to, amount]
        SharesTransferred {
            vault_id: VaultId,
            from: T::AccountId,
            to: T::AccountId,
            amount: Shares,
        },
        /// Share allowance set. [vault_id, owner, spender, amount]
        SharesApproved {
            vault_id: VaultId,
            owner: T::AccountId,
            spender: T::AccountId,
            amount: Shares,
        },
    }

    // =========================================================================
    //                                  Errors
    // =========================================================================

    #[pallet::error]
    pub enum Error<T> {
        /// Strategy and percentage lists differ in length.
        LengthMismatch,
        /// The same strategy appears twice in an allocation table.
        DuplicateStrategy,
        /// Allocation percentages sum to more than 100%.
        AllocationOverflow,
        /// Caller is not the vault owner.
        Unauthorized,
        /// Share balance too low for the requested burn or transfer.
        InsufficientShares,
        /// Underlying asset transfer failed.
        TransferFailed,
        /// A strategy call failed.
        StrategyInteractionFailed,
        /// Vault not found.
        VaultNotFound,
        /// Base unit must be non-zero.
        InvalidBaseUnit,
        /// Allocation table longer than MaxStrategies.
        TooManyStrategies,
        /// Strategy ID is not known to the registry.
        StrategyNotRegistered,
        /// Deposit too small to mint a single share.
        ZeroShares,
        /// Operation would move no assets.
        ZeroAssets,
        /// Shares outstanding but the vault holds no assets.
        NoBackingAssets,
        /// Arithmetic overflow.
        ArithmeticOverflow,
        /// Spender's share allowance is too low.
        InsufficientAllowance,
    }

    impl<T> From<AllocationError> for Error<T> {
        fn from(err: AllocationError) -> Self {
            match err {
                AllocationError::LengthMismatch => Error::<T>::LengthMismatch,
                AllocationError::DuplicateStrategy => Error::<T>::DuplicateStrategy,
                AllocationError::AllocationOverflow => Error::<T>::AllocationOverflow,
            }
        }
    }

    impl<T> From<RateError> for Error<T> {
        fn from(err: RateError) -> Self {
            match err {
                RateError::NoBackingAssets => Error::<T>::NoBackingAssets,
                RateError::Overflow => Error::<T>::ArithmeticOverflow,
            }
        }
    }

    // =========================================================================
    //                                Extrinsics
    // =========================================================================

    #[pallet::call]
    impl<T: Config> Pallet<T> {
        /// Create a vault owned by the caller.
        ///
        /// - `asset`: Asset the vault accepts
        /// - `base_unit`: Fixed-point scale, e.g. 10^18 for an 18-decimal asset
        /// - `strategies` / `percentages`: Initial allocation table
        #[pallet::call_index(0)]
        #[pallet::weight(Weight::from_parts(50_000, 0))]
        pub fn create_vault(
            origin: OriginFor<T>,
            asset: T::AssetId,
            base_unit: u128,
            strategies: Vec<StrategyId>,
            percentages: Vec<u128>,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_create_vault(&who, asset, base_unit, &strategies, &percentages)?;
            Ok(())
        }

        /// Replace the whole allocation table. Owner only.
        ///
        /// Capital already held by strategies is left where it is; only
        /// future deposits follow the new table.
        #[pallet::call_index(1)]
        #[pallet::weight(Weight::from_parts(30_000, 0))]
        pub fn update_allocations(
            origin: OriginFor<T>,
            vault_id: VaultId,
            strategies: Vec<StrategyId>,
            percentages: Vec<u128>,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_update_allocations(&who, vault_id, &strategies, &percentages)
        }

        /// Replace the percentages of the current strategies. Owner only.
        #[pallet::call_index(2)]
        #[pallet::weight(Weight::from_parts(30_000, 0))]
        pub fn update_percent_allocations(
            origin: OriginFor<T>,
            vault_id: VaultId,
            percentages: Vec<u128>,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_update_percent_allocations(&who, vault_id, &percentages)
        }

        /// Hand the vault to a new owner. Owner only.
        #[pallet::call_index(3)]
        #[pallet::weight(Weight::from_parts(10_000, 0))]
        pub fn transfer_ownership(
            origin: OriginFor<T>,
            vault_id: VaultId,
            new_owner: T::AccountId,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_transfer_ownership(&who, vault_id, new_owner)
        }

        /// Deposit `assets` and mint the corresponding shares to `receiver`.
        #[pallet::call_index(4)]
        #[pallet::weight(Weight::from_parts(100_000, 0))]
        pub fn deposit(
            origin: OriginFor<T>,
            vault_id: VaultId,
            assets: T::Balance,
            receiver: T::AccountId,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_deposit(&who, vault_id, assets, &receiver)?;
            Ok(())
        }

        /// Mint exactly `shares` to `receiver`, paying whatever they cost.
        #[pallet::call_index(5)]
        #[pallet::weight(Weight::from_parts(100_000, 0))]
        pub fn mint(
            origin: OriginFor<T>,
            vault_id: VaultId,
            shares: Shares,
            receiver: T::AccountId,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_mint(&who, vault_id, shares, &receiver)?;
            Ok(())
        }

        /// Withdraw `assets` from `owner`'s position and pay them to `receiver`.
        ///
        /// Shares are burned only for the assets actually recovered.
        #[pallet::call_index(6)]
        #[pallet::weight(Weight::from_parts(150_000, 0))]
        pub fn withdraw(
            origin: OriginFor<T>,
            vault_id: VaultId,
            assets: T::Balance,
            receiver: T::AccountId,
            owner: T::AccountId,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_withdraw(&who, vault_id, assets, &receiver, &owner)?;
            Ok(())
        }

        /// Burn `shares` of `owner` and pay the assets recovered to `receiver`.
        #[pallet::call_index(7)]
        #[pallet::weight(Weight::from_parts(150_000, 0))]
        pub fn redeem(
            origin: OriginFor<T>,
            vault_id: VaultId,
            shares: Shares,
            receiver: T::AccountId,
            owner: T::AccountId,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_redeem(&who, vault_id, shares, &receiver, &owner)?;
            Ok(())
        }

        /// Move shares from the caller to `to`.
        #[pallet::call_index(8)]
        #[pallet::weight(Weight::from_parts(10_000, 0))]
        pub fn transfer_shares(
            origin: OriginFor<T>,
            vault_id: VaultId,
            to: T::AccountId,
            amount: Shares,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_transfer_shares(vault_id, &who, &to, amount)
        }

        /// Let `spender` withdraw or redeem up to `amount` of the caller's shares.
        #[pallet::call_index(9)]
        #[pallet::weight(Weight::from_parts(10_000, 0))]
        pub fn approve_shares(
            origin: OriginFor<T>,
            vault_id: VaultId,
            spender: T::AccountId,
            amount: Shares,
        ) -> DispatchResult {
            let who = ensure_signed(origin)?;
            Self::do_approve_shares(vault_id, &who, &spender, amount)
        }
    }

    // =========================================================================
    //                           Internal Functions
    // =========================================================================

    impl<T: Config> Pallet<T> {
        /// Account holding a vault's idle balance
        pub fn pool_account(vault_id: VaultId) -> T::AccountId {
            T::PalletId::get().into_sub_account_truncating(vault_id)
        }

        fn vault(vault_id: VaultId) -> Result<VaultInfo<T>, DispatchError> {
            Vaults::<T>::get(vault_id).ok_or_else(|| Error::<T>::VaultNotFound.into())
        }

        /// Validate a proposed table and bound it to `MaxStrategies`.
        fn checked_allocations(
            strategies: &[StrategyId],
            percentages: &[u128],
            base_unit: u128,
        ) -> Result<AllocationsOf<T>, DispatchError> {
            let entries = allocation::build_allocations(strategies, percentages, base_unit)
                .map_err(Error::<T>::from)?;
            let bounded: AllocationsOf<T> = entries
                .try_into()
                .map_err(|_| Error::<T>::TooManyStrategies)?;

            for entry in bounded.iter() {
                ensure!(
                    T::Strategies::is_registered(entry.strategy),
                    Error::<T>::StrategyNotRegistered
                );
            }

            Ok(bounded)
        }

        // ---------------------------------------------------------------------
        //                          Administration
        // ---------------------------------------------------------------------

        pub fn do_create_vault(
            owner: &T::AccountId,
            asset: T::AssetId,
            base_unit: u128,
            strategies: &[StrategyId],
            percentages: &[u128],
        ) -> Result<VaultId, DispatchError> {
            ensure!(base_unit > 0, Error::<T>::InvalidBaseUnit);
            let allocations = Self::checked_allocations(strategies, percentages, base_unit)?;

            let vault_id = NextVaultId::<T>::get();
            let next = vault_id.checked_add(1).ok_or(Error::<T>::ArithmeticOverflow)?;

            Vaults::<T>::insert(
                vault_id,
                VaultInfo {
                    owner: owner.clone(),
                    asset,
                    base_unit,
                    allocations: allocations.clone(),
                },
            );
            NextVaultId::<T>::put(next);

            log::info!(
                target: LOG_TARGET,
                "🏦 Vault {} created with {} strategies ({} of {} allocated)",
                vault_id,
                allocations.len(),
                allocation::allocated_total(&allocations),
                base_unit
            );

            Self::deposit_event(Event::VaultCreated {
                vault_id,
                owner: owner.clone(),
                asset,
                base_unit,
            });

            Ok(vault_id)
        }

        pub fn do_update_allocations(
            who: &T::AccountId,
            vault_id: VaultId,
            strategies: &[StrategyId],
            percentages: &[u128],
        ) -> DispatchResult {
            let entries = Vaults::<T>::try_mutate(vault_id, |maybe_vault| -> Result<_, DispatchError> {
                let vault = maybe_vault.as_mut().ok_or(Error::<T>::VaultNotFound)?;
                ensure!(vault.owner == *who, Error::<T>::Unauthorized);

                let replacement = Self::checked_allocations(strategies, percentages, vault.base_unit)?;

                // Capital left in a dropped strategy no longer counts towards total assets
                let pool = Self::pool_account(vault_id);
                for old in vault.allocations.iter() {
                    if replacement.iter().any(|entry| entry.strategy == old.strategy) {
                        continue;
                    }
                    let stranded: u128 = T::Strategies::value(old.strategy, &pool, vault.asset).into();
                    if stranded > 0 {
                        log::warn!(
                            target: LOG_TARGET,
                            "⚠️ Vault {} dropped strategy {} which still reports {} under management",
                            vault_id,
                            old.strategy,
                            stranded
                        );
                    }
                }

                vault.allocations = replacement;
                Ok(vault.allocations.to_vec())
            })?;

            log::info!(
                target: LOG_TARGET,
                "⚙️ Vault {} allocation table replaced ({} entries)",
                vault_id,
                entries.len()
            );

            Self::deposit_event(Event::AllocationsUpdated {
                vault_id,
                allocations: entries,
            });

            Ok(())
        }

        pub fn do_update_percent_allocations(
            who: &T::AccountId,
            vault_id: VaultId,
            percentages: &[u128],
        ) -> DispatchResult {
            let vault = Self::vault(vault_id)?;
            let strategies: Vec<StrategyId> =
                vault.allocations.iter().map(|entry| entry.strategy).collect();
            Self::do_update_allocations(who, vault_id, &strategies, percentages)
        }

        pub fn do_transfer_ownership(
            who: &T::AccountId,
            vault_id: VaultId,
            new_owner: T::AccountId,
        ) -> DispatchResult {
            Vaults::<T>::try_mutate(vault_id, |maybe_vault| -> DispatchResult {
                let vault = maybe_vault.as_mut().ok_or(Error::<T>::VaultNotFound)?;
                ensure!(vault.owner == *who, Error::<T>::Unauthorized);
                vault.owner = new_owner.clone();
                Ok(())
            })?;

            Self::deposit_event(Event::OwnershipTransferred {
                vault_id,
                previous_owner: who.clone(),
                new_owner,
            });

            Ok(())
        }

        // ---------------------------------------------------------------------
        //                          Exchange Rate
        // ---------------------------------------------------------------------

        fn idle_of(vault_id: VaultId, vault: &VaultInfo<T>) -> u128 {
            T::Assets::balance(vault.asset, &Self::pool_account(vault_id)).into()
        }

        fn total_assets_of(vault_id: VaultId, vault: &VaultInfo<T>) -> Result<u128, DispatchError> {
            let pool = Self::pool_account(vault_id);
            vault.allocations.iter().try_fold(Self::idle_of(vault_id, vault), |acc, entry| {
                let value: u128 = T::Strategies::value(entry.strategy, &pool, vault.asset).into();
                acc.checked_add(value).ok_or_else(|| Error::<T>::ArithmeticOverflow.into())
            })
        }

        fn convert_to_shares(
            vault_id: VaultId,
            vault: &VaultInfo<T>,
            assets: u128,
            mode: RoundingMode,
        ) -> Result<Shares, DispatchError> {
            let supply = TotalShares::<T>::get(vault_id);
            let total = Self::total_assets_of(vault_id, vault)?;
            Ok(rate::assets_to_shares(assets, supply, total, mode).map_err(Error::<T>::from)?)
        }

        fn convert_to_assets(
            vault_id: VaultId,
            vault: &VaultInfo<T>,
            shares: Shares,
            mode: RoundingMode,
        ) -> Result<u128, DispatchError> {
            let supply = TotalShares::<T>::get(vault_id);
            let total = Self::total_assets_of(vault_id, vault)?;
            Ok(rate::shares_to_assets(shares, supply, total, mode).map_err(Error::<T>::from)?)
        }

        /// Idle balance held by the pool account
        pub fn idle_balance(vault_id: VaultId) -> Result<T::Balance, DispatchError> {
            let vault = Self::vault(vault_id)?;
            Ok(Self::idle_of(vault_id, &vault).into())
        }

        /// Idle balance plus the value every strategy in the table reports
        pub fn total_assets(vault_id: VaultId) -> Result<T::Balance, DispatchError> {
            let vault = Self::vault(vault_id)?;
            Ok(Self::total_assets_of(vault_id, &vault)?.into())
        }

        /// Assets per whole share, scaled by the vault's base unit
        pub fn exchange_rate(vault_id: VaultId) -> Result<u128, DispatchError> {
            let vault = Self::vault(vault_id)?;
            let supply = TotalShares::<T>::get(vault_id);
            let total = Self::total_assets_of(vault_id, &vault)?;
            Ok(rate::exchange_rate(supply, total, vault.base_unit).map_err(Error::<T>::from)?)
        }

        /// Current allocation table in withdrawal order
        pub fn allocation_table(vault_id: VaultId) -> Result<Vec<AllocationEntry>, DispatchError> {
            Ok(Self::vault(vault_id)?.allocations.to_vec())
        }

        /// Shares `deposit(assets)` would mint right now
        pub fn preview_deposit(vault_id: VaultId, assets: T::Balance) -> Result<Shares, DispatchError> {
            let vault = Self::vault(vault_id)?;
            Self::convert_to_shares(vault_id, &vault, assets.into(), RoundingMode::Down)
        }

        /// Assets `mint(shares)` would charge right now
        pub fn preview_mint(vault_id: VaultId, shares: Shares) -> Result<T::Balance, DispatchError> {
            let vault = Self::vault(vault_id)?;
            Ok(Self::convert_to_assets(vault_id, &vault, shares, RoundingMode::Up)?.into())
        }

        /// Shares `withdraw(assets)` would burn if fully served
        pub fn preview_withdraw(vault_id: VaultId, assets: T::Balance) -> Result<Shares, DispatchError> {
            let vault = Self::vault(vault_id)?;
            Self::convert_to_shares(vault_id, &vault, assets.into(), RoundingMode::Up)
        }

        /// Assets `redeem(shares)` targets before any strategy shortfall
        pub fn preview_redeem(vault_id: VaultId, shares: Shares) -> Result<T::Balance, DispatchError> {
            let vault = Self::vault(vault_id)?;
            Ok(Self::convert_to_assets(vault_id, &vault, shares, RoundingMode::Down)?.into())
        }

        // ---------------------------------------------------------------------
        //                          Share Ledger
        // ---------------------------------------------------------------------

        /// Shares held by `who` in a vault
        pub fn share_balance(vault_id: VaultId, who: &T::AccountId) -> Shares {
            ShareBalances::<T>::get(vault_id, who)
        }

        /// Shares `spender` may still burn on behalf of `owner`
        pub fn share_allowance(vault_id: VaultId, owner: &T::AccountId, spender: &T::AccountId) -> Shares {
            ShareAllowances::<T>::get(vault_id, (owner, spender))
        }

        fn mint_shares(vault_id: VaultId, to: &T::AccountId, amount: Shares) -> DispatchResult {
            ShareBalances::<T>::try_mutate(vault_id, to, |balance| -> DispatchResult {
                *balance = balance.checked_add(amount).ok_or(Error::<T>::ArithmeticOverflow)?;
                Ok(())
            })?;

            TotalShares::<T>::try_mutate(vault_id, |total| -> DispatchResult {
                *total = total.checked_add(amount).ok_or(Error::<T>::ArithmeticOverflow)?;
                Ok(())
            })
        }

        fn burn_shares(vault_id: VaultId, from: &T::AccountId, amount: Shares) -> DispatchResult {
            ShareBalances::<T>::try_mutate(vault_id, from, |balance| -> DispatchResult {
                *balance = balance.checked_sub(amount).ok_or(Error::<T>::InsufficientShares)?;
                Ok(())
            })?;

            TotalShares::<T>::try_mutate(vault_id, |total| -> DispatchResult {
                *total = total.checked_sub(amount).ok_or(Error::<T>::ArithmeticOverflow)?;
                Ok(())
            })
        }

        fn ensure_allowance(
            vault_id: VaultId,
            owner: &T::AccountId,
            spender: &T::AccountId,
            amount: Shares,
        ) -> DispatchResult {
            if owner != spender {
                ensure!(
                    Self::share_allowance(vault_id, owner, spender) >= amount,
                    Error::<T>::InsufficientAllowance
                );
            }
            Ok(())
        }

        fn spend_allowance(
            vault_id: VaultId,
            owner: &T::AccountId,
            spender: &T::AccountId,
            amount: Shares,
        ) -> DispatchResult {
            if owner == spender {
                return Ok(());
            }
            ShareAllowances::<T>::try_mutate(vault_id, (owner, spender), |allowance| -> DispatchResult {
                *allowance = allowance.checked_sub(amount).ok_or(Error::<T>::InsufficientAllowance)?;
                Ok(())
            })
        }

        pub fn do_transfer_shares(
            vault_id: VaultId,
            from: &T::AccountId,
            to: &T::AccountId,
            amount: Shares,
        ) -> DispatchResult {
            ensure!(Vaults::<T>::contains_key(vault_id), Error::<T>::VaultNotFound);

            with_storage_layer(|| {
                ShareBalances::<T>::try_mutate(vault_id, from, |balance| -> DispatchResult {
                    *balance = balance.checked_sub(amount).ok_or(Error::<T>::InsufficientShares)?;
                    Ok(())
                })?;

                ShareBalances::<T>::try_mutate(vault_id, to, |balance| -> DispatchResult {
                    *balance = balance.checked_add(amount).ok_or(Error::<T>::ArithmeticOverflow)?;
                    Ok(())
                })
            })?;

            Self::deposit_event(Event::SharesTransferred {
                vault_id,
                from: from.clone(),
                to: to.clone(),
                amount,
            });

            Ok(())
        }

        pub fn do_approve_shares(
            vault_id: VaultId,
            owner: &T::AccountId,
            spender: &T::AccountId,
            amount: Shares,
        ) -> DispatchResult {
            ensure!(Vaults::<T>::contains_key(vault_id), Error::<T>::VaultNotFound);

            ShareAllowances::<T>::insert(vault_id, (owner, spender), amount);

            Self::deposit_event(Event::SharesApproved {
                vault_id,
                owner: owner.clone(),
                spender: spender.clone(),
                amount,
            });

            Ok(())
        }

        // ---------------------------------------------------------------------
        //                        Deposit / Mint Pipeline
        // ---------------------------------------------------------------------

        /// Deposit `assets` from `caller`, minting shares to `receiver`.
        /// Returns the shares minted.
        pub fn do_deposit(
            caller: &T::AccountId,
            vault_id: VaultId,
            assets: T::Balance,
            receiver: &T::AccountId,
        ) -> Result<Shares, DispatchError> {
            with_storage_layer(|| {
                let vault = Self::vault(vault_id)?;

                // Priced before the transfer lands in the pool
                let shares = Self::convert_to_shares(vault_id, &vault, assets.into(), RoundingMode::Down)?;
                ensure!(shares > 0, Error::<T>::ZeroShares);

                Self::pull_and_allocate(caller, vault_id, &vault, assets, receiver, shares)?;

                Ok(shares)
            })
        }

        /// Mint exactly `shares` to `receiver`, charging `caller` their cost
        /// rounded up. Returns the assets charged.
        pub fn do_mint(
            caller: &T::AccountId,
            vault_id: VaultId,
            shares: Shares,
            receiver: &T::AccountId,
        ) -> Result<T::Balance, DispatchError> {
            with_storage_layer(|| {
                let vault = Self::vault(vault_id)?;

                let assets = Self::convert_to_assets(vault_id, &vault, shares, RoundingMode::Up)?;
                ensure!(assets > 0, Error::<T>::ZeroAssets);
                let assets: T::Balance = assets.into();

                Self::pull_and_allocate(caller, vault_id, &vault, assets, receiver, shares)?;

                Ok(assets)
            })
        }

        /// Shared tail of deposit and mint: pull, mint, distribute.
        fn pull_and_allocate(
            caller: &T::AccountId,
            vault_id: VaultId,
            vault: &VaultInfo<T>,
            assets: T::Balance,
            receiver: &T::AccountId,
            shares: Shares,
        ) -> DispatchResult {
            let pool = Self::pool_account(vault_id);

            T::Assets::transfer(vault.asset, caller, &pool, assets, Preservation::Expendable)
                .map_err(|_| Error::<T>::TransferFailed)?;

            Self::mint_shares(vault_id, receiver, shares)?;

            let portions = allocation::split_deposit(assets.into(), &vault.allocations, vault.base_unit)
                .map_err(Error::<T>::from)?;
            for (strategy, portion) in portions {
                if portion == 0 {
                    continue;
                }

                T::Strategies::deposit(strategy, &pool, vault.asset, portion.into()).map_err(|e| {
                    log::error!(
                        target: LOG_TARGET,
                        "❌ Vault {} could not allocate {} to strategy {}: {:?}",
                        vault_id,
                        portion,
                        strategy,
                        e
                    );
                    Error::<T>::StrategyInteractionFailed
                })?;

                Self::deposit_event(Event::CapitalAllocated {
                    vault_id,
                    strategy,
                    amount: portion.into(),
                });
            }

            log::info!(
                target: LOG_TARGET,
                "📥 Vault {}: {} assets in, {} shares to receiver",
                vault_id,
                Into::<u128>::into(assets),
                shares
            );

            Self::deposit_event(Event::Deposited {
                vault_id,
                caller: caller.clone(),
                receiver: receiver.clone(),
                assets,
                shares,
            });

            Ok(())
        }

        // ---------------------------------------------------------------------
        //                       Withdraw / Redeem Pipeline
        // ---------------------------------------------------------------------

        /// Withdraw `assets` of `owner`'s position to `receiver`.
        ///
        /// Burns shares for what was actually recovered at the rate observed
        /// before any liquidity moved. Returns the shares burned.
        pub fn do_withdraw(
            caller: &T::AccountId,
            vault_id: VaultId,
            assets: T::Balance,
            receiver: &T::AccountId,
            owner: &T::AccountId,
        ) -> Result<Shares, DispatchError> {
            with_storage_layer(|| {
                let vault = Self::vault(vault_id)?;
                let requested: u128 = assets.into();
                ensure!(requested > 0, Error::<T>::ZeroAssets);

                let supply = TotalShares::<T>::get(vault_id);
                let total = Self::total_assets_of(vault_id, &vault)?;

                let shares_needed = rate::assets_to_shares(requested, supply, total, RoundingMode::Up)
                    .map_err(Error::<T>::from)?;
                ensure!(
                    Self::share_balance(vault_id, owner) >= shares_needed,
                    Error::<T>::InsufficientShares
                );
                Self::ensure_allowance(vault_id, owner, caller, shares_needed)?;

                let recovered = Self::source_liquidity(vault_id, &vault, requested)?;

                let shares = rate::assets_to_shares(recovered, supply, total, RoundingMode::Up)
                    .map_err(Error::<T>::from)?;

                Self::settle_withdrawal(caller, vault_id, &vault, receiver, owner, requested, recovered, shares)?;

                Ok(shares)
            })
        }

        /// Redeem exactly `shares` of `owner`, paying what could be recovered
        /// of their value to `receiver`. Returns the assets paid.
        pub fn do_redeem(
            caller: &T::AccountId,
            vault_id: VaultId,
            shares: Shares,
            receiver: &T::AccountId,
            owner: &T::AccountId,
        ) -> Result<T::Balance, DispatchError> {
            with_storage_layer(|| {
                let vault = Self::vault(vault_id)?;

                ensure!(
                    Self::share_balance(vault_id, owner) >= shares,
                    Error::<T>::InsufficientShares
                );
                Self::ensure_allowance(vault_id, owner, caller, shares)?;

                let target = Self::convert_to_assets(vault_id, &vault, shares, RoundingMode::Down)?;
                ensure!(target > 0, Error::<T>::ZeroAssets);

                let recovered = Self::source_liquidity(vault_id, &vault, target)?;

                Self::settle_withdrawal(caller, vault_id, &vault, receiver, owner, target, recovered, shares)?;

                Ok(recovered.into())
            })
        }

        /// Gather up to `target` in the pool account: idle first, then each
        /// strategy in table order. Returns the amount available for payout.
        fn source_liquidity(
            vault_id: VaultId,
            vault: &VaultInfo<T>,
            target: u128,
        ) -> Result<u128, DispatchError> {
            let pool = Self::pool_account(vault_id);
            let mut available = Self::idle_of(vault_id, vault);
            if available >= target {
                return Ok(target);
            }

            for entry in vault.allocations.iter() {
                if available >= target {
                    break;
                }

                let reported: u128 = T::Strategies::value(entry.strategy, &pool, vault.asset).into();
                let request = target.saturating_sub(available).min(reported);
                if request == 0 {
                    continue;
                }

                let claimed = T::Strategies::withdraw(entry.strategy, &pool, vault.asset, request.into())
                    .map_err(|e| {
                        log::error!(
                            target: LOG_TARGET,
                            "❌ Vault {} could not recall {} from strategy {}: {:?}",
                            vault_id,
                            request,
                            entry.strategy,
                            e
                        );
                        Error::<T>::StrategyInteractionFailed
                    })?;

                // Count what landed in the pool, not what the strategy claims
                let balance = Self::idle_of(vault_id, vault);
                let received = balance.saturating_sub(available);
                available = balance;

                log::debug!(
                    target: LOG_TARGET,
                    "Vault {} recalled {} of {} from strategy {} (claimed {})",
                    vault_id,
                    received,
                    request,
                    entry.strategy,
                    Into::<u128>::into(claimed)
                );

                Self::deposit_event(Event::CapitalRecalled {
                    vault_id,
                    strategy: entry.strategy,
                    requested: request.into(),
                    received: received.into(),
                });
            }

            if available < target {
                log::warn!(
                    target: LOG_TARGET,
                    "⚠️ Vault {} recovered only {} of {} requested",
                    vault_id,
                    available,
                    target
                );
            }

            Ok(available.min(target))
        }

        /// Shared tail of withdraw and redeem: spend allowance, burn, pay out.
        #[allow(clippy::too_many_arguments)]
        fn settle_withdrawal(
            caller: &T::AccountId,
            vault_id: VaultId,
            vault: &VaultInfo<T>,
            receiver: &T::AccountId,
            owner: &T::AccountId,
            requested: u128,
            recovered: u128,
            shares: Shares,
        ) -> DispatchResult {
            Self::spend_allowance(vault_id, owner, caller, shares)?;
            Self::burn_shares(vault_id, owner, shares)?;

            if recovered > 0 {
                T::Assets::transfer(
                    vault.asset,
                    &Self::pool_account(vault_id),
                    receiver,
                    recovered.into(),
                    Preservation::Expendable,
                )
                .map_err(|_| Error::<T>::TransferFailed)?;
            }

            log::info!(
                target: LOG_TARGET,
                "📤 Vault {}: {} shares burned, {} of {} assets paid out",
                vault_id,
                shares,
                recovered,
                requested
            );

            Self::deposit_event(Event::Withdrawn {
                vault_id,
                caller: caller.clone(),
                receiver: receiver.clone(),
                owner: owner.clone(),
                requested: requested.into(),
                assets: recovered.into(),
                shares,
            });

            Ok(())
        }
    }
}

// =============================================================================
//                       VaultApi Implementation
// =============================================================================

impl<T: Config> VaultApi<T::AccountId> for Pallet<T> {
    type Balance = T::Balance;

    fn deposit(
        vault_id: VaultId,
        who: &T::AccountId,
        assets: Self::Balance,
        receiver: &T::AccountId,
    ) -> Result<Shares, DispatchError> {
        pallet::Pallet::<T>::do_deposit(who, vault_id, assets, receiver)
    }

    fn mint(
        vault_id: VaultId,
        who: &T::AccountId,
        shares: Shares,
        receiver: &T::AccountId,
    ) -> Result<Self::Balance, DispatchError> {
        pallet::Pallet::<T>::do_mint(who, vault_id, shares, receiver)
    }

    fn withdraw(
        vault_id: VaultId,
        who: &T::AccountId,
        assets: Self::Balance,
        receiver: &T::AccountId,
        owner: &T::AccountId,
    ) -> Result<Shares, DispatchError> {
        pallet::Pallet::<T>::do_withdraw(who, vault_id, assets, receiver, owner)
    }

    fn redeem(
        vault_id: VaultId,
        who: &T::AccountId,
        shares: Shares,
        receiver: &T::AccountId,
        owner: &T::AccountId,
    ) -> Result<Self::Balance, DispatchError> {
        pallet::Pallet::<T>::do_redeem(who, vault_id, shares, receiver, owner)
    }

    fn total_assets(vault_id: VaultId) -> Result<Self::Balance, DispatchError> {
        pallet::Pallet::<T>::total_assets(vault_id)
    }

    fn share_balance(vault_id: VaultId, who: &T::AccountId) -> Shares {
        pallet::Pallet::<T>::share_balance(vault_id, who)
    }
}
