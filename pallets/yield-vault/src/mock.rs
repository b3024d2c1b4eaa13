//! Test runtime for the yield vault pallet.

use crate as pallet_yield_vault;
use crate::StrategyInterface;
use frame_support::{
    assert_ok, construct_runtime, derive_impl, parameter_types,
    traits::{
        fungibles::{Inspect, Mutate},
        tokens::Preservation,
        AsEnsureOriginWithArg, ConstU128, ConstU32,
    },
    PalletId,
};
use frame_system::{EnsureRoot, EnsureSigned};
use sp_runtime::{traits::IdentityLookup, BuildStorage, DispatchError};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use codec::Encode;
use yield_vault_primitives::{StrategyId, VaultId, BASE_UNIT_18, DEFAULT_MAX_STRATEGIES};

pub type AccountId = u128;
pub type Balance = u128;
pub type AssetId = u32;

type Block = frame_system::mocking::MockBlock<Test>;

pub const ALICE: AccountId = 1;
pub const BOB: AccountId = 2;
pub const CHARLIE: AccountId = 3;
/// Receives funds drained out of strategies
pub const SINK: AccountId = 999;

pub const ASSET: AssetId = 1;
pub const UNIT: Balance = BASE_UNIT_18;

pub const PCT_100: u128 = UNIT;
pub const PCT_95: u128 = 950_000_000_000_000_000;
pub const PCT_50: u128 = 500_000_000_000_000_000;
pub const PCT_30: u128 = 300_000_000_000_000_000;
pub const PCT_20: u128 = 200_000_000_000_000_000;

construct_runtime!(
    pub enum Test {
        System: frame_system,
        Balances: pallet_balances,
        Assets: pallet_assets,
        Vault: pallet_yield_vault,
    }
);

#[derive_impl(frame_system::config_preludes::TestDefaultConfig)]
impl frame_system::Config for Test {
    type Block = Block;
    type AccountId = AccountId;
    type Lookup = IdentityLookup<AccountId>;
    type AccountData = pallet_balances::AccountData<Balance>;
}

impl pallet_balances::Config for Test {
    type MaxLocks = ConstU32<50>;
    type MaxReserves = ConstU32<50>;
    type ReserveIdentifier = [u8; 8];
    type Balance = Balance;
    type RuntimeEvent = RuntimeEvent;
    type DustRemoval = ();
    type ExistentialDeposit = ConstU128<1>;
    type AccountStore = System;
    type WeightInfo = ();
    type FreezeIdentifier = ();
    type MaxFreezes = ConstU32<0>;
    type RuntimeHoldReason = ();
    type RuntimeFreezeReason = ();
    type DoneSlashHandler = ();
}

impl pallet_assets::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type Balance = Balance;
    type AssetId = AssetId;
    type AssetIdParameter = codec::Compact<AssetId>;
    type Currency = Balances;
    type CreateOrigin = AsEnsureOriginWithArg<EnsureSigned<AccountId>>;
    type ForceOrigin = EnsureRoot<AccountId>;
    type AssetDeposit = ConstU128<1>;
    type AssetAccountDeposit = ConstU128<1>;
    type MetadataDepositBase = ConstU128<1>;
    type MetadataDepositPerByte = ConstU128<1>;
    type ApprovalDeposit = ConstU128<1>;
    type StringLimit = ConstU32<50>;
    type Freezer = ();
    type Extra = ();
    type WeightInfo = ();
    type Holder = ();
    type CallbackHandle = ();
    type RemoveItemsLimit = ConstU32<1000>;
}

parameter_types! {
    pub const VaultPalletId: PalletId = PalletId(*b"py/vault");
}

impl pallet_yield_vault::Config for Test {
    type RuntimeEvent = RuntimeEvent;
    type Balance = Balance;
    type AssetId = AssetId;
    type Assets = Assets;
    type Strategies = MockStrategies;
    type PalletId = VaultPalletId;
    type MaxStrategies = ConstU32<{ DEFAULT_MAX_STRATEGIES }>;
}

// =============================================================================
//                            Mock Strategies
// =============================================================================

/// Strategies 0..REGISTERED_STRATEGIES exist. Every (strategy, holder) pair
/// keeps its position in its own account, so vaults sharing a strategy never
/// see each other's capital.
pub const REGISTERED_STRATEGIES: StrategyId = 4;

thread_local! {
    static REPORTED_VALUES: RefCell<BTreeMap<(StrategyId, AccountId), Balance>> = RefCell::new(BTreeMap::new());
    static FAILING: RefCell<BTreeSet<StrategyId>> = RefCell::new(BTreeSet::new());
}

pub struct MockStrategies;

impl MockStrategies {
    /// Account holding `holder`'s position in `strategy`
    pub fn position_account(strategy: StrategyId, holder: &AccountId) -> AccountId {
        AccountId::from_le_bytes(sp_io::hashing::blake2_128(&(b"strategy", strategy, holder).encode()))
    }

    /// Assets the strategy actually holds for `vault_id`
    pub fn held(strategy: StrategyId, vault_id: VaultId) -> Balance {
        let account = Self::position_account(strategy, &Vault::pool_account(vault_id));
        <Assets as Inspect<AccountId>>::balance(ASSET, &account)
    }

    /// Make the strategy report `value` for `vault_id` no matter what it holds
    pub fn set_value(strategy: StrategyId, vault_id: VaultId, value: Balance) {
        let holder = Vault::pool_account(vault_id);
        REPORTED_VALUES.with(|v| v.borrow_mut().insert((strategy, holder), value));
    }

    pub fn set_failing(strategy: StrategyId, failing: bool) {
        FAILING.with(|f| {
            if failing {
                f.borrow_mut().insert(strategy);
            } else {
                f.borrow_mut().remove(&strategy);
            }
        });
    }

    /// Lose `amount` out of `vault_id`'s position
    pub fn drain(strategy: StrategyId, vault_id: VaultId, amount: Balance) {
        let account = Self::position_account(strategy, &Vault::pool_account(vault_id));
        assert_ok!(<Assets as Mutate<AccountId>>::transfer(
            ASSET,
            &account,
            &SINK,
            amount,
            Preservation::Expendable,
        ));
    }

    /// Grow `vault_id`'s position by `amount`
    pub fn accrue(strategy: StrategyId, vault_id: VaultId, amount: Balance) {
        let account = Self::position_account(strategy, &Vault::pool_account(vault_id));
        assert_ok!(<Assets as Mutate<AccountId>>::mint_into(ASSET, &account, amount));
    }

    pub fn reset() {
        REPORTED_VALUES.with(|v| v.borrow_mut().clear());
        FAILING.with(|f| f.borrow_mut().clear());
    }

    fn ensure_live(strategy: StrategyId) -> Result<(), DispatchError> {
        if FAILING.with(|f| f.borrow().contains(&strategy)) {
            return Err(DispatchError::Other("strategy unavailable"));
        }
        Ok(())
    }
}

impl StrategyInterface<AccountId> for MockStrategies {
    type AssetId = AssetId;
    type Balance = Balance;

    fn is_registered(strategy: StrategyId) -> bool {
        strategy < REGISTERED_STRATEGIES
    }

    fn deposit(
        strategy: StrategyId,
        holder: &AccountId,
        asset: AssetId,
        amount: Balance,
    ) -> Result<(), DispatchError> {
        Self::ensure_live(strategy)?;
        <Assets as Mutate<AccountId>>::transfer(
            asset,
            holder,
            &Self::position_account(strategy, holder),
            amount,
            Preservation::Expendable,
        )?;
        Ok(())
    }

    fn withdraw(
        strategy: StrategyId,
        holder: &AccountId,
        asset: AssetId,
        amount: Balance,
    ) -> Result<Balance, DispatchError> {
        Self::ensure_live(strategy)?;
        let account = Self::position_account(strategy, holder);
        let out = amount.min(<Assets as Inspect<AccountId>>::balance(asset, &account));
        if out > 0 {
            <Assets as Mutate<AccountId>>::transfer(asset, &account, holder, out, Preservation::Expendable)?;
        }
        Ok(out)
    }

    fn value(strategy: StrategyId, holder: &AccountId, asset: AssetId) -> Balance {
        REPORTED_VALUES
            .with(|v| v.borrow().get(&(strategy, *holder)).copied())
            .unwrap_or_else(|| {
                <Assets as Inspect<AccountId>>::balance(asset, &Self::position_account(strategy, holder))
            })
    }
}

// =============================================================================
//                            Externalities
// =============================================================================

fn build_ext(storage: sp_runtime::Storage) -> sp_io::TestExternalities {
    MockStrategies::reset();
    let mut ext = sp_io::TestExternalities::new(storage);
    ext.execute_with(|| {
        System::set_block_number(1);
        assert_ok!(Assets::force_create(RuntimeOrigin::root(), ASSET.into(), ALICE, true, 1));
        for who in [ALICE, BOB, CHARLIE] {
            assert_ok!(<Assets as Mutate<AccountId>>::mint_into(ASSET, &who, 10 * UNIT));
        }
    });
    ext
}

/// ALICE, BOB and CHARLIE each hold 10 units of ASSET
pub fn new_test_ext() -> sp_io::TestExternalities {
    let storage = frame_system::GenesisConfig::<Test>::default()
        .build_storage()
        .unwrap();
    build_ext(storage)
}

pub fn new_test_ext_with_vaults(
    vaults: Vec<pallet_yield_vault::GenesisVault<AccountId, AssetId>>,
) -> sp_io::TestExternalities {
    let mut storage = frame_system::GenesisConfig::<Test>::default()
        .build_storage()
        .unwrap();
    pallet_yield_vault::GenesisConfig::<Test> { vaults }
        .assimilate_storage(&mut storage)
        .unwrap();
    build_ext(storage)
}

/// ALICE creates a vault sending 95% of each deposit to strategy 0
pub fn create_default_vault() -> VaultId {
    create_vault_with(&[0], &[PCT_95])
}

pub fn create_vault_with(strategies: &[StrategyId], percentages: &[u128]) -> VaultId {
    let vault_id = Vault::next_vault_id();
    assert_ok!(Vault::create_vault(
        RuntimeOrigin::signed(ALICE),
        ASSET,
        UNIT,
        strategies.to_vec(),
        percentages.to_vec(),
    ));
    vault_id
}

pub fn asset_balance(who: AccountId) -> Balance {
    <Assets as Inspect<AccountId>>::balance(ASSET, &who)
}
