//! Shared fixtures: an in-memory vault and comptroller that execute the
//! effects the fee manager returns.

#![allow(dead_code)]

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use fee_runtime::{
    Comptroller, FeeEffect, FeeEngineKind, FeeError, FeeEvent, FeeManager, FeeOutcome,
    FixedClock, FundAccounts, ProtocolFeeConfig, ProtocolFeeContext, ProtocolFeeSplitter,
    VaultShares,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

static LOG_INIT: Once = Once::new();

pub fn setup_log() {
    LOG_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const START: u64 = 1_700_000_000;
pub const PERIOD: u64 = 30 * 24 * 3600;

pub fn dispatcher() -> Address {
    Address::repeat_byte(0xD1)
}

pub fn protocol_owner() -> Address {
    Address::repeat_byte(0xAA)
}

pub fn dao() -> Address {
    Address::repeat_byte(0xDA)
}

pub fn investor() -> Address {
    Address::repeat_byte(0x1E)
}

pub fn fund_address(n: u8) -> Address {
    Address::with_last_byte(n)
}

fn address(fill: u8, last: u8) -> Address {
    let mut bytes = [fill; 20];
    bytes[19] = last;
    Address::from(bytes)
}

pub fn accounts_for(n: u8) -> FundAccounts {
    FundAccounts {
        vault: address(n, 0x0A),
        owner: address(n, 0x0B),
    }
}

pub fn fee_id(n: u8) -> Address {
    address(0xFE, n)
}

/// Whole tokens at 18 decimals.
pub fn wad(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000_000_000_000u64)
}

/// 18-decimal fraction from thousandths.
pub fn permille(n: u64) -> U256 {
    U256::from(n) * U256::from(1_000_000_000_000_000u64)
}

#[derive(Debug, Clone)]
pub struct FundBook {
    pub balances: HashMap<Address, U256>,
    pub total_supply: U256,
    pub gav: U256,
    pub gav_valid: bool,
    pub decimals: u8,
}

/// In-memory share and asset ledger for any number of funds.
#[derive(Clone, Default)]
pub struct MockChain {
    funds: Arc<DashMap<Address, FundBook>>,
    received_assets: Arc<DashMap<Address, U256>>,
    gav_delay_ms: Arc<AtomicU64>,
}

impl MockChain {
    pub fn create_fund(&self, fund: Address, decimals: u8) {
        self.funds.insert(
            fund,
            FundBook {
                balances: HashMap::new(),
                total_supply: U256::ZERO,
                gav: U256::ZERO,
                gav_valid: true,
                decimals,
            },
        );
    }

    /// Deposits `assets` for `account` at the current gross share price.
    pub fn deposit(&self, fund: Address, account: Address, assets: U256) -> U256 {
        let mut book = self.funds.get_mut(&fund).expect("fund exists");
        let shares = if book.total_supply.is_zero() || book.gav.is_zero() {
            assets * U256::from(10u64).pow(U256::from(18 - book.decimals))
        } else {
            assets * book.total_supply / book.gav
        };
        *book.balances.entry(account).or_default() += shares;
        book.total_supply += shares;
        book.gav += assets;
        shares
    }

    /// Redeems `shares` from `account`, returning the assets paid out.
    pub fn redeem(&self, fund: Address, account: Address, shares: U256) -> U256 {
        let mut book = self.funds.get_mut(&fund).expect("fund exists");
        let assets = book.gav * shares / book.total_supply;
        *book.balances.entry(account).or_default() -= shares;
        book.total_supply -= shares;
        book.gav -= assets;
        assets
    }

    pub fn set_gav(&self, fund: Address, gav: U256) {
        self.funds.get_mut(&fund).expect("fund exists").gav = gav;
    }

    /// Makes every GAV read block for `delay`.
    pub fn set_gav_delay(&self, delay: Duration) {
        self.gav_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_gav_valid(&self, fund: Address, valid: bool) {
        self.funds.get_mut(&fund).expect("fund exists").gav_valid = valid;
    }

    pub fn balance(&self, fund: Address, account: Address) -> U256 {
        self.funds
            .get(&fund)
            .and_then(|b| b.balances.get(&account).copied())
            .unwrap_or_default()
    }

    pub fn supply(&self, fund: Address) -> U256 {
        self.funds.get(&fund).map(|b| b.total_supply).unwrap_or_default()
    }

    pub fn gav(&self, fund: Address) -> U256 {
        self.funds.get(&fund).map(|b| b.gav).unwrap_or_default()
    }

    pub fn received_assets(&self, account: Address) -> U256 {
        self.received_assets
            .get(&account)
            .map(|v| *v)
            .unwrap_or_default()
    }

    pub fn apply(&self, fund: Address, effects: &[FeeEffect]) {
        let mut book = self.funds.get_mut(&fund).expect("fund exists");
        for effect in effects {
            match effect {
                FeeEffect::MintShares { to, amount } => {
                    *book.balances.entry(*to).or_default() += *amount;
                    book.total_supply += *amount;
                }
                FeeEffect::BurnShares { from, amount } => {
                    *book.balances.entry(*from).or_default() -= *amount;
                    book.total_supply -= *amount;
                }
                FeeEffect::TransferShares { from, to, amount } => {
                    *book.balances.entry(*from).or_default() -= *amount;
                    *book.balances.entry(*to).or_default() += *amount;
                }
                FeeEffect::TransferAsset { to, amount } => {
                    book.gav -= *amount;
                    *self.received_assets.entry(*to).or_default() += *amount;
                }
                FeeEffect::DeductFromFlow { to, amount } => {
                    *self.received_assets.entry(*to).or_default() += *amount;
                }
            }
        }
    }

    fn book(&self, fund: Address) -> Result<Ref<'_, Address, FundBook>, FeeError> {
        self.funds
            .get(&fund)
            .ok_or_else(|| FeeError::Collaborator(format!("no vault for fund {fund}")))
    }
}

impl VaultShares for MockChain {
    fn total_share_supply(&self, fund: Address) -> Result<U256, FeeError> {
        Ok(self.book(fund)?.total_supply)
    }

    fn share_balance(&self, fund: Address, account: Address) -> Result<U256, FeeError> {
        Ok(self
            .book(fund)?
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }
}

impl Comptroller for MockChain {
    fn gross_asset_value(&self, fund: Address) -> Result<(U256, bool), FeeError> {
        let (gav, valid) = {
            let book = self.book(fund)?;
            (book.gav, book.gav_valid)
        };
        let delay = self.gav_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        Ok((gav, valid))
    }

    fn asset_balance(&self, fund: Address) -> Result<U256, FeeError> {
        Ok(self.book(fund)?.gav)
    }

    fn denomination_asset_decimals(&self, fund: Address) -> Result<u8, FeeError> {
        Ok(self.book(fund)?.decimals)
    }
}

pub type TestManager = FeeManager<MockChain, MockChain, Arc<FixedClock>>;

pub struct Harness {
    pub chain: MockChain,
    pub clock: Arc<FixedClock>,
    pub manager: TestManager,
    pub protocol: ProtocolFeeSplitter,
}

impl Harness {
    pub fn new(protocol: ProtocolFeeConfig) -> Self {
        setup_log();
        let chain = MockChain::default();
        let clock = Arc::new(FixedClock::new(START));
        let manager = FeeManager::new(dispatcher(), chain.clone(), chain.clone(), clock.clone());
        let protocol = ProtocolFeeSplitter::with_config(protocol_owner(), protocol)
            .expect("valid protocol config");
        Self {
            chain,
            clock,
            manager,
            protocol,
        }
    }

    pub fn without_protocol_fees() -> Self {
        Self::new(ProtocolFeeConfig {
            dao_address: dao(),
            ..Default::default()
        })
    }

    /// Creates fund `n` seeded with `assets` deposited 1:1, registers
    /// `fees`, and activates them.
    pub fn fund_with_fees(
        &self,
        n: u8,
        assets: U256,
        fees: Vec<(Address, FeeEngineKind)>,
    ) -> Address {
        let fund = fund_address(n);
        self.chain.create_fund(fund, 18);
        if !assets.is_zero() {
            self.chain.deposit(fund, investor(), assets);
        }
        self.manager
            .add_fund_settings(dispatcher(), fund, accounts_for(n), fees)
            .expect("register fees");
        self.manager
            .activate_for_fund(dispatcher(), fund)
            .expect("activate fees");
        fund
    }

    pub fn continuous(&self, fund: Address) -> Result<FeeOutcome, FeeError> {
        let outcome = self
            .manager
            .invoke_continuous_hook(dispatcher(), fund, &self.protocol)?;
        self.chain.apply(fund, &outcome.effects);
        Ok(outcome)
    }

    /// Runs the buy hook, applies fee effects, then deposits the investment
    /// net of the deposit skim. Returns the outcome and shares received.
    pub fn buy_shares(
        &self,
        fund: Address,
        investment: U256,
    ) -> Result<(FeeOutcome, U256), FeeError> {
        let outcome = self
            .manager
            .invoke_pre_buy_shares_hook(dispatcher(), fund, investment, &self.protocol)?;
        let skim = deducted_from_flow(&outcome);
        self.chain.apply(fund, &outcome.effects);
        let shares = self.chain.deposit(fund, investor(), investment - skim);
        Ok((outcome, shares))
    }

    /// Runs the redeem hook, applies fee effects, then redeems.
    pub fn redeem_shares(
        &self,
        fund: Address,
        shares: U256,
    ) -> Result<(FeeOutcome, U256), FeeError> {
        let outcome = self
            .manager
            .invoke_pre_redeem_shares_hook(dispatcher(), fund, shares, &self.protocol)?;
        let skim = deducted_from_flow(&outcome);
        self.chain.apply(fund, &outcome.effects);
        let assets = self.chain.redeem(fund, investor(), shares);
        Ok((outcome, assets - skim))
    }

    pub fn payout(&self, fund: Address, fees: &[Address]) -> Result<FeeOutcome, FeeError> {
        let outcome = self.manager.payout_shares_outstanding_for_fees(
            dispatcher(),
            fund,
            fees,
            &self.protocol,
        )?;
        self.chain.apply(fund, &outcome.effects);
        Ok(outcome)
    }
}

/// Total protocol skim charged on fund entry or exit in `outcome`.
pub fn protocol_charged(outcome: &FeeOutcome, context: ProtocolFeeContext) -> U256 {
    outcome
        .events
        .iter()
        .filter_map(|e| match &e.event {
            FeeEvent::ProtocolFeeCharged {
                context: c, amount, ..
            } if *c == context && e.fee.is_none() => Some(*amount),
            _ => None,
        })
        .fold(U256::ZERO, |acc, v| acc + v)
}

/// Total taken out of the pending investment or redemption in `outcome`.
pub fn deducted_from_flow(outcome: &FeeOutcome) -> U256 {
    outcome
        .effects
        .iter()
        .filter_map(|e| match e {
            FeeEffect::DeductFromFlow { amount, .. } => Some(*amount),
            _ => None,
        })
        .fold(U256::ZERO, |acc, v| acc + v)
}
