//! Read-only view of the vault and comptroller a fund is attached to.
//!
//! The fee engines never mint, burn or transfer. They read through these
//! traits and return [`FeeEffect`]s for the caller to execute.

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FeeError;
use crate::math::mul_div_down;
use crate::types::FeeEffect;

pub trait VaultShares {
    fn total_share_supply(&self, fund: Address) -> Result<U256, FeeError>;
    fn share_balance(&self, fund: Address, account: Address) -> Result<U256, FeeError>;
}

pub trait Comptroller {
    /// Gross asset value and whether every price that went into it was valid.
    fn gross_asset_value(&self, fund: Address) -> Result<(U256, bool), FeeError>;
    /// Balance of the denomination asset held by the fund.
    fn asset_balance(&self, fund: Address) -> Result<U256, FeeError>;
    fn denomination_asset_decimals(&self, fund: Address) -> Result<u8, FeeError>;
}

pub trait Clock {
    fn now(&self) -> u64;
}

/// Wall-clock time in unix seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Settable clock for deterministic callers.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> u64 {
        (**self).now()
    }
}

/// Collaborator state captured once at hook entry and adjusted as
/// settlements produce effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundSnapshot {
    pub fund: Address,
    pub vault: Address,
    pub total_supply: U256,
    /// Shares held by the vault itself as unpaid fee outstanding.
    pub vault_held_shares: U256,
    pub gav: U256,
    pub asset_balance: U256,
    pub asset_decimals: u8,
    pub now: u64,
}

impl FundSnapshot {
    pub fn capture<V, C, K>(
        fund: Address,
        vault: Address,
        shares: &V,
        comptroller: &C,
        clock: &K,
        require_valid_gav: bool,
    ) -> Result<Self, FeeError>
    where
        V: VaultShares + ?Sized,
        C: Comptroller + ?Sized,
        K: Clock + ?Sized,
    {
        let total_supply = shares.total_share_supply(fund)?;
        let vault_held_shares = shares.share_balance(fund, vault)?;
        let (gav, valid) = comptroller.gross_asset_value(fund)?;
        if require_valid_gav && !valid {
            tracing::warn!(fund = %fund, "gav reported invalid");
            return Err(FeeError::InvalidGav(fund));
        }
        Ok(Self {
            fund,
            vault,
            total_supply,
            vault_held_shares,
            gav,
            asset_balance: comptroller.asset_balance(fund)?,
            asset_decimals: comptroller.denomination_asset_decimals(fund)?,
            now: clock.now(),
        })
    }

    /// Total supply minus the vault's self-held fee shares.
    pub fn net_share_supply(&self) -> U256 {
        self.total_supply.saturating_sub(self.vault_held_shares)
    }

    /// One unit of the denomination asset.
    pub fn asset_unit(&self) -> Result<U256, FeeError> {
        U256::from(10u64)
            .checked_pow(U256::from(self.asset_decimals))
            .ok_or(FeeError::MathOverflow("asset_unit"))
    }

    /// `gav / total_supply` in 18-decimal fixed point, or one asset unit for
    /// an empty fund.
    pub fn gross_share_price(&self) -> Result<U256, FeeError> {
        if self.total_supply.is_zero() || self.gav.is_zero() {
            return self.asset_unit();
        }
        mul_div_down(self.gav, crate::math::WAD, self.total_supply)
    }

    pub fn apply(&mut self, effect: &FeeEffect) -> Result<(), FeeError> {
        let underflow = || FeeError::InvariantViolation("effect exceeds fund balance".into());
        match effect {
            FeeEffect::MintShares { to, amount } => {
                self.total_supply = self
                    .total_supply
                    .checked_add(*amount)
                    .ok_or(FeeError::MathOverflow("mint shares"))?;
                if *to == self.vault {
                    self.vault_held_shares += *amount;
                }
            }
            FeeEffect::BurnShares { from, amount } => {
                self.total_supply = self.total_supply.checked_sub(*amount).ok_or_else(underflow)?;
                if *from == self.vault {
                    self.vault_held_shares =
                        self.vault_held_shares.checked_sub(*amount).ok_or_else(underflow)?;
                }
            }
            FeeEffect::TransferShares { from, to, amount } => {
                if *from == self.vault {
                    self.vault_held_shares =
                        self.vault_held_shares.checked_sub(*amount).ok_or_else(underflow)?;
                }
                if *to == self.vault {
                    self.vault_held_shares += *amount;
                }
            }
            FeeEffect::TransferAsset { amount, .. } => {
                self.gav = self.gav.checked_sub(*amount).ok_or_else(underflow)?;
                self.asset_balance = self.asset_balance.saturating_sub(*amount);
            }
            FeeEffect::DeductFromFlow { .. } => {}
        }
        Ok(())
    }
}
