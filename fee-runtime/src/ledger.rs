use alloy::primitives::{Address, U256};
use std::collections::HashMap;

use crate::error::FeeError;

/// Per-fund record of what each fee has accrued but not yet paid: shares
/// held by the vault itself, and asset value from `Direct` settlements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharesOutstandingLedger {
    shares: HashMap<Address, U256>,
    assets: HashMap<Address, U256>,
}

impl SharesOutstandingLedger {
    pub fn shares(&self, fee: Address) -> U256 {
        self.shares.get(&fee).copied().unwrap_or_default()
    }

    pub fn assets(&self, fee: Address) -> U256 {
        self.assets.get(&fee).copied().unwrap_or_default()
    }

    pub fn credit_shares(&mut self, fee: Address, amount: U256) -> Result<(), FeeError> {
        let entry = self.shares.entry(fee).or_default();
        *entry = entry
            .checked_add(amount)
            .ok_or(FeeError::MathOverflow("credit shares outstanding"))?;
        Ok(())
    }

    pub fn debit_shares(&mut self, fee: Address, amount: U256) -> Result<(), FeeError> {
        let current = self.shares(fee);
        let next = current.checked_sub(amount).ok_or_else(|| {
            FeeError::InvariantViolation(format!(
                "burning {amount} shares outstanding for fee {fee} with only {current}"
            ))
        })?;
        self.shares.insert(fee, next);
        Ok(())
    }

    pub fn credit_assets(&mut self, fee: Address, amount: U256) -> Result<(), FeeError> {
        let entry = self.assets.entry(fee).or_default();
        *entry = entry
            .checked_add(amount)
            .ok_or(FeeError::MathOverflow("credit assets outstanding"))?;
        Ok(())
    }

    /// Removes and returns `(shares, assets)` outstanding for `fee`.
    pub fn take(&mut self, fee: Address) -> (U256, U256) {
        (
            self.shares.remove(&fee).unwrap_or_default(),
            self.assets.remove(&fee).unwrap_or_default(),
        )
    }
}
