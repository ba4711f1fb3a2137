//! Protocol-level skim applied to every fee amount before it reaches the
//! fund owner.

use alloy::primitives::{Address, U256};

use crate::error::FeeError;
use crate::math::{WAD, mul_div_down};
use crate::types::ProtocolFeeContext;

/// The four protocol rates, each an 18-decimal fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolFeeConfig {
    pub deposit: U256,
    pub withdrawal: U256,
    pub performance: U256,
    pub streaming: U256,
    pub dao_address: Address,
}

impl ProtocolFeeConfig {
    pub fn new(
        deposit: U256,
        withdrawal: U256,
        performance: U256,
        streaming: U256,
        dao_address: Address,
    ) -> Self {
        Self {
            deposit,
            withdrawal,
            performance,
            streaming,
            dao_address,
        }
    }

    pub fn rate(&self, context: ProtocolFeeContext) -> U256 {
        match context {
            ProtocolFeeContext::Deposit => self.deposit,
            ProtocolFeeContext::Withdrawal => self.withdrawal,
            ProtocolFeeContext::Performance => self.performance,
            ProtocolFeeContext::Streaming => self.streaming,
        }
    }

    pub fn validate(&self) -> Result<(), FeeError> {
        for (name, rate) in [
            ("deposit", self.deposit),
            ("withdrawal", self.withdrawal),
            ("performance", self.performance),
            ("streaming", self.streaming),
        ] {
            if rate > WAD {
                return Err(FeeError::InvalidConfiguration(format!(
                    "protocol {name} rate {rate} above 100%"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeSplit {
    pub protocol_cut: U256,
    pub recipient_cut: U256,
}

#[derive(Debug, Clone)]
pub struct ProtocolFeeSplitter {
    owner: Address,
    config: ProtocolFeeConfig,
}

impl ProtocolFeeSplitter {
    /// All rates start at zero with the owner as treasury.
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            config: ProtocolFeeConfig {
                dao_address: owner,
                ..Default::default()
            },
        }
    }

    pub fn with_config(owner: Address, config: ProtocolFeeConfig) -> Result<Self, FeeError> {
        config.validate()?;
        Ok(Self { owner, config })
    }

    pub fn add_fee_settings(
        &mut self,
        caller: Address,
        config: ProtocolFeeConfig,
    ) -> Result<(), FeeError> {
        if caller != self.owner {
            tracing::warn!(caller = %caller, "rejected protocol fee settings update");
            return Err(FeeError::Unauthorized {
                caller,
                expected: self.owner,
            });
        }
        config.validate()?;
        tracing::info!(
            dao = %config.dao_address,
            deposit = %config.deposit,
            withdrawal = %config.withdrawal,
            performance = %config.performance,
            streaming = %config.streaming,
            "protocol fee settings updated"
        );
        self.config = config;
        Ok(())
    }

    pub fn dao_address(&self) -> Address {
        self.config.dao_address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn config(&self) -> &ProtocolFeeConfig {
        &self.config
    }

    /// `protocol_cut = amount * rate / 1e18`, `recipient_cut` is the rest.
    pub fn split(&self, context: ProtocolFeeContext, amount: U256) -> Result<FeeSplit, FeeError> {
        let protocol_cut = mul_div_down(amount, self.config.rate(context), WAD)?;
        Ok(FeeSplit {
            protocol_cut,
            recipient_cut: amount - protocol_cut,
        })
    }
}
