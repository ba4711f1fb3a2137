//! Human-readable fee settings.
//!
//! Rates are written as decimal fractions (`"0.002"` is 0.2%) and converted
//! to 18-decimal fixed point on the way in. The asset-value hurdle mode is
//! the exception: its rates are whole percentages (`"10"` is 10%).
//!
//! ```json
//! {
//!   "vault": "0x…", "owner": "0x…",
//!   "fees": [
//!     { "id": "0x…", "kind": "streaming", "annual_rate": "0.005" },
//!     { "id": "0x…", "kind": "high_water_mark", "rate": "0.1", "period": 2592000 },
//!     { "id": "0x…", "kind": "hurdle", "rate": "0.1", "hurdle_rate": "0.05",
//!       "period": 2592000, "mode": "share_value" }
//!   ]
//! }
//! ```

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::FeeError;
use crate::fees::{FeeEngineKind, HighWaterMarkFee, HurdleFee, HurdleMode, StreamingFee};
use crate::manager::FundAccounts;
use crate::protocol_fee::{ProtocolFeeConfig, ProtocolFeeSplitter};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolFeeSettings {
    pub owner: String,
    pub dao_address: String,
    #[serde(default)]
    pub deposit: Decimal,
    #[serde(default)]
    pub withdrawal: Decimal,
    #[serde(default)]
    pub performance: Decimal,
    #[serde(default)]
    pub streaming: Decimal,
}

impl ProtocolFeeSettings {
    pub fn from_json(json: &str) -> Result<Self, FeeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads `PROTOCOL_FEE_{OWNER,DAO_ADDRESS,DEPOSIT,WITHDRAW,PERFORM,STREAM}`.
    /// Missing rates default to zero.
    pub fn from_env() -> Result<Self, FeeError> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| FeeError::ConfigError(format!("{key} not set")))
        };
        let rate = |key: &str| -> Result<Decimal, FeeError> {
            match std::env::var(key) {
                Ok(v) => Decimal::from_str(v.trim())
                    .map_err(|e| FeeError::ConfigError(format!("{key}: {e}"))),
                Err(_) => Ok(Decimal::ZERO),
            }
        };
        Ok(Self {
            owner: required("PROTOCOL_FEE_OWNER")?,
            dao_address: required("PROTOCOL_FEE_DAO_ADDRESS")?,
            deposit: rate("PROTOCOL_FEE_DEPOSIT")?,
            withdrawal: rate("PROTOCOL_FEE_WITHDRAW")?,
            performance: rate("PROTOCOL_FEE_PERFORM")?,
            streaming: rate("PROTOCOL_FEE_STREAM")?,
        })
    }

    pub fn to_config(&self) -> Result<ProtocolFeeConfig, FeeError> {
        let config = ProtocolFeeConfig::new(
            decimal_to_wad(&self.deposit)?,
            decimal_to_wad(&self.withdrawal)?,
            decimal_to_wad(&self.performance)?,
            decimal_to_wad(&self.streaming)?,
            parse_address("dao_address", &self.dao_address)?,
        );
        config.validate()?;
        Ok(config)
    }

    pub fn to_splitter(&self) -> Result<ProtocolFeeSplitter, FeeError> {
        ProtocolFeeSplitter::with_config(parse_address("owner", &self.owner)?, self.to_config()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeeSettings {
    Streaming {
        annual_rate: Decimal,
    },
    HighWaterMark {
        rate: Decimal,
        period: u64,
    },
    Hurdle {
        rate: Decimal,
        hurdle_rate: Decimal,
        period: u64,
        #[serde(default)]
        mode: HurdleMode,
    },
}

impl FeeSettings {
    pub fn to_engine(&self) -> Result<FeeEngineKind, FeeError> {
        Ok(match self {
            FeeSettings::Streaming { annual_rate } => {
                StreamingFee::from_annual_rate(decimal_to_wad(annual_rate)?)?.into()
            }
            FeeSettings::HighWaterMark { rate, period } => {
                HighWaterMarkFee::new(decimal_to_wad(rate)?, *period)?.into()
            }
            FeeSettings::Hurdle {
                rate,
                hurdle_rate,
                period,
                mode,
            } => {
                let (rate, hurdle_rate) = match mode {
                    HurdleMode::ShareValue => {
                        (decimal_to_wad(rate)?, decimal_to_wad(hurdle_rate)?)
                    }
                    HurdleMode::AssetValue => {
                        (whole_percent(rate)?, whole_percent(hurdle_rate)?)
                    }
                };
                HurdleFee::new(*mode, rate, hurdle_rate, *period)?.into()
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeEntry {
    pub id: String,
    #[serde(flatten)]
    pub settings: FeeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundFeeSettings {
    pub vault: String,
    pub owner: String,
    pub fees: Vec<FeeEntry>,
}

impl FundFeeSettings {
    pub fn from_json(json: &str) -> Result<Self, FeeError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Arguments for [`crate::FeeManager::add_fund_settings`].
    pub fn to_registration(
        &self,
    ) -> Result<(FundAccounts, Vec<(Address, FeeEngineKind)>), FeeError> {
        let accounts = FundAccounts {
            vault: parse_address("vault", &self.vault)?,
            owner: parse_address("owner", &self.owner)?,
        };
        let fees = self
            .fees
            .iter()
            .map(|entry| Ok((parse_address("fee id", &entry.id)?, entry.settings.to_engine()?)))
            .collect::<Result<Vec<_>, FeeError>>()?;
        Ok((accounts, fees))
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, FeeError> {
    value
        .parse::<Address>()
        .map_err(|e| FeeError::ConfigError(format!("invalid {field} address {value}: {e}")))
}

/// Decimal fraction to 18-decimal fixed point, truncated.
pub fn decimal_to_wad(d: &Decimal) -> Result<U256, FeeError> {
    let scaled = d
        .checked_mul(Decimal::from(1_000_000_000_000_000_000u64))
        .ok_or_else(|| FeeError::InvalidConfiguration(format!("rate {d} out of range")))?;
    decimal_to_u256(&scaled)
}

fn whole_percent(d: &Decimal) -> Result<U256, FeeError> {
    if !d.fract().is_zero() {
        return Err(FeeError::InvalidConfiguration(format!(
            "asset-value hurdle rates are whole percentages, got {d}"
        )));
    }
    decimal_to_u256(d)
}

fn decimal_to_u256(d: &Decimal) -> Result<U256, FeeError> {
    let int_str = d.trunc().to_string();
    if int_str.starts_with('-') {
        return Err(FeeError::InvalidConfiguration(format!("negative rate {d}")));
    }
    U256::from_str_radix(&int_str, 10)
        .map_err(|e| FeeError::ConfigError(format!("Decimal→U256 conversion failed: {e}")))
}
