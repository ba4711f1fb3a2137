use alloy::primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

/// Point in a fund's lifecycle at which fees are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeHook {
    Continuous,
    /// `investment` is the denomination-asset amount entering the fund.
    PreBuyShares { investment: U256 },
    /// `shares` is the number of shares about to be redeemed.
    PreRedeemShares { shares: U256 },
}

impl FeeHook {
    pub fn name(&self) -> &'static str {
        match self {
            FeeHook::Continuous => "continuous",
            FeeHook::PreBuyShares { .. } => "pre_buy_shares",
            FeeHook::PreRedeemShares { .. } => "pre_redeem_shares",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementType {
    None,
    Mint,
    Burn,
    MintSharesOutstanding,
    BurnSharesOutstanding,
    Direct,
    TransferAsset,
}

/// Instruction produced by a fee engine. `amount` is in shares for the
/// share-based types and in denomination-asset units for `Direct` and
/// `TransferAsset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub settlement_type: SettlementType,
    pub amount: U256,
}

impl Settlement {
    pub const NONE: Settlement = Settlement {
        settlement_type: SettlementType::None,
        amount: U256::ZERO,
    };

    pub fn new(settlement_type: SettlementType, amount: U256) -> Self {
        if amount.is_zero() {
            return Self::NONE;
        }
        Self {
            settlement_type,
            amount,
        }
    }

    pub fn is_none(&self) -> bool {
        self.settlement_type == SettlementType::None
    }
}

/// Side effect the caller must execute against the vault or comptroller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeEffect {
    MintShares { to: Address, amount: U256 },
    BurnShares { from: Address, amount: U256 },
    TransferShares { from: Address, to: Address, amount: U256 },
    TransferAsset { to: Address, amount: U256 },
    /// Taken out of the pending investment or redemption amount. Fund
    /// holdings are unchanged.
    DeductFromFlow { to: Address, amount: U256 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFeeContext {
    Deposit,
    Withdrawal,
    Performance,
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeEvent {
    FundSettingsAdded {
        fees: Vec<Address>,
    },
    ActivatedForFund {
        last_settled_at: u64,
        share_price: U256,
        asset_amount: U256,
    },
    Settled {
        shares_due: U256,
        seconds_since_last_settled: u64,
    },
    PerformanceUpdated {
        prev_aggregate_value_due: U256,
        next_aggregate_value_due: U256,
        shares_outstanding_diff: I256,
    },
    LastSharePriceUpdated {
        prev_share_price: U256,
        next_share_price: U256,
    },
    LastAssetAmountUpdated {
        prev_asset_amount: U256,
        next_asset_amount: U256,
    },
    HighWaterMarkPaidOut {
        prev_high_water_mark: U256,
        next_high_water_mark: U256,
        aggregate_value_due: U256,
    },
    HurdlePaidOut {
        last_share_price: U256,
        last_asset_amount: U256,
        aggregate_value_due: U256,
    },
    FeeSettledForFund {
        hook: FeeHook,
        settlement: Settlement,
    },
    ProtocolFeeCharged {
        context: ProtocolFeeContext,
        dao: Address,
        amount: U256,
        is_shares: bool,
    },
    SharesOutstandingPaidForFund {
        recipient: Address,
        recipient_shares: U256,
        protocol_shares: U256,
        recipient_assets: U256,
        protocol_assets: U256,
    },
    FundDeactivated,
}

/// A [`FeeEvent`] attributed to a fund and, when fee-specific, to a fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundEvent {
    pub fund: Address,
    pub fee: Option<Address>,
    pub event: FeeEvent,
}

/// Result of a single fee payout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutStatus {
    Paid {
        recipient_shares: U256,
        protocol_shares: U256,
        recipient_assets: U256,
        protocol_assets: U256,
    },
    NotYetPayable,
    NothingDue,
}

impl PayoutStatus {
    pub fn is_paid(&self) -> bool {
        matches!(self, PayoutStatus::Paid { .. })
    }
}

/// Everything a coordinator call produced, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeOutcome {
    pub effects: Vec<FeeEffect>,
    pub settlements: Vec<(Address, Settlement)>,
    pub payouts: Vec<(Address, PayoutStatus)>,
    pub events: Vec<FundEvent>,
}

impl FeeOutcome {
    pub fn settlement_for(&self, fee: Address) -> Option<Settlement> {
        self.settlements
            .iter()
            .find(|(id, _)| *id == fee)
            .map(|(_, s)| *s)
    }

    pub fn payout_for(&self, fee: Address) -> Option<&PayoutStatus> {
        self.payouts.iter().find(|(id, _)| *id == fee).map(|(_, p)| p)
    }
}
