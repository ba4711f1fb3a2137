//! Hurdle-rate performance fee.
//!
//! The threshold is the last settled reference grown by the hurdle rate. It
//! is recomputed on every settlement and never ratchets. Share-value mode
//! charges on gains above the threshold and gives back on losses below the
//! reference; a price between the two changes nothing.
//!
//! Two modes use different rate encodings:
//!
//! * [`HurdleMode::ShareValue`]: `rate` and `hurdle_rate` are 18-decimal
//!   fractions, applied to share price. Accrues shares outstanding.
//! * [`HurdleMode::AssetValue`]: `rate` and `hurdle_rate` are whole
//!   percentages divided by 100, applied to the fund's denomination-asset
//!   balance. Accrues an asset amount as a `Direct` settlement.

use alloy::primitives::{I256, U256};
use serde::{Deserialize, Serialize};

use crate::error::FeeError;
use crate::fees::performance::{
    next_aggregate_value_due, projected_share_price, settlement_for_shares_due, share_price,
    shares_due,
};
use crate::fees::{FeeEngine, FeeKind, FundFeeState, SettleInput};
use crate::math::{WAD, mul_div_down, signed_mul_div, signed_sub};
use crate::types::{FeeEvent, FeeHook, ProtocolFeeContext, Settlement, SettlementType};
use crate::vault::FundSnapshot;

const PERCENT: U256 = U256::from_limbs([100, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HurdleMode {
    #[default]
    ShareValue,
    AssetValue,
}

impl HurdleMode {
    /// Unit the rates of this mode are expressed in.
    pub fn rate_unit(&self) -> U256 {
        match self {
            HurdleMode::ShareValue => WAD,
            HurdleMode::AssetValue => PERCENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HurdleFee {
    state: FundFeeState,
    mode: HurdleMode,
}

impl HurdleFee {
    /// Share-value mode; `rate` and `hurdle_rate` are 18-decimal fractions.
    pub fn share_value(rate: U256, hurdle_rate: U256, period: u64) -> Result<Self, FeeError> {
        Self::new(HurdleMode::ShareValue, rate, hurdle_rate, period)
    }

    /// Asset-value mode; `rate_percent` and `hurdle_percent` are whole
    /// percentages (`10` is 10%).
    pub fn asset_value(rate_percent: u64, hurdle_percent: u64, period: u64) -> Result<Self, FeeError> {
        Self::new(
            HurdleMode::AssetValue,
            U256::from(rate_percent),
            U256::from(hurdle_percent),
            period,
        )
    }

    pub fn new(
        mode: HurdleMode,
        rate: U256,
        hurdle_rate: U256,
        period: u64,
    ) -> Result<Self, FeeError> {
        let unit = mode.rate_unit();
        if rate > unit || hurdle_rate > unit {
            return Err(FeeError::InvalidConfiguration(format!(
                "hurdle fee rates ({rate}, {hurdle_rate}) exceed {unit} for {mode:?} mode"
            )));
        }
        Ok(Self {
            state: FundFeeState {
                rate,
                period,
                hurdle_rate,
                ..Default::default()
            },
            mode,
        })
    }

    pub fn mode(&self) -> HurdleMode {
        self.mode
    }

    /// `reference * (1 + hurdle_rate)` in this mode's encoding.
    fn threshold(&self, reference: U256) -> Result<U256, FeeError> {
        let growth = mul_div_down(reference, self.state.hurdle_rate, self.mode.rate_unit())?;
        reference
            .checked_add(growth)
            .ok_or(FeeError::MathOverflow("hurdle threshold"))
    }

    fn settle_share_value(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<Settlement, FeeError> {
        let s = input.snapshot;
        let net = s.net_share_supply();
        if s.gav.is_zero() || net.is_zero() {
            return Ok(Settlement::NONE);
        }

        let price = share_price(s.gav, net)?;
        let last = self.state.last_share_price;
        let threshold = self.threshold(last)?;
        // gains count above the hurdle, losses below the last price
        let price_delta = if price > threshold {
            signed_sub(price, threshold)?
        } else if price < last {
            signed_sub(price, last)?
        } else {
            I256::ZERO
        };
        let value_since_last = signed_mul_div(price_delta, net, WAD)?;
        let value_due = signed_mul_div(value_since_last, self.state.rate, WAD)?;

        let prev_aggregate = self.state.aggregate_value_due;
        let next_aggregate = next_aggregate_value_due(prev_aggregate, value_due, s.gav)?;
        let diff = shares_due(next_aggregate, s.gav, net, input.shares_outstanding)?;
        self.state.aggregate_value_due = next_aggregate;

        tracing::debug!(
            fund = %s.fund,
            share_price = %price,
            threshold = %threshold,
            aggregate = %next_aggregate,
            shares_due = %diff,
            "hurdle fee settled"
        );
        if prev_aggregate != next_aggregate || !diff.is_zero() {
            events.push(FeeEvent::PerformanceUpdated {
                prev_aggregate_value_due: prev_aggregate,
                next_aggregate_value_due: next_aggregate,
                shares_outstanding_diff: diff,
            });
        }
        Ok(settlement_for_shares_due(diff))
    }

    fn settle_asset_value(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<Settlement, FeeError> {
        let s = input.snapshot;
        let threshold = self.threshold(self.state.last_asset_amount)?;
        let performance = signed_sub(s.asset_balance, threshold)?;
        let due = signed_mul_div(performance, self.state.rate, PERCENT)?;
        if due <= I256::ZERO {
            return Ok(Settlement::NONE);
        }

        let prev_aggregate = self.state.aggregate_value_due;
        let next_aggregate = next_aggregate_value_due(prev_aggregate, due, s.gav)?;
        self.state.aggregate_value_due = next_aggregate;

        tracing::debug!(
            fund = %s.fund,
            asset_balance = %s.asset_balance,
            threshold = %threshold,
            asset_value_due = %due,
            "hurdle fee settled"
        );
        events.push(FeeEvent::PerformanceUpdated {
            prev_aggregate_value_due: prev_aggregate,
            next_aggregate_value_due: next_aggregate,
            shares_outstanding_diff: I256::ZERO,
        });
        Ok(Settlement::new(SettlementType::Direct, due.unsigned_abs()))
    }

    fn projected_asset_amount(input: &SettleInput<'_>) -> Result<U256, FeeError> {
        let s = input.snapshot;
        match input.hook {
            FeeHook::Continuous => Ok(s.asset_balance),
            FeeHook::PreBuyShares { investment } => s
                .asset_balance
                .checked_add(investment)
                .ok_or(FeeError::MathOverflow("projected asset amount")),
            FeeHook::PreRedeemShares { shares } => {
                if s.total_supply.is_zero() {
                    return Ok(s.asset_balance);
                }
                let decrease = mul_div_down(s.asset_balance, shares, s.total_supply)?;
                Ok(s.asset_balance.saturating_sub(decrease))
            }
        }
    }
}

impl FeeEngine for HurdleFee {
    fn kind(&self) -> FeeKind {
        FeeKind::Hurdle
    }

    fn settles_on(&self, _hook: &FeeHook) -> bool {
        true
    }

    fn updates_on(&self, _hook: &FeeHook) -> bool {
        true
    }

    fn uses_gav(&self) -> bool {
        true
    }

    fn protocol_fee_context(&self) -> ProtocolFeeContext {
        ProtocolFeeContext::Performance
    }

    fn activate(
        &mut self,
        snapshot: &FundSnapshot,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        self.state.activated = true;
        self.state.activated_at = snapshot.now;
        self.state.last_share_price = snapshot.gross_share_price()?;
        self.state.last_asset_amount = snapshot.asset_balance;
        events.push(FeeEvent::ActivatedForFund {
            last_settled_at: 0,
            share_price: self.state.last_share_price,
            asset_amount: self.state.last_asset_amount,
        });
        Ok(())
    }

    fn settle(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<Settlement, FeeError> {
        match self.mode {
            HurdleMode::ShareValue => self.settle_share_value(input, events),
            HurdleMode::AssetValue => self.settle_asset_value(input, events),
        }
    }

    fn update(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        match self.mode {
            HurdleMode::ShareValue => {
                let prev = self.state.last_share_price;
                let next = projected_share_price(input, prev)?;
                if next != prev {
                    self.state.last_share_price = next;
                    events.push(FeeEvent::LastSharePriceUpdated {
                        prev_share_price: prev,
                        next_share_price: next,
                    });
                }
            }
            HurdleMode::AssetValue => {
                let prev = self.state.last_asset_amount;
                let next = Self::projected_asset_amount(input)?;
                if next != prev {
                    self.state.last_asset_amount = next;
                    events.push(FeeEvent::LastAssetAmountUpdated {
                        prev_asset_amount: prev,
                        next_asset_amount: next,
                    });
                }
            }
        }
        Ok(())
    }

    fn payout_allowed(&self, now: u64) -> bool {
        self.state.period_elapsed(now)
    }

    fn reset_for_payout(&mut self, now: u64, events: &mut Vec<FeeEvent>) {
        events.push(FeeEvent::HurdlePaidOut {
            last_share_price: self.state.last_share_price,
            last_asset_amount: self.state.last_asset_amount,
            aggregate_value_due: self.state.aggregate_value_due,
        });
        self.state.aggregate_value_due = U256::ZERO;
        self.state.last_paid_at = Some(now);
    }

    fn state(&self) -> &FundFeeState {
        &self.state
    }
}
