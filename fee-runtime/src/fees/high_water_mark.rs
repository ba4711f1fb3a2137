use alloy::primitives::U256;

use crate::error::FeeError;
use crate::fees::performance::{
    next_aggregate_value_due, projected_share_price, settlement_for_shares_due, share_price,
    shares_due,
};
use crate::fees::{FeeEngine, FeeKind, FundFeeState, SettleInput};
use crate::math::{WAD, signed_mul_div, signed_sub};
use crate::types::{FeeEvent, FeeHook, ProtocolFeeContext, Settlement};
use crate::vault::FundSnapshot;

/// Performance fee on share-price gains above the all-time high settled
/// price. Accrues as shares held by the vault until the period elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighWaterMarkFee {
    state: FundFeeState,
}

impl HighWaterMarkFee {
    /// `rate` is an 18-decimal fraction of value gained.
    pub fn new(rate: U256, period: u64) -> Result<Self, FeeError> {
        if rate > WAD {
            return Err(FeeError::InvalidConfiguration(format!(
                "performance rate {rate} above 100%"
            )));
        }
        Ok(Self {
            state: FundFeeState {
                rate,
                period,
                ..Default::default()
            },
        })
    }

    pub fn high_water_mark(&self) -> U256 {
        self.state.high_water_mark
    }
}

impl FeeEngine for HighWaterMarkFee {
    fn kind(&self) -> FeeKind {
        FeeKind::HighWaterMark
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
        let price = snapshot.gross_share_price()?;
        self.state.activated = true;
        self.state.activated_at = snapshot.now;
        self.state.last_share_price = price;
        self.state.high_water_mark = price;
        events.push(FeeEvent::ActivatedForFund {
            last_settled_at: 0,
            share_price: price,
            asset_amount: U256::ZERO,
        });
        Ok(())
    }

    fn settle(
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
        let threshold = self.state.high_water_mark.max(self.state.last_share_price);
        let value_since_last = signed_mul_div(signed_sub(price, threshold)?, net, WAD)?;
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
            "high-water-mark fee settled"
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

    fn update(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        let prev = self.state.last_share_price;
        let next = projected_share_price(input, prev)?;
        if next != prev {
            self.state.last_share_price = next;
            events.push(FeeEvent::LastSharePriceUpdated {
                prev_share_price: prev,
                next_share_price: next,
            });
        }
        Ok(())
    }

    fn payout_allowed(&self, now: u64) -> bool {
        self.state.period_elapsed(now)
    }

    fn reset_for_payout(&mut self, now: u64, events: &mut Vec<FeeEvent>) {
        let prev_high_water_mark = self.state.high_water_mark;
        let next_high_water_mark = prev_high_water_mark.max(self.state.last_share_price);
        events.push(FeeEvent::HighWaterMarkPaidOut {
            prev_high_water_mark,
            next_high_water_mark,
            aggregate_value_due: self.state.aggregate_value_due,
        });
        self.state.high_water_mark = next_high_water_mark;
        self.state.aggregate_value_due = U256::ZERO;
        self.state.last_paid_at = Some(now);
    }

    fn state(&self) -> &FundFeeState {
        &self.state
    }
}
