use alloy::primitives::U256;

use crate::error::FeeError;
use crate::fees::{FeeEngine, FeeKind, FundFeeState, SettleInput};
use crate::math::{
    RATE_SCALE_BASE, convert_rate_to_scaled_per_second_rate,
    convert_scaled_per_second_rate_to_rate, mul_div_down, rpow,
};
use crate::types::{FeeEvent, FeeHook, ProtocolFeeContext, Settlement, SettlementType};
use crate::vault::FundSnapshot;

/// Time-proportional dilution of the net share supply, minted directly to
/// the fund owner on every settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingFee {
    state: FundFeeState,
}

impl StreamingFee {
    pub fn new(scaled_per_second_rate: U256) -> Result<Self, FeeError> {
        if scaled_per_second_rate < RATE_SCALE_BASE {
            return Err(FeeError::InvalidConfiguration(format!(
                "scaled per-second rate {scaled_per_second_rate} is below {RATE_SCALE_BASE}"
            )));
        }
        Ok(Self {
            state: FundFeeState {
                rate: scaled_per_second_rate,
                ..Default::default()
            },
        })
    }

    /// Builds from an 18-decimal annual rate.
    pub fn from_annual_rate(annual_rate: U256) -> Result<Self, FeeError> {
        Self::new(convert_rate_to_scaled_per_second_rate(annual_rate)?)
    }

    pub fn scaled_per_second_rate(&self) -> U256 {
        self.state.rate
    }

    pub fn annual_rate(&self) -> Result<U256, FeeError> {
        convert_scaled_per_second_rate_to_rate(self.state.rate)
    }

    /// `net * (rate^seconds - 1)`, truncated.
    pub fn shares_due_for(&self, net_shares: U256, seconds: u64) -> Result<U256, FeeError> {
        let factor = rpow(self.state.rate, seconds, RATE_SCALE_BASE)?;
        mul_div_down(net_shares, factor - RATE_SCALE_BASE, RATE_SCALE_BASE)
    }
}

impl FeeEngine for StreamingFee {
    fn kind(&self) -> FeeKind {
        FeeKind::Streaming
    }

    fn settles_on(&self, _hook: &FeeHook) -> bool {
        true
    }

    fn updates_on(&self, _hook: &FeeHook) -> bool {
        false
    }

    fn uses_gav(&self) -> bool {
        false
    }

    fn protocol_fee_context(&self) -> ProtocolFeeContext {
        ProtocolFeeContext::Streaming
    }

    fn activate(
        &mut self,
        snapshot: &FundSnapshot,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        self.state.activated = true;
        self.state.activated_at = snapshot.now;
        // deferred until the fund has shares
        if !snapshot.total_supply.is_zero() {
            self.state.last_settled_at = snapshot.now;
        }
        events.push(FeeEvent::ActivatedForFund {
            last_settled_at: self.state.last_settled_at,
            share_price: U256::ZERO,
            asset_amount: U256::ZERO,
        });
        Ok(())
    }

    fn settle(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<Settlement, FeeError> {
        let now = input.snapshot.now;
        let prev = self.state.last_settled_at;
        self.state.last_settled_at = now;

        if prev == 0 {
            tracing::debug!(fund = %input.snapshot.fund, now, "streaming fee seeded");
            return Ok(Settlement::NONE);
        }

        let seconds = now.saturating_sub(prev);
        let net = input.snapshot.net_share_supply();
        if seconds == 0 || net.is_zero() {
            return Ok(Settlement::NONE);
        }

        let shares_due = self.shares_due_for(net, seconds)?;
        tracing::debug!(
            fund = %input.snapshot.fund,
            seconds,
            net_shares = %net,
            shares_due = %shares_due,
            "streaming fee settled"
        );
        if shares_due.is_zero() {
            return Ok(Settlement::NONE);
        }
        events.push(FeeEvent::Settled {
            shares_due,
            seconds_since_last_settled: seconds,
        });
        Ok(Settlement::new(SettlementType::Mint, shares_due))
    }

    fn update(
        &mut self,
        _input: &SettleInput<'_>,
        _events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        Ok(())
    }

    fn payout_allowed(&self, _now: u64) -> bool {
        false
    }

    fn reset_for_payout(&mut self, _now: u64, _events: &mut Vec<FeeEvent>) {}

    fn state(&self) -> &FundFeeState {
        &self.state
    }
}
