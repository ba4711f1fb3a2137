//! Fee engines and the trait the coordinator drives them through.

pub mod high_water_mark;
pub mod hurdle;
mod performance;
pub mod streaming;

pub use high_water_mark::HighWaterMarkFee;
pub use hurdle::{HurdleFee, HurdleMode};
pub use streaming::StreamingFee;

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::FeeError;
use crate::types::{FeeEvent, FeeHook, ProtocolFeeContext, Settlement};
use crate::vault::FundSnapshot;

/// State kept per (fund, fee) pair. Which fields are meaningful depends on
/// the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FundFeeState {
    /// Annual/performance rate, or the scaled per-second rate for streaming fees.
    pub rate: U256,
    /// Seconds between allowed payouts.
    pub period: u64,
    pub activated: bool,
    pub activated_at: u64,
    /// `None` until the first payout.
    pub last_paid_at: Option<u64>,
    pub last_settled_at: u64,
    pub last_share_price: U256,
    pub last_asset_amount: U256,
    pub high_water_mark: U256,
    pub aggregate_value_due: U256,
    pub hurdle_rate: U256,
}

impl FundFeeState {
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Period gate shared by the performance fees.
    pub fn period_elapsed(&self, now: u64) -> bool {
        if !self.is_activated() {
            return false;
        }
        let since = self.last_paid_at.unwrap_or(self.activated_at);
        now.saturating_sub(since) >= self.period
    }
}

/// Inputs to a single `settle` or `update` call.
#[derive(Debug, Clone, Copy)]
pub struct SettleInput<'a> {
    pub snapshot: &'a FundSnapshot,
    pub hook: FeeHook,
    /// Shares currently held by the vault for this fee.
    pub shares_outstanding: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Streaming,
    HighWaterMark,
    Hurdle,
}

pub trait FeeEngine {
    fn kind(&self) -> FeeKind;

    fn settles_on(&self, hook: &FeeHook) -> bool;

    fn updates_on(&self, hook: &FeeHook) -> bool;

    /// Whether settlement depends on a valid GAV.
    fn uses_gav(&self) -> bool;

    fn protocol_fee_context(&self) -> ProtocolFeeContext;

    fn activate(
        &mut self,
        snapshot: &FundSnapshot,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError>;

    fn settle(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<Settlement, FeeError>;

    fn update(&mut self, input: &SettleInput<'_>, events: &mut Vec<FeeEvent>)
    -> Result<(), FeeError>;

    fn payout_allowed(&self, now: u64) -> bool;

    /// Resets payout state unconditionally.
    fn reset_for_payout(&mut self, now: u64, events: &mut Vec<FeeEvent>);

    /// Pays out if the period has elapsed. Returns `false` otherwise.
    fn payout(&mut self, now: u64, events: &mut Vec<FeeEvent>) -> bool {
        if !self.payout_allowed(now) {
            return false;
        }
        self.reset_for_payout(now, events);
        true
    }

    fn state(&self) -> &FundFeeState;
}

/// The fee engines a fund can register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeEngineKind {
    Streaming(StreamingFee),
    HighWaterMark(HighWaterMarkFee),
    Hurdle(HurdleFee),
}

impl FeeEngineKind {
    fn engine(&self) -> &dyn FeeEngine {
        match self {
            FeeEngineKind::Streaming(f) => f,
            FeeEngineKind::HighWaterMark(f) => f,
            FeeEngineKind::Hurdle(f) => f,
        }
    }

    fn engine_mut(&mut self) -> &mut dyn FeeEngine {
        match self {
            FeeEngineKind::Streaming(f) => f,
            FeeEngineKind::HighWaterMark(f) => f,
            FeeEngineKind::Hurdle(f) => f,
        }
    }
}

impl FeeEngine for FeeEngineKind {
    fn kind(&self) -> FeeKind {
        self.engine().kind()
    }

    fn settles_on(&self, hook: &FeeHook) -> bool {
        self.engine().settles_on(hook)
    }

    fn updates_on(&self, hook: &FeeHook) -> bool {
        self.engine().updates_on(hook)
    }

    fn uses_gav(&self) -> bool {
        self.engine().uses_gav()
    }

    fn protocol_fee_context(&self) -> ProtocolFeeContext {
        self.engine().protocol_fee_context()
    }

    fn activate(
        &mut self,
        snapshot: &FundSnapshot,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        self.engine_mut().activate(snapshot, events)
    }

    fn settle(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<Settlement, FeeError> {
        self.engine_mut().settle(input, events)
    }

    fn update(
        &mut self,
        input: &SettleInput<'_>,
        events: &mut Vec<FeeEvent>,
    ) -> Result<(), FeeError> {
        self.engine_mut().update(input, events)
    }

    fn payout_allowed(&self, now: u64) -> bool {
        self.engine().payout_allowed(now)
    }

    fn reset_for_payout(&mut self, now: u64, events: &mut Vec<FeeEvent>) {
        self.engine_mut().reset_for_payout(now, events)
    }

    fn state(&self) -> &FundFeeState {
        self.engine().state()
    }
}

impl From<StreamingFee> for FeeEngineKind {
    fn from(f: StreamingFee) -> Self {
        FeeEngineKind::Streaming(f)
    }
}

impl From<HighWaterMarkFee> for FeeEngineKind {
    fn from(f: HighWaterMarkFee) -> Self {
        FeeEngineKind::HighWaterMark(f)
    }
}

impl From<HurdleFee> for FeeEngineKind {
    fn from(f: HurdleFee) -> Self {
        FeeEngineKind::Hurdle(f)
    }
}
