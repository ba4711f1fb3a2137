pub mod config;
pub mod error;
pub mod fees;
pub mod ledger;
pub mod manager;
pub mod math;
pub mod protocol_fee;
pub mod types;
pub mod vault;

pub use error::FeeError;
pub use fees::{
    FeeEngine, FeeEngineKind, FeeKind, FundFeeState, HighWaterMarkFee, HurdleFee, HurdleMode,
    StreamingFee,
};
pub use manager::{FeeManager, FundAccounts};
pub use protocol_fee::{FeeSplit, ProtocolFeeConfig, ProtocolFeeSplitter};
pub use types::*;
pub use vault::{Clock, Comptroller, FixedClock, FundSnapshot, SystemClock, VaultShares};
