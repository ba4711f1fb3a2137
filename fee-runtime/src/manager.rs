//! Fee settlement coordinator.
//!
//! Holds each fund's ordered fee list and drives it through settle, update
//! and payout. Every call works on a copy of the fund's state and commits it
//! only on success, so a failed settlement leaves nothing behind.
//!
//! No map guard is held while collaborators are read. A call checks out a
//! copy tagged with the fund's version and commits only if the version is
//! unchanged; otherwise it recomputes from the newer state. Calls for one
//! fund therefore apply one at a time, and different funds run in parallel.

use alloy::primitives::{Address, U256};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashSet;

use crate::error::FeeError;
use crate::fees::{FeeEngine, FeeEngineKind, FundFeeState, SettleInput};
use crate::ledger::SharesOutstandingLedger;
use crate::math::mul_div_down;
use crate::protocol_fee::ProtocolFeeSplitter;
use crate::types::{
    FeeEffect, FeeEvent, FeeHook, FeeOutcome, FundEvent, PayoutStatus, ProtocolFeeContext,
    Settlement, SettlementType,
};
use crate::vault::{Clock, Comptroller, FundSnapshot, VaultShares};

/// Accounts a fund's fees move shares between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundAccounts {
    /// Holder of shares outstanding; its balance is excluded from net supply.
    pub vault: Address,
    /// Fee recipient.
    pub owner: Address,
}

#[derive(Debug, Clone)]
pub struct RegisteredFee {
    pub id: Address,
    pub engine: FeeEngineKind,
}

#[derive(Debug, Clone)]
pub struct FundFees {
    pub accounts: FundAccounts,
    pub fees: Vec<RegisteredFee>,
    pub ledger: SharesOutstandingLedger,
    pub activated: bool,
    /// Bumped on every commit.
    pub version: u64,
}

impl FundFees {
    fn position(&self, fee: Address) -> Result<usize, FeeError> {
        self.fees
            .iter()
            .position(|f| f.id == fee)
            .ok_or_else(|| FeeError::InvalidConfiguration(format!("unknown fee {fee}")))
    }

    fn needs_gav(&self, hook: &FeeHook) -> bool {
        self.fees
            .iter()
            .any(|f| f.engine.settles_on(hook) && f.engine.uses_gav())
    }
}

pub struct FeeManager<V, C, K> {
    dispatcher: Address,
    vault: V,
    comptroller: C,
    clock: K,
    funds: DashMap<Address, FundFees>,
}

impl<V, C, K> FeeManager<V, C, K>
where
    V: VaultShares,
    C: Comptroller,
    K: Clock,
{
    /// `dispatcher` is the only caller allowed to mutate fee state.
    pub fn new(dispatcher: Address, vault: V, comptroller: C, clock: K) -> Self {
        Self {
            dispatcher,
            vault,
            comptroller,
            clock,
            funds: DashMap::new(),
        }
    }

    pub fn dispatcher(&self) -> Address {
        self.dispatcher
    }

    fn authorize(&self, caller: Address) -> Result<(), FeeError> {
        if caller != self.dispatcher {
            tracing::warn!(caller = %caller, "rejected unauthorized fee manager call");
            return Err(FeeError::Unauthorized {
                caller,
                expected: self.dispatcher,
            });
        }
        Ok(())
    }

    fn snapshot(
        &self,
        fund: Address,
        fees: &FundFees,
        require_valid_gav: bool,
    ) -> Result<FundSnapshot, FeeError> {
        FundSnapshot::capture(
            fund,
            fees.accounts.vault,
            &self.vault,
            &self.comptroller,
            &self.clock,
            require_valid_gav,
        )
    }

    fn checkout(&self, fund: Address) -> Result<FundFees, FeeError> {
        self.funds
            .get(&fund)
            .map(|entry| entry.clone())
            .ok_or(FeeError::FundNotFound(fund))
    }

    /// Runs `step` on a copy of the fund's fees and commits the copy. Reruns
    /// `step` on fresh state if another call committed in between.
    fn transact<T>(
        &self,
        fund: Address,
        mut step: impl FnMut(&mut FundFees) -> Result<T, FeeError>,
    ) -> Result<T, FeeError> {
        loop {
            let mut working = self.checkout(fund)?;
            let result = step(&mut working)?;
            match self.funds.get_mut(&fund) {
                Some(mut entry) if entry.version == working.version => {
                    working.version += 1;
                    *entry = working;
                    return Ok(result);
                }
                Some(_) => tracing::debug!(fund = %fund, "fund fees changed concurrently, retrying"),
                None => return Err(FeeError::FundNotFound(fund)),
            }
        }
    }

    // ── Registration ────────────────────────────────────────────────────

    pub fn add_fund_settings(
        &self,
        caller: Address,
        fund: Address,
        accounts: FundAccounts,
        fees: Vec<(Address, FeeEngineKind)>,
    ) -> Result<Vec<FundEvent>, FeeError> {
        self.authorize(caller)?;

        let mut seen = HashSet::new();
        for (id, _) in &fees {
            if !seen.insert(*id) {
                return Err(FeeError::InvalidConfiguration(format!(
                    "fee {id} registered twice for fund {fund}"
                )));
            }
        }

        let ids: Vec<Address> = fees.iter().map(|(id, _)| *id).collect();
        match self.funds.entry(fund) {
            Entry::Occupied(_) => Err(FeeError::InvalidConfiguration(format!(
                "fund {fund} already has fee settings"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(FundFees {
                    accounts,
                    fees: fees
                        .into_iter()
                        .map(|(id, engine)| RegisteredFee { id, engine })
                        .collect(),
                    ledger: SharesOutstandingLedger::default(),
                    activated: false,
                    version: 0,
                });
                tracing::info!(fund = %fund, fees = ids.len(), "fund fee settings added");
                Ok(vec![FundEvent {
                    fund,
                    fee: None,
                    event: FeeEvent::FundSettingsAdded { fees: ids },
                }])
            }
        }
    }

    pub fn activate_for_fund(
        &self,
        caller: Address,
        fund: Address,
    ) -> Result<Vec<FundEvent>, FeeError> {
        self.authorize(caller)?;
        let (now, events) = self.transact(fund, |working| {
            if working.activated {
                return Err(FeeError::InvalidConfiguration(format!(
                    "fees for fund {fund} already activated"
                )));
            }
            let require_gav = working.fees.iter().any(|f| f.engine.uses_gav());
            let snapshot = self.snapshot(fund, working, require_gav)?;
            let mut outcome = FeeOutcome::default();
            for fee in working.fees.iter_mut() {
                let mut sink = Vec::new();
                fee.engine.activate(&snapshot, &mut sink)?;
                record(&mut outcome, fund, Some(fee.id), sink);
            }
            working.activated = true;
            Ok((snapshot.now, outcome.events))
        })?;

        tracing::info!(fund = %fund, now, "fund fees activated");
        Ok(events)
    }

    // ── Hooks ───────────────────────────────────────────────────────────

    pub fn invoke_continuous_hook(
        &self,
        caller: Address,
        fund: Address,
        protocol: &ProtocolFeeSplitter,
    ) -> Result<FeeOutcome, FeeError> {
        self.invoke_hook(caller, fund, FeeHook::Continuous, protocol)
    }

    /// `investment` is the gross denomination-asset amount being deposited.
    pub fn invoke_pre_buy_shares_hook(
        &self,
        caller: Address,
        fund: Address,
        investment: U256,
        protocol: &ProtocolFeeSplitter,
    ) -> Result<FeeOutcome, FeeError> {
        self.invoke_hook(caller, fund, FeeHook::PreBuyShares { investment }, protocol)
    }

    pub fn invoke_pre_redeem_shares_hook(
        &self,
        caller: Address,
        fund: Address,
        shares: U256,
        protocol: &ProtocolFeeSplitter,
    ) -> Result<FeeOutcome, FeeError> {
        self.invoke_hook(caller, fund, FeeHook::PreRedeemShares { shares }, protocol)
    }

    pub fn invoke_hook(
        &self,
        caller: Address,
        fund: Address,
        hook: FeeHook,
        protocol: &ProtocolFeeSplitter,
    ) -> Result<FeeOutcome, FeeError> {
        self.authorize(caller)?;
        self.transact(fund, |working| {
            if !working.activated {
                return Err(FeeError::InvalidConfiguration(format!(
                    "fees for fund {fund} are not activated"
                )));
            }
            let mut outcome = FeeOutcome::default();
            self.run_hook(fund, working, hook, protocol, &mut outcome)?;
            Ok(outcome)
        })
    }

    fn run_hook(
        &self,
        fund: Address,
        fees: &mut FundFees,
        hook: FeeHook,
        protocol: &ProtocolFeeSplitter,
        outcome: &mut FeeOutcome,
    ) -> Result<(), FeeError> {
        let mut snapshot = self.snapshot(fund, fees, fees.needs_gav(&hook))?;

        // fees see the investment net of the deposit skim
        let hook = match hook {
            FeeHook::PreBuyShares { investment } => {
                let split = protocol.split(ProtocolFeeContext::Deposit, investment)?;
                charge_protocol_asset_fee(
                    fund,
                    ProtocolFeeContext::Deposit,
                    split.protocol_cut,
                    protocol,
                    outcome,
                );
                FeeHook::PreBuyShares {
                    investment: split.recipient_cut,
                }
            }
            other => other,
        };

        let FundFees {
            accounts,
            fees: registered,
            ledger,
            ..
        } = fees;

        for fee in registered.iter_mut() {
            if fee.engine.settles_on(&hook) {
                let mut sink = Vec::new();
                let input = SettleInput {
                    snapshot: &snapshot,
                    hook,
                    shares_outstanding: ledger.shares(fee.id),
                };
                let settlement = fee.engine.settle(&input, &mut sink)?;
                record(outcome, fund, Some(fee.id), sink);

                if !settlement.is_none() {
                    let effects = route_settlement(
                        fund,
                        accounts,
                        ledger,
                        fee.id,
                        fee.engine.protocol_fee_context(),
                        settlement,
                        protocol,
                        outcome,
                    )?;
                    for effect in &effects {
                        snapshot.apply(effect)?;
                    }
                    outcome.effects.extend(effects);
                    outcome.events.push(FundEvent {
                        fund,
                        fee: Some(fee.id),
                        event: FeeEvent::FeeSettledForFund { hook, settlement },
                    });
                }
                outcome.settlements.push((fee.id, settlement));
            }

            if fee.engine.updates_on(&hook) {
                let mut sink = Vec::new();
                let input = SettleInput {
                    snapshot: &snapshot,
                    hook,
                    shares_outstanding: ledger.shares(fee.id),
                };
                fee.engine.update(&input, &mut sink)?;
                record(outcome, fund, Some(fee.id), sink);
            }
        }

        if let FeeHook::PreRedeemShares { shares } = hook {
            if !snapshot.total_supply.is_zero() {
                let redeemed_value = mul_div_down(snapshot.gav, shares, snapshot.total_supply)?;
                let split = protocol.split(ProtocolFeeContext::Withdrawal, redeemed_value)?;
                charge_protocol_asset_fee(
                    fund,
                    ProtocolFeeContext::Withdrawal,
                    split.protocol_cut,
                    protocol,
                    outcome,
                );
            }
        }

        tracing::debug!(
            fund = %fund,
            hook = hook.name(),
            effects = outcome.effects.len(),
            "fee hook settled"
        );
        Ok(())
    }

    // ── Payout ──────────────────────────────────────────────────────────

    /// Pays out the named fees in the order given. Each fee yields one
    /// [`PayoutStatus`]; only `Paid` emits an event.
    pub fn payout_shares_outstanding_for_fees(
        &self,
        caller: Address,
        fund: Address,
        fees: &[Address],
        protocol: &ProtocolFeeSplitter,
    ) -> Result<FeeOutcome, FeeError> {
        self.authorize(caller)?;
        self.transact(fund, |working| {
            let now = self.clock.now();
            let mut outcome = FeeOutcome::default();
            for &fee in fees {
                let index = working.position(fee)?;
                let status =
                    pay_out_fee(fund, working, index, now, false, protocol, &mut outcome)?;
                outcome.payouts.push((fee, status));
            }
            Ok(outcome)
        })
    }

    /// Settles one last time, pays every outstanding balance regardless of
    /// period, and removes the fund. The fund stays registered until all of
    /// that has succeeded.
    pub fn deactivate_for_fund(
        &self,
        caller: Address,
        fund: Address,
        protocol: &ProtocolFeeSplitter,
    ) -> Result<FeeOutcome, FeeError> {
        self.authorize(caller)?;
        loop {
            let mut working = self.checkout(fund)?;
            let mut outcome = FeeOutcome::default();
            self.deactivate_inner(fund, &mut working, protocol, &mut outcome)?;

            let removed = self
                .funds
                .remove_if(&fund, |_, current| current.version == working.version);
            if removed.is_some() {
                tracing::info!(
                    fund = %fund,
                    payouts = outcome.payouts.len(),
                    "fund fees deactivated"
                );
                return Ok(outcome);
            }
            if !self.funds.contains_key(&fund) {
                return Err(FeeError::FundNotFound(fund));
            }
            tracing::debug!(fund = %fund, "fund fees changed concurrently, retrying");
        }
    }

    fn deactivate_inner(
        &self,
        fund: Address,
        fees: &mut FundFees,
        protocol: &ProtocolFeeSplitter,
        outcome: &mut FeeOutcome,
    ) -> Result<(), FeeError> {
        if fees.activated {
            self.run_hook(fund, fees, FeeHook::Continuous, protocol, outcome)?;
        }
        let now = self.clock.now();
        for index in 0..fees.fees.len() {
            let id = fees.fees[index].id;
            if fees.ledger.shares(id).is_zero() && fees.ledger.assets(id).is_zero() {
                continue;
            }
            let status = pay_out_fee(fund, fees, index, now, true, protocol, outcome)?;
            outcome.payouts.push((id, status));
        }
        outcome.events.push(FundEvent {
            fund,
            fee: None,
            event: FeeEvent::FundDeactivated,
        });
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn fee_state(&self, fund: Address, fee: Address) -> Option<FundFeeState> {
        let entry = self.funds.get(&fund)?;
        entry
            .fees
            .iter()
            .find(|f| f.id == fee)
            .map(|f| f.engine.state().clone())
    }

    pub fn shares_outstanding(&self, fund: Address, fee: Address) -> U256 {
        self.funds
            .get(&fund)
            .map(|f| f.ledger.shares(fee))
            .unwrap_or_default()
    }

    pub fn assets_outstanding(&self, fund: Address, fee: Address) -> U256 {
        self.funds
            .get(&fund)
            .map(|f| f.ledger.assets(fee))
            .unwrap_or_default()
    }

    pub fn registered_fees(&self, fund: Address) -> Vec<Address> {
        self.funds
            .get(&fund)
            .map(|f| f.fees.iter().map(|fee| fee.id).collect())
            .unwrap_or_default()
    }

    pub fn is_activated(&self, fund: Address) -> bool {
        self.funds.get(&fund).map(|f| f.activated).unwrap_or(false)
    }
}

fn record(outcome: &mut FeeOutcome, fund: Address, fee: Option<Address>, events: Vec<FeeEvent>) {
    outcome
        .events
        .extend(events.into_iter().map(|event| FundEvent { fund, fee, event }));
}

fn push_nonzero(effects: &mut Vec<FeeEffect>, effect: FeeEffect) {
    let amount = match &effect {
        FeeEffect::MintShares { amount, .. }
        | FeeEffect::BurnShares { amount, .. }
        | FeeEffect::TransferShares { amount, .. }
        | FeeEffect::TransferAsset { amount, .. }
        | FeeEffect::DeductFromFlow { amount, .. } => *amount,
    };
    if !amount.is_zero() {
        effects.push(effect);
    }
}

fn charge_protocol_asset_fee(
    fund: Address,
    context: ProtocolFeeContext,
    amount: U256,
    protocol: &ProtocolFeeSplitter,
    outcome: &mut FeeOutcome,
) {
    if amount.is_zero() {
        return;
    }
    let dao = protocol.dao_address();
    outcome.effects.push(FeeEffect::DeductFromFlow { to: dao, amount });
    outcome.events.push(FundEvent {
        fund,
        fee: None,
        event: FeeEvent::ProtocolFeeCharged {
            context,
            dao,
            amount,
            is_shares: false,
        },
    });
}

/// Turns a settlement into effects, updating the ledger for the
/// outstanding-share and direct types.
#[allow(clippy::too_many_arguments)]
fn route_settlement(
    fund: Address,
    accounts: &FundAccounts,
    ledger: &mut SharesOutstandingLedger,
    fee: Address,
    context: ProtocolFeeContext,
    settlement: Settlement,
    protocol: &ProtocolFeeSplitter,
    outcome: &mut FeeOutcome,
) -> Result<Vec<FeeEffect>, FeeError> {
    let amount = settlement.amount;
    let mut effects = Vec::new();
    match settlement.settlement_type {
        SettlementType::None => {}
        SettlementType::Mint | SettlementType::TransferAsset => {
            let is_shares = settlement.settlement_type == SettlementType::Mint;
            let split = protocol.split(context, amount)?;
            let dao = protocol.dao_address();
            let (to_owner, to_dao) = if is_shares {
                (
                    FeeEffect::MintShares {
                        to: accounts.owner,
                        amount: split.recipient_cut,
                    },
                    FeeEffect::MintShares {
                        to: dao,
                        amount: split.protocol_cut,
                    },
                )
            } else {
                (
                    FeeEffect::TransferAsset {
                        to: accounts.owner,
                        amount: split.recipient_cut,
                    },
                    FeeEffect::TransferAsset {
                        to: dao,
                        amount: split.protocol_cut,
                    },
                )
            };
            push_nonzero(&mut effects, to_owner);
            push_nonzero(&mut effects, to_dao);
            if !split.protocol_cut.is_zero() {
                outcome.events.push(FundEvent {
                    fund,
                    fee: Some(fee),
                    event: FeeEvent::ProtocolFeeCharged {
                        context,
                        dao,
                        amount: split.protocol_cut,
                        is_shares,
                    },
                });
            }
        }
        SettlementType::Burn => {
            effects.push(FeeEffect::BurnShares {
                from: accounts.owner,
                amount,
            });
        }
        SettlementType::MintSharesOutstanding => {
            ledger.credit_shares(fee, amount)?;
            effects.push(FeeEffect::MintShares {
                to: accounts.vault,
                amount,
            });
        }
        SettlementType::BurnSharesOutstanding => {
            ledger.debit_shares(fee, amount)?;
            effects.push(FeeEffect::BurnShares {
                from: accounts.vault,
                amount,
            });
        }
        SettlementType::Direct => {
            ledger.credit_assets(fee, amount)?;
        }
    }
    Ok(effects)
}

/// Pays one fee. With `force` the period gate is skipped.
#[allow(clippy::too_many_arguments)]
fn pay_out_fee(
    fund: Address,
    fees: &mut FundFees,
    index: usize,
    now: u64,
    force: bool,
    protocol: &ProtocolFeeSplitter,
    outcome: &mut FeeOutcome,
) -> Result<PayoutStatus, FeeError> {
    let accounts = fees.accounts;
    let fee = &mut fees.fees[index];
    let id = fee.id;
    let shares = fees.ledger.shares(id);
    let assets = fees.ledger.assets(id);

    let mut sink = Vec::new();
    let paid = if force {
        fee.engine.reset_for_payout(now, &mut sink);
        true
    } else {
        fee.engine.payout(now, &mut sink)
    };
    if !paid {
        return Ok(if shares.is_zero() && assets.is_zero() {
            PayoutStatus::NothingDue
        } else {
            PayoutStatus::NotYetPayable
        });
    }
    let context = fee.engine.protocol_fee_context();
    record(outcome, fund, Some(id), sink);
    fees.ledger.take(id);

    let share_split = protocol.split(context, shares)?;
    let asset_split = protocol.split(context, assets)?;
    let dao = protocol.dao_address();
    for effect in [
        FeeEffect::TransferShares {
            from: accounts.vault,
            to: accounts.owner,
            amount: share_split.recipient_cut,
        },
        FeeEffect::TransferShares {
            from: accounts.vault,
            to: dao,
            amount: share_split.protocol_cut,
        },
        FeeEffect::TransferAsset {
            to: accounts.owner,
            amount: asset_split.recipient_cut,
        },
        FeeEffect::TransferAsset {
            to: dao,
            amount: asset_split.protocol_cut,
        },
    ] {
        push_nonzero(&mut outcome.effects, effect);
    }
    outcome.events.push(FundEvent {
        fund,
        fee: Some(id),
        event: FeeEvent::SharesOutstandingPaidForFund {
            recipient: accounts.owner,
            recipient_shares: share_split.recipient_cut,
            protocol_shares: share_split.protocol_cut,
            recipient_assets: asset_split.recipient_cut,
            protocol_assets: asset_split.protocol_cut,
        },
    });
    tracing::info!(
        fund = %fund,
        fee = %id,
        shares = %shares,
        assets = %assets,
        protocol_shares = %share_split.protocol_cut,
        "fee outstanding paid out"
    );

    Ok(PayoutStatus::Paid {
        recipient_shares: share_split.recipient_cut,
        protocol_shares: share_split.protocol_cut,
        recipient_assets: asset_split.recipient_cut,
        protocol_assets: asset_split.protocol_cut,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_fee::ProtocolFeeConfig;

    fn accounts() -> FundAccounts {
        FundAccounts {
            vault: Address::repeat_byte(0x0A),
            owner: Address::repeat_byte(0x0B),
        }
    }

    fn splitter(streaming_tenths: u64) -> ProtocolFeeSplitter {
        let owner = Address::repeat_byte(0xAA);
        let config = ProtocolFeeConfig::new(
            U256::ZERO,
            U256::ZERO,
            U256::ZERO,
            U256::from(streaming_tenths) * U256::from(1_000_000_000_000_000u64),
            Address::repeat_byte(0xDA),
        );
        ProtocolFeeSplitter::with_config(owner, config).unwrap()
    }

    #[test]
    fn test_mint_is_split_between_owner_and_dao() {
        let mut ledger = SharesOutstandingLedger::default();
        let mut outcome = FeeOutcome::default();
        let effects = route_settlement(
            Address::repeat_byte(0x01),
            &accounts(),
            &mut ledger,
            Address::repeat_byte(0x11),
            ProtocolFeeContext::Streaming,
            Settlement::new(SettlementType::Mint, U256::from(1_000u64)),
            &splitter(5),
            &mut outcome,
        )
        .unwrap();
        assert_eq!(
            effects,
            vec![
                FeeEffect::MintShares {
                    to: accounts().owner,
                    amount: U256::from(995u64),
                },
                FeeEffect::MintShares {
                    to: Address::repeat_byte(0xDA),
                    amount: U256::from(5u64),
                },
            ]
        );
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(ledger, SharesOutstandingLedger::default());
    }

    #[test]
    fn test_outstanding_settlements_move_ledger() {
        let fee = Address::repeat_byte(0x11);
        let mut ledger = SharesOutstandingLedger::default();
        let mut outcome = FeeOutcome::default();
        let protocol = splitter(0);
        let mint = route_settlement(
            Address::repeat_byte(0x01),
            &accounts(),
            &mut ledger,
            fee,
            ProtocolFeeContext::Performance,
            Settlement::new(SettlementType::MintSharesOutstanding, U256::from(70u64)),
            &protocol,
            &mut outcome,
        )
        .unwrap();
        assert_eq!(
            mint,
            vec![FeeEffect::MintShares {
                to: accounts().vault,
                amount: U256::from(70u64),
            }]
        );

        route_settlement(
            Address::repeat_byte(0x01),
            &accounts(),
            &mut ledger,
            fee,
            ProtocolFeeContext::Performance,
            Settlement::new(SettlementType::BurnSharesOutstanding, U256::from(20u64)),
            &protocol,
            &mut outcome,
        )
        .unwrap();
        assert_eq!(ledger.shares(fee), U256::from(50u64));

        let direct = route_settlement(
            Address::repeat_byte(0x01),
            &accounts(),
            &mut ledger,
            fee,
            ProtocolFeeContext::Performance,
            Settlement::new(SettlementType::Direct, U256::from(9u64)),
            &protocol,
            &mut outcome,
        )
        .unwrap();
        assert!(direct.is_empty());
        assert_eq!(ledger.assets(fee), U256::from(9u64));
    }
}
