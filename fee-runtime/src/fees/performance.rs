//! Arithmetic shared by the share-based performance fees.

use alloy::primitives::{I256, U256};

use crate::error::FeeError;
use crate::fees::SettleInput;
use crate::math::{WAD, max_zero, mul_div_down, signed_add, signed_sub, to_signed};
use crate::types::{FeeHook, Settlement, SettlementType};

pub(crate) fn share_price(gav: U256, net_shares: U256) -> Result<U256, FeeError> {
    mul_div_down(gav, WAD, net_shares)
}

/// `max(0, prev + value_due)`, rejected when it would reach the fund's GAV.
pub(crate) fn next_aggregate_value_due(
    prev: U256,
    value_due: I256,
    gav: U256,
) -> Result<U256, FeeError> {
    let next = max_zero(signed_add(to_signed(prev)?, value_due)?);
    if !next.is_zero() && next >= gav {
        tracing::warn!(aggregate = %next, gav = %gav, "aggregate value due exceeds gav");
        return Err(FeeError::InvariantViolation(format!(
            "aggregate value due {next} not below gav {gav}"
        )));
    }
    Ok(next)
}

/// Shares that must be outstanding to represent `aggregate` of `gav`, minus
/// what is already outstanding.
pub(crate) fn shares_due(
    aggregate: U256,
    gav: U256,
    net_shares: U256,
    outstanding: U256,
) -> Result<I256, FeeError> {
    let required = if aggregate.is_zero() {
        U256::ZERO
    } else {
        mul_div_down(aggregate, net_shares, gav - aggregate)?
    };
    signed_sub(required, outstanding)
}

pub(crate) fn settlement_for_shares_due(shares_due: I256) -> Settlement {
    if shares_due.is_negative() {
        Settlement::new(
            SettlementType::BurnSharesOutstanding,
            shares_due.unsigned_abs(),
        )
    } else {
        Settlement::new(SettlementType::MintSharesOutstanding, shares_due.unsigned_abs())
    }
}

/// Share price to store as the next reference. Buy and redeem hooks project
/// across the pending flow, which has not touched supply or GAV yet.
pub(crate) fn projected_share_price(
    input: &SettleInput<'_>,
    prev_price: U256,
) -> Result<U256, FeeError> {
    let s = input.snapshot;
    let net = s.net_share_supply();
    match input.hook {
        FeeHook::Continuous => {
            if net.is_zero() {
                return Ok(prev_price);
            }
            share_price(s.gav, net)
        }
        FeeHook::PreBuyShares { investment } => {
            if s.total_supply.is_zero() || s.gav.is_zero() {
                return s.asset_unit();
            }
            let next_gav = s
                .gav
                .checked_add(investment)
                .ok_or(FeeError::MathOverflow("projected gav"))?;
            let shares_increase = mul_div_down(investment, s.total_supply, s.gav)?;
            share_price(next_gav, net + shares_increase)
        }
        FeeHook::PreRedeemShares { shares } => {
            if s.total_supply.is_zero() {
                return Ok(prev_price);
            }
            let gav_decrease = mul_div_down(s.gav, shares, s.total_supply)?;
            let next_net = net.saturating_sub(shares);
            if next_net.is_zero() {
                return Ok(prev_price);
            }
            share_price(s.gav.saturating_sub(gav_decrease), next_net)
        }
    }
}
