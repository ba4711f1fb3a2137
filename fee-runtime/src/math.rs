//! Fixed-point helpers shared by every fee engine.
//!
//! Amounts and prices use 18-decimal scaling (`WAD`). Streaming fees carry a
//! per-second compounding rate scaled by `RATE_SCALE_BASE` (27 decimals).
//! All divisions truncate toward zero; `rpow` is the one exception and rounds
//! half up at every step.

use alloy::primitives::{I256, U256};
use once_cell::sync::Lazy;

use crate::error::FeeError;

/// 10^18
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// 10^27
pub const RATE_SCALE_BASE: U256 = U256::from_limbs([11_515_845_246_265_065_472, 54_210_108, 0, 0]);

/// 10^36, working precision of the logarithm and exponential.
const PRECISION: U256 =
    U256::from_limbs([12_919_594_847_110_692_864, 54_210_108_624_275_221, 0, 0]);

/// 365.25 days.
pub const SECONDS_PER_YEAR: u64 = 31_557_600;

/// ln(2) at `PRECISION`, from the same series used by `ln_precise`.
static LN_2: Lazy<Result<U256, FeeError>> = Lazy::new(|| {
    let third = PRECISION / U256::from(3u64);
    Ok(atanh_series(third)? * U256::from(2u64))
});

/// `a * b / denominator`, truncated.
pub fn mul_div_down(a: U256, b: U256, denominator: U256) -> Result<U256, FeeError> {
    if denominator.is_zero() {
        return Err(FeeError::MathOverflow("mul_div_down: zero denominator"));
    }
    let product = a
        .checked_mul(b)
        .ok_or(FeeError::MathOverflow("mul_div_down"))?;
    Ok(product / denominator)
}

/// Signed `a * b / denominator`, truncated toward zero.
pub fn signed_mul_div(a: I256, b: U256, denominator: U256) -> Result<I256, FeeError> {
    let magnitude = to_signed(mul_div_down(a.unsigned_abs(), b, denominator)?)?;
    if a.is_negative() {
        negate(magnitude)
    } else {
        Ok(magnitude)
    }
}

/// Floors a signed value at zero.
pub fn max_zero(value: I256) -> U256 {
    if value.is_negative() {
        U256::ZERO
    } else {
        value.unsigned_abs()
    }
}

pub fn to_signed(value: U256) -> Result<I256, FeeError> {
    I256::try_from(value).map_err(|_| FeeError::MathOverflow("to_signed"))
}

pub fn negate(value: I256) -> Result<I256, FeeError> {
    I256::ZERO
        .checked_sub(value)
        .ok_or(FeeError::MathOverflow("negate"))
}

pub fn signed_sub(a: U256, b: U256) -> Result<I256, FeeError> {
    to_signed(a)?
        .checked_sub(to_signed(b)?)
        .ok_or(FeeError::MathOverflow("signed_sub"))
}

pub fn signed_add(a: I256, b: I256) -> Result<I256, FeeError> {
    a.checked_add(b).ok_or(FeeError::MathOverflow("signed_add"))
}

/// `x^n` in `base` fixed point, rounding half up after every multiplication.
pub fn rpow(x: U256, n: u64, base: U256) -> Result<U256, FeeError> {
    if x.is_zero() {
        return Ok(if n == 0 { base } else { U256::ZERO });
    }
    let half = base / U256::from(2u64);
    let mul_round = |a: U256, b: U256| -> Result<U256, FeeError> {
        let product = a.checked_mul(b).ok_or(FeeError::MathOverflow("rpow"))?;
        let rounded = product
            .checked_add(half)
            .ok_or(FeeError::MathOverflow("rpow"))?;
        Ok(rounded / base)
    };

    let mut x = x;
    let mut n = n;
    let mut z = if n % 2 == 1 { x } else { base };
    n /= 2;
    while n > 0 {
        x = mul_round(x, x)?;
        if n % 2 == 1 {
            z = mul_round(z, x)?;
        }
        n /= 2;
    }
    Ok(z)
}

/// Converts an annual 18-decimal rate `r` into the 27-decimal per-second rate
/// `x` with `x^SECONDS_PER_YEAR = 1 / (1 - r)`, rounded to the nearest unit.
pub fn convert_rate_to_scaled_per_second_rate(rate: U256) -> Result<U256, FeeError> {
    if rate >= WAD {
        return Err(FeeError::InvalidConfiguration(format!(
            "annual rate {rate} must be below 100%"
        )));
    }
    let dilution = mul_div_down(PRECISION, WAD, WAD - rate)?;
    let per_second_log = ln_precise(dilution)? / U256::from(SECONDS_PER_YEAR);
    let per_second = exp_precise(per_second_log)?;
    round_div(per_second, PRECISION / RATE_SCALE_BASE)
}

/// Inverse of [`convert_rate_to_scaled_per_second_rate`], rounded to the
/// nearest 18-decimal unit.
pub fn convert_scaled_per_second_rate_to_rate(scaled_rate: U256) -> Result<U256, FeeError> {
    if scaled_rate < RATE_SCALE_BASE {
        return Err(FeeError::InvalidConfiguration(format!(
            "scaled per-second rate {scaled_rate} is below {RATE_SCALE_BASE}"
        )));
    }
    let annual_factor = rpow(scaled_rate, SECONDS_PER_YEAR, RATE_SCALE_BASE)?;
    let inverse = mul_div_down(RATE_SCALE_BASE, RATE_SCALE_BASE, annual_factor)?;
    let rate = RATE_SCALE_BASE - inverse;
    round_div(rate, RATE_SCALE_BASE / WAD)
}

fn round_div(value: U256, divisor: U256) -> Result<U256, FeeError> {
    let half = divisor / U256::from(2u64);
    let rounded = value
        .checked_add(half)
        .ok_or(FeeError::MathOverflow("round_div"))?;
    Ok(rounded / divisor)
}

/// Natural log of `value / PRECISION` for `value >= PRECISION`.
fn ln_precise(value: U256) -> Result<U256, FeeError> {
    let two = U256::from(2u64);
    let mut w = value;
    let mut halvings = 0u64;
    while w >= PRECISION * two {
        w /= two;
        halvings += 1;
    }
    let t = mul_div_down(w - PRECISION, PRECISION, w + PRECISION)?;
    let series = atanh_series(t)? * two;
    let ln2 = LN_2.clone()?;
    let ln2_part = ln2
        .checked_mul(U256::from(halvings))
        .ok_or(FeeError::MathOverflow("ln_precise"))?;
    Ok(series + ln2_part)
}

/// `sum t^(2i+1) / (2i+1)` at `PRECISION`, for `0 <= t < PRECISION`.
fn atanh_series(t: U256) -> Result<U256, FeeError> {
    let t_squared = mul_div_down(t, t, PRECISION)?;
    let mut term = t;
    let mut sum = U256::ZERO;
    let mut n = 1u64;
    while !term.is_zero() {
        sum += term / U256::from(n);
        term = mul_div_down(term, t_squared, PRECISION)?;
        n += 2;
    }
    Ok(sum)
}

/// `e^(value / PRECISION)` at `PRECISION` via its Taylor series.
fn exp_precise(value: U256) -> Result<U256, FeeError> {
    let mut sum = PRECISION;
    let mut term = PRECISION;
    let mut n = 1u64;
    loop {
        term = mul_div_down(term, value, PRECISION)? / U256::from(n);
        if term.is_zero() {
            break;
        }
        sum += term;
        n += 1;
    }
    Ok(sum)
}
