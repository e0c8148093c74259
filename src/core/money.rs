//! Fixed-point helpers shared by the ledger, evaluator and aggregator.
//!
//! Balances, contributions, withdrawals and tax are carried at two decimal
//! places. Rates keep ten places and the cumulative inflation index twelve,
//! so repeated multiplication over long monthly horizons never grows the
//! scale past what `Decimal` can represent.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::error::{ProjectionError, ProjectionResult};

pub const MONEY_SCALE: u32 = 2;
pub const RATE_SCALE: u32 = 10;
pub const INDEX_SCALE: u32 = 12;

/// 10^18: ceiling on caller-supplied amounts (balances, contributions,
/// limits, spending targets, bracket bounds).
pub const MAX_INPUT_AMOUNT: Decimal = Decimal::from_parts(0xA764_0000, 0x0DE0_B6B3, 0, false, 0);
/// 10^24: ceiling on any balance or deposit reached during a run.
pub const MAX_BALANCE: Decimal = Decimal::from_parts(0xA100_0000, 0x1BCE_CCED, 0xD3C2, false, 0);
/// Ceiling on the cumulative inflation index.
pub const MAX_INFLATION_INDEX: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
/// Largest per-period return, inflation or annual growth rate accepted on input.
pub const MAX_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Round to cents with banker's rounding and pin the scale at two places.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Round away from zero to the next cent. Used when grossing up a
/// withdrawal so the net after tax never lands below the amount asked for.
pub fn round_money_up(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::AwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointNearestEven)
}

pub fn round_index(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(INDEX_SCALE, RoundingStrategy::MidpointNearestEven)
}

/// Convert a sampled `f64` rate into a fixed-scale decimal. Non-finite
/// input maps to zero; callers clamp samples before converting.
pub fn rate_from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value)
        .map(round_rate)
        .unwrap_or(Decimal::ZERO)
}

pub fn non_negative(value: Decimal) -> Decimal {
    value.max(Decimal::ZERO)
}

pub fn out_of_range(label: &str) -> ProjectionError {
    ProjectionError::OutOfRange(format!("{label} exceeds the supported range"))
}

/// `1 + rate`, the multiplier applied for one period at `rate`.
pub fn growth_factor(rate: Decimal, label: &str) -> ProjectionResult<Decimal> {
    Decimal::ONE.checked_add(rate).ok_or_else(|| out_of_range(label))
}

pub fn checked_mul(lhs: Decimal, rhs: Decimal, label: &str) -> ProjectionResult<Decimal> {
    lhs.checked_mul(rhs).ok_or_else(|| out_of_range(label))
}

pub fn checked_add(lhs: Decimal, rhs: Decimal, label: &str) -> ProjectionResult<Decimal> {
    lhs.checked_add(rhs).ok_or_else(|| out_of_range(label))
}

/// Pass `value` through unless its magnitude is above `cap`.
pub fn within(value: Decimal, cap: Decimal, label: &str) -> ProjectionResult<Decimal> {
    if value.abs() > cap {
        return Err(out_of_range(label));
    }
    Ok(value)
}

/// Reject a caller-supplied amount that is negative or above [`MAX_INPUT_AMOUNT`].
pub fn check_input_amount(value: Decimal, label: &str) -> ProjectionResult<()> {
    if value < Decimal::ZERO || value > MAX_INPUT_AMOUNT {
        return Err(ProjectionError::InvalidParameter(format!(
            "{label} must be between 0 and {MAX_INPUT_AMOUNT}"
        )));
    }
    Ok(())
}
