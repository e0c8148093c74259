use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

use super::error::{ProjectionError, ProjectionResult};
use super::money::round_money;
use super::types::{
    AggregateReport, PercentileValue, PeriodPercentiles, RunResult, WealthDistribution,
};

pub const DEFAULT_PERCENTILES: [f64; 3] = [10.0, 50.0, 90.0];

pub fn summarize(runs: &[RunResult]) -> ProjectionResult<AggregateReport> {
    summarize_with(runs, &DEFAULT_PERCENTILES)
}

/// Summarize a completed batch. Trajectories span the full horizon; a run
/// that stopped early counts as a zero balance for every period after its
/// last snapshot.
pub fn summarize_with(runs: &[RunResult], levels: &[f64]) -> ProjectionResult<AggregateReport> {
    if runs.is_empty() {
        return Err(ProjectionError::EmptyResultSet);
    }
    let ranks = levels
        .iter()
        .map(|level| level_to_decimal(*level))
        .collect::<ProjectionResult<Vec<_>>>()?;

    let run_count = runs.len();
    let success_count = runs.iter().filter(|r| r.succeeded()).count();
    let horizon = runs
        .iter()
        .map(|r| r.horizon_length.max(r.snapshots.len()))
        .max()
        .unwrap_or(0);

    let mut trajectories = Vec::with_capacity(horizon);
    let mut column = Vec::with_capacity(run_count);
    for offset in 0..horizon {
        column.clear();
        column.extend(runs.iter().map(|r| {
            r.snapshots
                .get(offset)
                .map(|s| s.total_balance)
                .unwrap_or(Decimal::ZERO)
        }));
        column.sort();
        trajectories.push(PeriodPercentiles {
            period_index: offset as u32 + 1,
            values: percentile_values(&column, levels, &ranks),
        });
    }

    let mut terminal = runs
        .iter()
        .filter(|r| r.succeeded())
        .map(RunResult::terminal_balance)
        .collect::<Vec<_>>();
    terminal.sort();
    let terminal_wealth = wealth_distribution(&terminal, levels, &ranks);

    Ok(AggregateReport {
        run_count,
        success_count,
        success_probability: success_count as f64 / run_count as f64,
        percentile_levels: levels.to_vec(),
        trajectories,
        terminal_wealth,
    })
}

fn level_to_decimal(level: f64) -> ProjectionResult<Decimal> {
    if !level.is_finite() || !(0.0..=100.0).contains(&level) {
        return Err(ProjectionError::InvalidParameter(format!(
            "percentile {level} must be between 0 and 100"
        )));
    }
    Decimal::from_f64(level).ok_or_else(|| {
        ProjectionError::InvalidParameter(format!("percentile {level} is not representable"))
    })
}

fn percentile_values(sorted: &[Decimal], levels: &[f64], ranks: &[Decimal]) -> Vec<PercentileValue> {
    levels
        .iter()
        .zip(ranks)
        .map(|(level, rank)| PercentileValue {
            percentile: *level,
            balance: percentile(sorted, *rank),
        })
        .collect()
}

fn wealth_distribution(sorted: &[Decimal], levels: &[f64], ranks: &[Decimal]) -> Option<WealthDistribution> {
    let (min, max) = (*sorted.first()?, *sorted.last()?);
    let sum = sorted.iter().copied().sum::<Decimal>();
    Some(WealthDistribution {
        count: sorted.len(),
        min,
        median: percentile(sorted, Decimal::from(50)),
        max,
        mean: round_money(sum / Decimal::from(sorted.len())),
        percentiles: percentile_values(sorted, levels, ranks),
    })
}

/// Linear interpolation between the closest ranks of an ascending slice.
pub fn percentile(sorted: &[Decimal], level: Decimal) -> Decimal {
    let n = sorted.len();
    match n {
        0 => return Decimal::ZERO,
        1 => return sorted[0],
        _ => {}
    }

    let rank = level / Decimal::from(100) * Decimal::from(n - 1);
    let lower = rank.floor();
    let weight = rank - lower;
    let lower_idx = lower.to_usize().unwrap_or(0).min(n - 1);
    let upper_idx = (lower_idx + 1).min(n - 1);

    if weight.is_zero() || lower_idx == upper_idx {
        sorted[lower_idx]
    } else {
        let lo = sorted[lower_idx];
        let hi = sorted[upper_idx];
        round_money(lo + (hi - lo) * weight)
    }
}
