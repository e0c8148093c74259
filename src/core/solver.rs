use log::{debug, info};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::engine::{MonteCarloConfig, ProjectionInputs, run_monte_carlo};
use super::error::{ProjectionError, ProjectionResult};
use super::money::{MAX_INPUT_AMOUNT, round_money};

// Absorbs f64 noise when comparing success rates against the threshold.
const RATE_EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveConfig {
    pub target_success_threshold: f64,
    pub search_min: Decimal,
    pub search_max: Decimal,
    pub tolerance: Decimal,
    pub max_iterations: u32,
    /// Runs for the final check of the solved value; defaults to the batch size.
    #[serde(default)]
    pub final_runs: Option<usize>,
}

impl SolveConfig {
    pub fn new(target_success_threshold: f64, search_min: Decimal, search_max: Decimal) -> Self {
        Self {
            target_success_threshold,
            search_min,
            search_max,
            tolerance: Decimal::ONE,
            max_iterations: 40,
            final_runs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub iteration: u32,
    pub lower_bound: Decimal,
    pub upper_bound: Decimal,
    pub candidate: Decimal,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveResult {
    pub config: SolveConfig,
    pub runs_per_iteration: usize,
    pub solved_spending: Option<Decimal>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_success_ci_half_width: Option<f64>,
    pub iterations: Vec<SolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

impl CandidateEval {
    fn meets(self, threshold: f64) -> bool {
        self.success_rate + RATE_EPSILON >= threshold
    }
}

/// Largest real spending per withdrawal period whose success probability
/// still reaches the threshold. Every candidate reuses the batch seed, so
/// candidates are compared on the same market paths.
pub fn solve_max_spending(
    inputs: &ProjectionInputs,
    mc: &MonteCarloConfig,
    config: &SolveConfig,
) -> ProjectionResult<SolveResult> {
    validate_config(config)?;
    mc.validate()?;

    let threshold = config.target_success_threshold;
    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate_candidate(inputs, mc, config.search_min)?;

    let mut solved_spending = None;
    let mut converged = false;
    let feasible;
    let message;

    if !low_eval.meets(threshold) {
        feasible = false;
        message = "No feasible spending found within the search bounds.".to_string();
    } else if evaluate_candidate(inputs, mc, config.search_max)?.meets(threshold) {
        solved_spending = Some(config.search_max);
        converged = true;
        feasible = true;
        message = "Upper spending bound is still feasible; increase search max for a higher target.".to_string();
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = round_money((lo + hi) / Decimal::TWO);
            let eval = evaluate_candidate(inputs, mc, mid)?;
            debug!(
                "solver iteration {it}: [{lo}, {hi}] candidate {mid} success {:.4}",
                eval.success_rate
            );
            iterations.push(SolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate: mid,
                success_rate: eval.success_rate,
                success_ci_half_width: eval.success_ci_half_width,
            });

            if eval.meets(threshold) {
                lo = mid;
            } else {
                hi = mid;
            }

            if hi - lo <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_spending = Some(lo);
        feasible = true;
        message = if converged {
            "Solved maximum sustainable spending.".to_string()
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let mut achieved_success_rate = None;
    let mut achieved_success_ci_half_width = None;
    if let Some(value) = solved_spending {
        let final_mc = MonteCarloConfig {
            runs: config.final_runs.unwrap_or(mc.runs).max(1),
            ..mc.clone()
        };
        let final_eval = evaluate_candidate(inputs, &final_mc, value)?;
        achieved_success_rate = Some(final_eval.success_rate);
        achieved_success_ci_half_width = Some(final_eval.success_ci_half_width);
    }

    info!(
        "solver finished: feasible {feasible}, converged {converged}, spending {:?} after {} iterations",
        solved_spending,
        iterations.len()
    );

    Ok(SolveResult {
        config: *config,
        runs_per_iteration: mc.runs,
        solved_spending,
        achieved_success_rate,
        achieved_success_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn evaluate_candidate(
    inputs: &ProjectionInputs,
    mc: &MonteCarloConfig,
    target_real_spending: Decimal,
) -> ProjectionResult<CandidateEval> {
    let candidate = inputs.with_target_real_spending(target_real_spending);
    let report = run_monte_carlo(&candidate, mc)?;
    Ok(CandidateEval {
        success_rate: report.success_probability,
        success_ci_half_width: binomial_ci_half_width(report.success_probability, report.run_count),
    })
}

/// 95% normal-approximation half width for a success rate over `n` runs.
fn binomial_ci_half_width(p: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn validate_config(config: &SolveConfig) -> ProjectionResult<()> {
    let invalid = |msg: &str| Err(ProjectionError::InvalidParameter(msg.to_string()));

    if !(0.0..=1.0).contains(&config.target_success_threshold) {
        return invalid("target success threshold must be between 0 and 1");
    }
    if config.search_min < Decimal::ZERO {
        return invalid("search min must be >= 0");
    }
    if config.search_max <= config.search_min {
        return invalid("search max must be greater than search min");
    }
    if config.search_max > MAX_INPUT_AMOUNT {
        return invalid("search max exceeds the largest supported spending target");
    }
    if config.tolerance <= Decimal::ZERO {
        return invalid("tolerance must be > 0");
    }
    if config.max_iterations == 0 {
        return invalid("max iterations must be > 0");
    }
    if config.final_runs == Some(0) {
        return invalid("final runs must be > 0");
    }
    Ok(())
}
