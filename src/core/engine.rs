use std::collections::HashSet;

use log::{debug, info, trace};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregate::{DEFAULT_PERCENTILES, summarize_with};
use super::error::{ProjectionError, ProjectionResult};
use super::ledger::{Account, ContributionFlow, Ledger};
use super::money::{
    MAX_INFLATION_INDEX, checked_mul, growth_factor, round_index, round_money, within,
};
use super::scenario::{DistributionParams, derive_seed, deterministic_path, sample_path};
use super::tax::TaxRules;
use super::timegrid::TimeGrid;
use super::types::{
    AggregateReport, Period, PeriodSnapshot, Phase, ReturnPath, RunOutcome, RunResult,
    WithdrawalPolicy,
};
use super::withdrawal::{WithdrawalOutcome, evaluate_withdrawals};

/// Everything a run reads. Built once per request and shared read-only
/// across every run of a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionInputs {
    pub grid: TimeGrid,
    pub accounts: Vec<Account>,
    pub policy: WithdrawalPolicy,
    pub tax: TaxRules,
    pub birth_year: Option<i32>,
}

impl ProjectionInputs {
    pub fn new(
        grid: TimeGrid,
        accounts: Vec<Account>,
        policy: WithdrawalPolicy,
        tax: TaxRules,
        birth_year: Option<i32>,
    ) -> ProjectionResult<Self> {
        let inputs = Self {
            grid,
            accounts,
            policy,
            tax,
            birth_year,
        };
        inputs.validate()?;
        Ok(inputs)
    }

    pub fn validate(&self) -> ProjectionResult<()> {
        let mut ids = HashSet::with_capacity(self.accounts.len());
        for account in &self.accounts {
            account.validate()?;
            if !ids.insert(account.id.as_str()) {
                return Err(ProjectionError::InvalidParameter(format!(
                    "account id {} is used more than once",
                    account.id
                )));
            }
        }
        self.policy.validate()
    }

    pub fn with_target_real_spending(&self, target_real_spending: Decimal) -> Self {
        let mut inputs = self.clone();
        inputs.policy.target_real_spending = target_real_spending;
        inputs
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunState {
    Accumulating,
    Withdrawing,
    Depleted,
    Complete,
}

impl RunState {
    fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Accumulating => RunState::Accumulating,
            Phase::Withdrawing => RunState::Withdrawing,
        }
    }

    /// State on entering a period. Depleted and Complete are terminal.
    fn enter(self, period: &Period) -> Self {
        match self {
            RunState::Accumulating | RunState::Withdrawing => RunState::for_phase(period.phase),
            terminal => terminal,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, RunState::Depleted | RunState::Complete)
    }

    fn outcome(self) -> RunOutcome {
        match self {
            RunState::Depleted => RunOutcome::DepletedEarly,
            _ => RunOutcome::Succeeded,
        }
    }
}

/// Run one projection along `path`, which must cover the whole grid.
/// A balance or inflation index outgrowing the supported range ends the
/// run with [`ProjectionError::OutOfRange`].
pub fn project(inputs: &ProjectionInputs, path: &ReturnPath) -> ProjectionResult<RunResult> {
    if path.len() != inputs.grid.len() {
        return Err(ProjectionError::LengthMismatch {
            expected: inputs.grid.len(),
            actual: path.len(),
        });
    }
    inputs.validate()?;
    simulate_run(inputs, path, None, None)
}

pub fn run_deterministic(
    inputs: &ProjectionInputs,
    returns: Vec<Decimal>,
    inflation: Vec<Decimal>,
) -> ProjectionResult<RunResult> {
    let path = deterministic_path(inputs.grid.len(), returns, inflation)?;
    project(inputs, &path)
}

fn simulate_run(
    inputs: &ProjectionInputs,
    path: &ReturnPath,
    run_index: Option<usize>,
    seed: Option<u64>,
) -> ProjectionResult<RunResult> {
    let mut ledger = Ledger::new(inputs.accounts.clone(), inputs.birth_year);
    let mut snapshots = Vec::with_capacity(inputs.grid.len());
    let mut inflation_index = Decimal::ONE;
    let mut depleted_at = None;
    let mut state = RunState::for_phase(inputs.grid.phase_at(1));

    for (period, point) in inputs.grid.periods().zip(path.iter()) {
        state = state.enter(&period);
        let factor = growth_factor(point.inflation, "inflation")?;
        inflation_index = round_index(checked_mul(inflation_index, factor, "inflation index")?);
        within(inflation_index, MAX_INFLATION_INDEX, "inflation index")?;

        let (fees, flow) = ledger.apply_period(&period, point.nominal_return)?;
        let withdrawal = match state {
            RunState::Withdrawing => Some(evaluate_withdrawals(
                &mut ledger,
                &inputs.policy,
                &inputs.tax,
                &period,
                inflation_index,
            )),
            _ => None,
        };
        let shortfall = withdrawal.as_ref().is_some_and(|w| w.shortfall);

        let snapshot = build_snapshot(&ledger, period, inflation_index, fees, flow, withdrawal);
        trace!(
            "period {} {:?}: total {} (real {}), withdrawn {}, tax {}",
            snapshot.period.index,
            state,
            snapshot.total_balance,
            snapshot.real_total_balance,
            snapshot.total_withdrawn,
            snapshot.tax_paid
        );
        snapshots.push(snapshot);

        if shortfall {
            state = RunState::Depleted;
            depleted_at = Some(period.index);
            debug!(
                "run {:?} depleted in period {} of {}",
                run_index,
                period.index,
                inputs.grid.len()
            );
            break;
        }
    }
    if !state.is_terminal() {
        state = RunState::Complete;
    }

    Ok(RunResult {
        run_index,
        seed,
        horizon_length: inputs.grid.len(),
        outcome: state.outcome(),
        depleted_at,
        snapshots,
    })
}

fn build_snapshot(
    ledger: &Ledger,
    period: Period,
    inflation_index: Decimal,
    fees: Decimal,
    flow: ContributionFlow,
    withdrawal: Option<WithdrawalOutcome>,
) -> PeriodSnapshot {
    let total_balance = ledger.total_balance();
    let real_total_balance = if inflation_index > Decimal::ZERO {
        round_money(total_balance / inflation_index)
    } else {
        total_balance
    };
    let withdrawal = withdrawal.unwrap_or_else(|| WithdrawalOutcome {
        target_nominal: Decimal::ZERO,
        net_delivered: Decimal::ZERO,
        gross_withdrawn: Decimal::ZERO,
        tax_paid: Decimal::ZERO,
        lines: Vec::new(),
        shortfall: false,
    });

    PeriodSnapshot {
        period,
        balances: ledger.balances(),
        total_balance,
        real_total_balance,
        inflation_index,
        fees,
        contributions: flow.deposited,
        contribution_overflow_dropped: flow.dropped,
        target_spending: withdrawal.target_nominal,
        net_spending: withdrawal.net_delivered,
        withdrawals: withdrawal.lines,
        total_withdrawn: withdrawal.gross_withdrawn,
        tax_paid: withdrawal.tax_paid,
        shortfall: withdrawal.shortfall,
    }
}

fn default_percentiles() -> Vec<f64> {
    DEFAULT_PERCENTILES.to_vec()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloConfig {
    pub runs: usize,
    pub seed: u64,
    pub distribution: DistributionParams,
    /// Worker threads; `None` or 0 uses the rayon default.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_percentiles")]
    pub percentiles: Vec<f64>,
}

impl MonteCarloConfig {
    pub fn new(runs: usize, seed: u64, distribution: DistributionParams) -> Self {
        Self {
            runs,
            seed,
            distribution,
            workers: None,
            percentiles: default_percentiles(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_percentiles(mut self, percentiles: Vec<f64>) -> Self {
        self.percentiles = percentiles;
        self
    }

    pub fn validate(&self) -> ProjectionResult<()> {
        if self.runs == 0 {
            return Err(ProjectionError::InvalidParameter(
                "monte carlo run count must be > 0".to_string(),
            ));
        }
        if let Some(level) = self
            .percentiles
            .iter()
            .find(|p| !p.is_finite() || !(0.0..=100.0).contains(*p))
        {
            return Err(ProjectionError::InvalidParameter(format!(
                "percentile {level} must be between 0 and 100"
            )));
        }
        self.distribution.validate()
    }
}

/// Execute every run of a batch on a dedicated pool. Run `i` draws its path
/// from `derive_seed(seed, i)`, and results come back in run-index order, so
/// the output does not depend on the worker count.
pub fn run_batch(inputs: &ProjectionInputs, config: &MonteCarloConfig) -> ProjectionResult<Vec<RunResult>> {
    config.validate()?;
    inputs.validate()?;

    let pool = ThreadPoolBuilder::new()
        .num_threads(config.workers.unwrap_or(0))
        .build()
        .map_err(|err| ProjectionError::WorkerPool(err.to_string()))?;

    let horizon = inputs.grid.len();
    pool.install(|| {
        (0..config.runs)
            .into_par_iter()
            .map(|run_index| {
                let seed = derive_seed(config.seed, run_index as u64);
                let path = sample_path(horizon, &config.distribution, seed);
                simulate_run(inputs, &path, Some(run_index), Some(seed))
            })
            .collect::<ProjectionResult<Vec<_>>>()
    })
}

pub fn run_monte_carlo(inputs: &ProjectionInputs, config: &MonteCarloConfig) -> ProjectionResult<AggregateReport> {
    let runs = run_batch(inputs, config)?;
    let report = summarize_with(&runs, &config.percentiles)?;
    info!(
        "monte carlo batch: {} runs over {} periods, seed {}, success probability {:.4}",
        report.run_count,
        inputs.grid.len(),
        config.seed,
        report.success_probability
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::ContributionSchedule;
    use crate::core::tax::{TaxBracket, TaxBracketTable};
    use crate::core::types::{AccountType, StepSize};
    use chrono::NaiveDate;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};
    use rust_decimal_macros::dec;

    fn grid(periods: u32, accumulation: u32) -> TimeGrid {
        TimeGrid::new(
            NaiveDate::from_ymd_opt(2025, 1, 1).expect("valid date"),
            periods,
            StepSize::Annual,
            accumulation,
        )
        .expect("valid grid")
    }

    fn inputs(grid: TimeGrid, accounts: Vec<Account>, order: Vec<AccountType>, target: Decimal) -> ProjectionInputs {
        ProjectionInputs::new(
            grid,
            accounts,
            WithdrawalPolicy::new(order, target).expect("valid policy"),
            TaxRules::default(),
            None,
        )
        .expect("valid inputs")
    }

    fn mixed_inputs(periods: u32, accumulation: u32, target: Decimal) -> ProjectionInputs {
        let mut base = inputs(
            grid(periods, accumulation),
            vec![
                Account::new("brokerage", AccountType::Taxable, dec!(150000)).with_cost_basis(dec!(90000)),
                Account::new("401k", AccountType::TaxDeferred, dec!(250000))
                    .with_fee_rate(dec!(0.004))
                    .with_contributions(ContributionSchedule::level(dec!(12000))),
                Account::new("roth", AccountType::TaxFree, dec!(60000)),
            ],
            vec![AccountType::Taxable, AccountType::TaxDeferred, AccountType::TaxFree],
            target,
        );
        base.tax = TaxRules {
            income: TaxBracketTable::new(vec![
                TaxBracket::up_to(dec!(20000), dec!(0.10)),
                TaxBracket::up_to(dec!(80000), dec!(0.22)),
                TaxBracket::above(dec!(0.32)),
            ])
            .expect("valid table"),
            capital_gains: Some(TaxBracketTable::flat(dec!(0.15)).expect("valid table")),
            index_to_inflation: true,
        };
        base
    }

    fn volatile() -> DistributionParams {
        DistributionParams {
            return_mean: 0.05,
            return_std_dev: 0.15,
            serial_correlation: Some(0.1),
            inflation_mean: 0.025,
            inflation_std_dev: 0.01,
        }
    }

    #[test]
    fn two_period_tax_free_growth_succeeds() {
        let inputs = inputs(
            grid(2, 2),
            vec![Account::new("roth", AccountType::TaxFree, dec!(100000))],
            vec![AccountType::TaxFree],
            Decimal::ZERO,
        );
        let result = run_deterministic(&inputs, vec![dec!(0.10); 2], vec![Decimal::ZERO; 2]).expect("valid run");

        assert_eq!(result.outcome, RunOutcome::Succeeded);
        assert_eq!(result.snapshots.len(), 2);
        assert_eq!(result.snapshots[0].total_balance, dec!(110000.00));
        assert_eq!(result.snapshots[1].total_balance, dec!(121000.00));
        assert_eq!(result.snapshots[1].balance_of("roth"), Some(dec!(121000.00)));
        assert_eq!(result.depleted_at, None);
    }

    #[test]
    fn path_length_must_match_grid() {
        let inputs = mixed_inputs(4, 2, dec!(10000));
        let err = run_deterministic(&inputs, vec![dec!(0.05); 3], vec![dec!(0.02); 3]).expect_err("must fail");
        assert_eq!(
            err,
            ProjectionError::LengthMismatch {
                expected: 4,
                actual: 3
            }
        );
    }

    #[test]
    fn deterministic_runs_are_identical() {
        let inputs = mixed_inputs(30, 10, dec!(40000));
        let returns = (0..30).map(|i| Decimal::new(i % 7 * 2 - 4, 2)).collect::<Vec<_>>();
        let inflation = vec![dec!(0.03); 30];

        let a = run_deterministic(&inputs, returns.clone(), inflation.clone()).expect("valid run");
        let b = run_deterministic(&inputs, returns, inflation).expect("valid run");
        assert_eq!(a, b);
    }

    #[test]
    fn contributions_stop_and_withdrawals_start_at_transition() {
        let inputs = inputs(
            grid(4, 2),
            vec![
                Account::new("roth", AccountType::TaxFree, dec!(1000))
                    .with_contributions(ContributionSchedule::level(dec!(100))),
            ],
            vec![AccountType::TaxFree],
            dec!(50),
        );
        let result = run_deterministic(&inputs, vec![Decimal::ZERO; 4], vec![Decimal::ZERO; 4]).expect("valid run");

        let totals = result.snapshots.iter().map(|s| s.total_balance).collect::<Vec<_>>();
        assert_eq!(totals, vec![dec!(1100), dec!(1200), dec!(1150), dec!(1100)]);
        assert_eq!(result.snapshots[1].period.phase, Phase::Accumulating);
        assert_eq!(result.snapshots[2].period.phase, Phase::Withdrawing);
        assert_eq!(result.snapshots[2].contributions, Decimal::ZERO);
        assert_eq!(result.snapshots[1].total_withdrawn, Decimal::ZERO);
    }

    #[test]
    fn depletion_is_final() {
        let inputs = inputs(
            grid(5, 0),
            vec![Account::new("roth", AccountType::TaxFree, dec!(1000))],
            vec![AccountType::TaxFree],
            dec!(400),
        );
        let result = run_deterministic(&inputs, vec![Decimal::ZERO; 5], vec![Decimal::ZERO; 5]).expect("valid run");

        assert_eq!(result.outcome, RunOutcome::DepletedEarly);
        assert_eq!(result.depleted_at, Some(3));
        assert_eq!(result.snapshots.len(), 3);
        assert!(result.snapshots.len() < inputs.grid.len());
        let last = result.snapshots.last().expect("snapshots");
        assert!(last.shortfall);
        assert_eq!(last.net_spending, dec!(200));
        assert_eq!(last.total_balance, Decimal::ZERO);
        assert!(result.snapshots[..2].iter().all(|s| !s.shortfall));
    }

    #[test]
    fn depletion_in_the_final_period_still_counts_as_depleted() {
        let inputs = inputs(
            grid(3, 0),
            vec![Account::new("roth", AccountType::TaxFree, dec!(1000))],
            vec![AccountType::TaxFree],
            dec!(400),
        );
        let result = run_deterministic(&inputs, vec![Decimal::ZERO; 3], vec![Decimal::ZERO; 3]).expect("valid run");

        assert_eq!(result.outcome, RunOutcome::DepletedEarly);
        assert_eq!(result.depleted_at, Some(3));
        assert_eq!(result.snapshots.len(), inputs.grid.len());
        assert_eq!(result.horizon_length, 3);
        assert!(result.snapshots[2].shortfall);
        assert_eq!(result.snapshots[2].net_spending, dec!(200));
    }

    #[test]
    fn runaway_growth_is_reported_instead_of_panicking() {
        let inputs = inputs(
            grid(30, 30),
            vec![Account::new("roth", AccountType::TaxFree, dec!(1000000))],
            vec![AccountType::TaxFree],
            Decimal::ZERO,
        );
        let err = run_deterministic(&inputs, vec![dec!(10); 30], vec![Decimal::ZERO; 30]).expect_err("must fail");
        assert!(matches!(err, ProjectionError::OutOfRange(_)));

        let err = run_deterministic(&inputs, vec![Decimal::ZERO; 30], vec![dec!(10); 30]).expect_err("must fail");
        assert!(matches!(err, ProjectionError::OutOfRange(_)));

        let err = run_deterministic(&inputs, vec![dec!(11); 30], vec![Decimal::ZERO; 30]).expect_err("must fail");
        assert!(matches!(err, ProjectionError::InvalidParameter(_)));
    }

    #[test]
    fn monte_carlo_with_explosive_returns_fails_cleanly() {
        // Roughly tripling every period passes the balance ceiling well inside the horizon.
        let inputs = inputs(
            grid(120, 120),
            vec![Account::new("roth", AccountType::TaxFree, dec!(1000000))],
            vec![AccountType::TaxFree],
            Decimal::ZERO,
        );
        let wild = DistributionParams {
            return_mean: 2.0,
            return_std_dev: 0.1,
            serial_correlation: None,
            inflation_mean: 0.0,
            inflation_std_dev: 0.0,
        };
        let err = run_monte_carlo(&inputs, &MonteCarloConfig::new(4, 5, wild).with_workers(2)).expect_err("must fail");
        assert!(matches!(err, ProjectionError::OutOfRange(_)));
    }

    #[test]
    fn report_covers_the_horizon_when_every_run_depletes() {
        let inputs = inputs(
            grid(10, 0),
            vec![Account::new("roth", AccountType::TaxFree, dec!(1000))],
            vec![AccountType::TaxFree],
            dec!(400),
        );
        let flat = DistributionParams {
            return_mean: 0.0,
            return_std_dev: 0.0,
            serial_correlation: None,
            inflation_mean: 0.0,
            inflation_std_dev: 0.0,
        };
        let report = run_monte_carlo(&inputs, &MonteCarloConfig::new(5, 1, flat)).expect("valid batch");

        assert_eq!(report.success_count, 0);
        assert_eq!(report.trajectories.len(), 10);
        assert_eq!(report.trajectories[1].at(50.0), Some(dec!(200)));
        for trajectory in &report.trajectories[2..] {
            assert!(trajectory.values.iter().all(|v| v.balance.is_zero()));
        }
        assert_eq!(report.trajectories[9].period_index, 10);
    }

    #[test]
    fn spending_target_and_real_balance_track_inflation() {
        let inputs = inputs(
            grid(2, 0),
            vec![Account::new("roth", AccountType::TaxFree, dec!(10000))],
            vec![AccountType::TaxFree],
            dec!(1000),
        );
        let result = run_deterministic(&inputs, vec![Decimal::ZERO; 2], vec![dec!(0.10); 2]).expect("valid run");

        assert_eq!(result.snapshots[0].target_spending, dec!(1100.00));
        assert_eq!(result.snapshots[1].target_spending, dec!(1210.00));
        assert_eq!(result.snapshots[1].inflation_index, dec!(1.21));
        assert_eq!(result.snapshots[1].total_balance, dec!(7690.00));
        assert_eq!(result.snapshots[1].real_total_balance, dec!(6355.37));
    }

    #[test]
    fn duplicate_account_ids_are_rejected() {
        let err = ProjectionInputs::new(
            grid(1, 0),
            vec![
                Account::new("a", AccountType::TaxFree, dec!(1)),
                Account::new("a", AccountType::Taxable, dec!(1)),
            ],
            WithdrawalPolicy::new(vec![AccountType::TaxFree], dec!(1)).expect("valid policy"),
            TaxRules::default(),
            None,
        )
        .expect_err("must fail");
        assert!(matches!(err, ProjectionError::InvalidParameter(_)));
    }

    #[test]
    fn monte_carlo_rejects_bad_configuration() {
        let inputs = mixed_inputs(5, 2, dec!(1000));
        assert!(run_monte_carlo(&inputs, &MonteCarloConfig::new(0, 1, volatile())).is_err());
        assert!(
            run_monte_carlo(
                &inputs,
                &MonteCarloConfig::new(3, 1, volatile()).with_percentiles(vec![-1.0])
            )
            .is_err()
        );
    }

    #[test]
    fn monte_carlo_is_independent_of_worker_count() {
        let inputs = mixed_inputs(40, 15, dec!(45000));
        let base = MonteCarloConfig::new(48, 2024, volatile());

        let single = run_batch(&inputs, &base.clone().with_workers(1)).expect("valid batch");
        for workers in [2, 4] {
            let parallel = run_batch(&inputs, &base.clone().with_workers(workers)).expect("valid batch");
            assert_eq!(single, parallel);
        }

        let report_one = run_monte_carlo(&inputs, &base.clone().with_workers(1)).expect("valid batch");
        let report_four = run_monte_carlo(&inputs, &base.with_workers(4)).expect("valid batch");
        assert_eq!(report_one, report_four);
        assert_eq!(report_one.run_count, 48);
    }

    #[test]
    fn monte_carlo_runs_carry_index_and_derived_seed() {
        let inputs = mixed_inputs(6, 3, dec!(20000));
        let runs = run_batch(&inputs, &MonteCarloConfig::new(5, 9, volatile())).expect("valid batch");
        for (idx, run) in runs.iter().enumerate() {
            assert_eq!(run.run_index, Some(idx));
            assert_eq!(run.seed, Some(derive_seed(9, idx as u64)));
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_zero_return_periods_conserve_money(
            start_cents in 0i64..10_000_000,
            contribution_cents in 0i64..500_000,
            target_cents in 0i64..800_000,
            periods in 1u32..12,
            accumulation_seed in any::<u32>(),
        ) {
            let accumulation = accumulation_seed % (periods + 1);
            let inputs = inputs(
                grid(periods, accumulation),
                vec![
                    Account::new("roth", AccountType::TaxFree, Decimal::new(start_cents, 2))
                        .with_contributions(ContributionSchedule::level(Decimal::new(contribution_cents, 2))),
                ],
                vec![AccountType::TaxFree],
                Decimal::new(target_cents, 2),
            );
            let n = periods as usize;
            let result = run_deterministic(&inputs, vec![Decimal::ZERO; n], vec![Decimal::ZERO; n])
                .expect("valid run");

            let mut previous = Decimal::new(start_cents, 2);
            for snapshot in &result.snapshots {
                let expected = match snapshot.period.phase {
                    Phase::Accumulating => previous + snapshot.contributions,
                    Phase::Withdrawing => previous - snapshot.total_withdrawn,
                };
                prop_assert_eq!(snapshot.total_balance, expected);
                previous = snapshot.total_balance;
            }
        }

        #[test]
        fn prop_balances_never_go_negative(seed in any::<u64>(), target in 20_000i64..120_000) {
            let inputs = mixed_inputs(25, 5, Decimal::from(target));
            let config = MonteCarloConfig::new(6, seed, volatile()).with_workers(2);
            let runs = run_batch(&inputs, &config).expect("valid batch");
            for run in &runs {
                for snapshot in &run.snapshots {
                    prop_assert!(snapshot.total_balance >= Decimal::ZERO);
                    prop_assert!(snapshot.balances.iter().all(|b| b.balance >= Decimal::ZERO));
                }
                if run.outcome == RunOutcome::DepletedEarly {
                    prop_assert_eq!(run.depleted_at, run.snapshots.last().map(|s| s.period.index));
                }
            }
        }
    }
}
