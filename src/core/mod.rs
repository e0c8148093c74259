mod aggregate;
mod engine;
mod error;
mod ledger;
mod money;
mod scenario;
mod solver;
mod tax;
mod timegrid;
mod types;
mod withdrawal;

pub use aggregate::{DEFAULT_PERCENTILES, percentile, summarize, summarize_with};
pub use engine::{
    MonteCarloConfig, ProjectionInputs, RunState, project, run_batch, run_deterministic,
    run_monte_carlo,
};
pub use error::{ProjectionError, ProjectionResult};
pub use ledger::{Account, ContributionFlow, ContributionLimit, ContributionSchedule, Ledger};
pub use money::{MONEY_SCALE, round_money};
pub use scenario::{DistributionParams, derive_seed, deterministic_path, sample, sample_many};
pub use solver::{SolveConfig, SolveIteration, SolveResult, solve_max_spending};
pub use tax::{PeriodTax, TaxBracket, TaxBracketTable, TaxRules};
pub use timegrid::{Periods, TimeGrid};
pub use types::{
    AccountBalance, AccountType, AggregateReport, PercentileValue, Period, PeriodPercentiles,
    PeriodSnapshot, Phase, ReturnPath, ReturnPoint, RunOutcome, RunResult, StepSize,
    WealthDistribution, WithdrawalLine, WithdrawalPolicy,
};
pub use withdrawal::{WithdrawalOutcome, evaluate_withdrawals};
