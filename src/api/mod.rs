use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{
    Account, AccountType, AggregateReport, MonteCarloConfig, ProjectionError, ProjectionInputs,
    RunResult, SolveConfig, SolveResult, StepSize, TaxBracket, TaxBracketTable, TaxRules,
    TimeGrid, WithdrawalPolicy, round_money, run_deterministic, run_monte_carlo,
    solve_max_spending,
};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("failed to read request: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn default_step() -> StepSize {
    StepSize::Annual
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonRequest {
    pub start_date: NaiveDate,
    pub periods: u32,
    #[serde(default = "default_step")]
    pub step: StepSize,
    /// Leading periods spent accumulating before withdrawals begin.
    #[serde(default)]
    pub accumulation_periods: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxRequest {
    pub brackets: Vec<TaxBracket>,
    pub capital_gains_brackets: Option<Vec<TaxBracket>>,
    pub index_to_inflation: bool,
}

impl TaxRequest {
    fn to_rules(&self) -> Result<TaxRules, ProjectionError> {
        Ok(TaxRules {
            income: TaxBracketTable::new(self.brackets.clone())?,
            capital_gains: self
                .capital_gains_brackets
                .clone()
                .map(TaxBracketTable::new)
                .transpose()?,
            index_to_inflation: self.index_to_inflation,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RunMode {
    /// Caller-supplied per-period returns; inflation defaults to zero.
    Deterministic {
        returns: Vec<Decimal>,
        #[serde(default)]
        inflation: Option<Vec<Decimal>>,
    },
    MonteCarlo(MonteCarloConfig),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionRequest {
    pub accounts: Vec<Account>,
    pub horizon: HorizonRequest,
    pub withdrawal: WithdrawalPolicy,
    #[serde(default)]
    pub tax: TaxRequest,
    #[serde(default)]
    pub birth_year: Option<i32>,
    pub mode: RunMode,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOverrides {
    pub runs: Option<usize>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
}

impl RunOverrides {
    fn is_empty(&self) -> bool {
        self.runs.is_none() && self.seed.is_none() && self.workers.is_none()
    }
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(tag = "mode", content = "result", rename_all = "kebab-case")]
pub enum ProjectionOutcome {
    Single(RunResult),
    Aggregate(AggregateReport),
}

impl ProjectionRequest {
    /// Validate the request and build the shared read-only run inputs.
    /// Money amounts are normalized to cents; a taxable account with no
    /// cost basis is treated as all principal.
    pub fn to_inputs(&self) -> Result<ProjectionInputs, ProjectionError> {
        let grid = TimeGrid::new(
            self.horizon.start_date,
            self.horizon.periods,
            self.horizon.step,
            self.horizon.accumulation_periods,
        )?;

        let accounts = self
            .accounts
            .iter()
            .map(|account| {
                let mut account = account.clone();
                account.balance = round_money(account.balance);
                account.cost_basis = round_money(account.cost_basis);
                if account.account_type == AccountType::Taxable && account.cost_basis.is_zero() {
                    account.cost_basis = account.balance;
                }
                account
            })
            .collect();

        ProjectionInputs::new(
            grid,
            accounts,
            self.withdrawal.clone(),
            self.tax.to_rules()?,
            self.birth_year,
        )
    }

    pub fn apply_overrides(&mut self, overrides: &RunOverrides) {
        match &mut self.mode {
            RunMode::MonteCarlo(config) => {
                if let Some(runs) = overrides.runs {
                    config.runs = runs;
                }
                if let Some(seed) = overrides.seed {
                    config.seed = seed;
                }
                if let Some(workers) = overrides.workers {
                    config.workers = Some(workers);
                }
            }
            RunMode::Deterministic { .. } => {
                if !overrides.is_empty() {
                    warn!("run count, seed and worker overrides are ignored in deterministic mode");
                }
            }
        }
    }

    pub fn execute(&self) -> ApiResult<ProjectionOutcome> {
        let inputs = self.to_inputs()?;
        match &self.mode {
            RunMode::Deterministic { returns, inflation } => {
                let inflation = inflation
                    .clone()
                    .unwrap_or_else(|| vec![Decimal::ZERO; returns.len()]);
                let result = run_deterministic(&inputs, returns.clone(), inflation)?;
                info!(
                    "deterministic projection finished: {:?} after {} periods",
                    result.outcome,
                    result.snapshots.len()
                );
                Ok(ProjectionOutcome::Single(result))
            }
            RunMode::MonteCarlo(config) => Ok(ProjectionOutcome::Aggregate(run_monte_carlo(&inputs, config)?)),
        }
    }

    pub fn solve(&self, config: &SolveConfig) -> ApiResult<SolveResult> {
        let RunMode::MonteCarlo(mc) = &self.mode else {
            return Err(ApiError::InvalidRequest(
                "goal solving needs a monte-carlo run mode".to_string(),
            ));
        };
        let inputs = self.to_inputs()?;
        Ok(solve_max_spending(&inputs, mc, config)?)
    }
}

pub fn request_from_json(json: &str) -> ApiResult<ProjectionRequest> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_request(path: &Path) -> ApiResult<ProjectionRequest> {
    let json = fs::read_to_string(path)?;
    request_from_json(&json)
}

pub fn render<T: Serialize>(value: &T, pretty: bool) -> ApiResult<String> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(rendered)
}

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "Retirement savings projection engine (deterministic and Monte Carlo)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[arg(long, help = "Override the Monte Carlo run count")]
    pub runs: Option<usize>,
    #[arg(long, help = "Override the Monte Carlo batch seed")]
    pub seed: Option<u64>,
    #[arg(long, help = "Worker threads; 0 uses one per core")]
    pub workers: Option<usize>,
    #[arg(long, help = "Pretty-print the JSON output")]
    pub pretty: bool,
}

impl RunArgs {
    fn overrides(&self) -> RunOverrides {
        RunOverrides {
            runs: self.runs,
            seed: self.seed,
            workers: self.workers,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Project a request file and print the run result or aggregate report.
    Project {
        request: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Find the highest real spending that meets a success threshold.
    Solve {
        request: PathBuf,
        #[arg(long, help = "Required success probability between 0 and 1")]
        threshold: f64,
        #[arg(long, help = "Lowest real spending per withdrawal period to try")]
        min: Decimal,
        #[arg(long, help = "Highest real spending per withdrawal period to try")]
        max: Decimal,
        #[arg(long, default_value = "1", help = "Stop once the bracket is this narrow")]
        tolerance: Decimal,
        #[arg(long, default_value_t = 40)]
        max_iterations: u32,
        #[arg(long, help = "Runs for the final check of the solved spending")]
        final_runs: Option<usize>,
        #[command(flatten)]
        run: RunArgs,
    },
}

pub fn run(cli: Cli) -> ApiResult<String> {
    match cli.command {
        Command::Project { request, run } => {
            let mut request = load_request(&request)?;
            request.apply_overrides(&run.overrides());
            render(&request.execute()?, run.pretty)
        }
        Command::Solve {
            request,
            threshold,
            min,
            max,
            tolerance,
            max_iterations,
            final_runs,
            run,
        } => {
            let mut request = load_request(&request)?;
            request.apply_overrides(&run.overrides());
            let config = SolveConfig {
                target_success_threshold: threshold,
                search_min: min,
                search_max: max,
                tolerance,
                max_iterations,
                final_runs,
            };
            render(&request.solve(&config)?, run.pretty)
        }
    }
}
