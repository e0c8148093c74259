use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{ProjectionError, ProjectionResult};
use super::money::check_input_amount;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountType {
    #[serde(alias = "taxDeferred", alias = "tax_deferred")]
    TaxDeferred,
    #[serde(alias = "taxFree", alias = "tax_free")]
    TaxFree,
    Taxable,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Accumulating,
    Withdrawing,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepSize {
    Monthly,
    Annual,
}

impl StepSize {
    pub fn months(self) -> u32 {
        match self {
            StepSize::Monthly => 1,
            StepSize::Annual => 12,
        }
    }

    pub fn periods_per_year(self) -> u32 {
        12 / self.months()
    }

    /// Share of a year covered by one step, used to pro-rate annual figures.
    pub fn year_fraction(self) -> Decimal {
        Decimal::ONE / Decimal::from(self.periods_per_year())
    }
}

/// One step of the simulation grid. `index` is 1-based and contiguous.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub index: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub step: StepSize,
    pub phase: Phase,
}

impl Period {
    pub fn year_fraction(&self) -> Decimal {
        self.step.year_fraction()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnPoint {
    pub nominal_return: Decimal,
    pub inflation: Decimal,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReturnPath {
    points: Vec<ReturnPoint>,
}

impl ReturnPath {
    pub(crate) fn from_points(points: Vec<ReturnPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ReturnPoint> {
        self.points.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReturnPoint> {
        self.points.iter()
    }

    pub fn points(&self) -> &[ReturnPoint] {
        &self.points
    }
}

/// Sourcing order plus the spending target, expressed in start-of-horizon
/// money per withdrawal period.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPolicy {
    pub order: Vec<AccountType>,
    pub target_real_spending: Decimal,
}

impl WithdrawalPolicy {
    pub fn new(order: Vec<AccountType>, target_real_spending: Decimal) -> ProjectionResult<Self> {
        let policy = Self {
            order,
            target_real_spending,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> ProjectionResult<()> {
        check_input_amount(self.target_real_spending, "target real spending")?;
        for (idx, account_type) in self.order.iter().enumerate() {
            if self.order[..idx].contains(account_type) {
                return Err(ProjectionError::InvalidParameter(format!(
                    "withdrawal order lists {account_type:?} more than once"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    pub account_id: String,
    pub account_type: AccountType,
    pub balance: Decimal,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalLine {
    pub account_id: String,
    pub account_type: AccountType,
    pub gross: Decimal,
    pub tax: Decimal,
}

impl WithdrawalLine {
    pub fn net(&self) -> Decimal {
        self.gross - self.tax
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSnapshot {
    pub period: Period,
    pub balances: Vec<AccountBalance>,
    pub total_balance: Decimal,
    pub real_total_balance: Decimal,
    pub inflation_index: Decimal,
    pub fees: Decimal,
    pub contributions: Decimal,
    pub contribution_overflow_dropped: Decimal,
    pub target_spending: Decimal,
    pub net_spending: Decimal,
    pub withdrawals: Vec<WithdrawalLine>,
    pub total_withdrawn: Decimal,
    pub tax_paid: Decimal,
    pub shortfall: bool,
}

impl PeriodSnapshot {
    pub fn balance_of(&self, account_id: &str) -> Option<Decimal> {
        self.balances
            .iter()
            .find(|b| b.account_id == account_id)
            .map(|b| b.balance)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Succeeded,
    DepletedEarly,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_index: Option<usize>,
    pub seed: Option<u64>,
    /// Periods in the grid the run was projected over; a depleted run has
    /// fewer snapshots than this.
    pub horizon_length: usize,
    pub outcome: RunOutcome,
    pub depleted_at: Option<u32>,
    pub snapshots: Vec<PeriodSnapshot>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn terminal_balance(&self) -> Decimal {
        self.snapshots
            .last()
            .map(|s| s.total_balance)
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileValue {
    pub percentile: f64,
    pub balance: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodPercentiles {
    pub period_index: u32,
    pub values: Vec<PercentileValue>,
}

impl PeriodPercentiles {
    pub fn at(&self, percentile: f64) -> Option<Decimal> {
        self.values
            .iter()
            .find(|v| v.percentile == percentile)
            .map(|v| v.balance)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WealthDistribution {
    pub count: usize,
    pub min: Decimal,
    pub median: Decimal,
    pub max: Decimal,
    pub mean: Decimal,
    pub percentiles: Vec<PercentileValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub run_count: usize,
    pub success_count: usize,
    pub success_probability: f64,
    pub percentile_levels: Vec<f64>,
    pub trajectories: Vec<PeriodPercentiles>,
    pub terminal_wealth: Option<WealthDistribution>,
}
