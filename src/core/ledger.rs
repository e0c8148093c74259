use std::collections::BTreeMap;

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{ProjectionError, ProjectionResult};
use super::money::{
    MAX_BALANCE, MAX_INPUT_AMOUNT, MAX_RATE, check_input_amount, checked_add, checked_mul,
    growth_factor, non_negative, round_money, round_rate, within,
};
use super::types::{AccountBalance, AccountType, Period, Phase};

/// Scheduled deposits. `overrides` replaces the recurring amount for the
/// listed period indices; the recurring amount grows once per elapsed whole
/// year of the horizon.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContributionSchedule {
    pub per_period: Decimal,
    pub annual_growth: Decimal,
    pub overrides: BTreeMap<u32, Decimal>,
}

impl ContributionSchedule {
    pub fn level(per_period: Decimal) -> Self {
        Self {
            per_period,
            ..Self::default()
        }
    }

    pub fn with_growth(mut self, annual_growth: Decimal) -> Self {
        self.annual_growth = annual_growth;
        self
    }

    pub fn with_override(mut self, period_index: u32, amount: Decimal) -> Self {
        self.overrides.insert(period_index, amount);
        self
    }

    pub fn amount_for(&self, period: &Period) -> ProjectionResult<Decimal> {
        if let Some(amount) = self.overrides.get(&period.index) {
            return Ok(round_money(non_negative(*amount)));
        }

        let years_elapsed = (period.index - 1) / period.step.periods_per_year();
        let factor = growth_factor(self.annual_growth, "contribution growth")?;
        let mut multiplier = Decimal::ONE;
        for _ in 0..years_elapsed {
            multiplier = round_rate(checked_mul(multiplier, factor, "contribution growth")?);
        }
        let amount = checked_mul(self.per_period, multiplier, "scheduled contribution")?;
        within(round_money(non_negative(amount)), MAX_BALANCE, "scheduled contribution")
    }

    fn validate(&self) -> ProjectionResult<()> {
        check_input_amount(self.per_period, "contribution")?;
        for amount in self.overrides.values() {
            check_input_amount(*amount, "contribution override")?;
        }
        if self.annual_growth <= -Decimal::ONE || self.annual_growth > MAX_RATE {
            return Err(ProjectionError::InvalidParameter(format!(
                "contribution growth must be > -100% and <= {MAX_RATE}"
            )));
        }
        Ok(())
    }
}

/// Calendar-year cap on deposits. The catch-up amount is added once the
/// owner's age on December 31 of the contribution year reaches `catch_up_age`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionLimit {
    pub annual: Decimal,
    #[serde(default)]
    pub catch_up: Decimal,
    #[serde(default)]
    pub catch_up_age: Option<u32>,
}

impl ContributionLimit {
    pub fn allowance_for_year(&self, year: i32, birth_year: Option<i32>) -> Decimal {
        let eligible = match (self.catch_up_age, birth_year) {
            (Some(age), Some(born)) => i64::from(year) - i64::from(born) >= i64::from(age),
            _ => false,
        };
        if eligible {
            self.annual + self.catch_up
        } else {
            self.annual
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub account_type: AccountType,
    pub balance: Decimal,
    #[serde(default)]
    pub cost_basis: Decimal,
    #[serde(default)]
    pub contributions: ContributionSchedule,
    #[serde(default)]
    pub annual_fee_rate: Decimal,
    #[serde(default)]
    pub contribution_limit: Option<ContributionLimit>,
}

impl Account {
    pub fn new(id: impl Into<String>, account_type: AccountType, balance: Decimal) -> Self {
        let balance = round_money(balance);
        Self {
            id: id.into(),
            account_type,
            balance,
            cost_basis: if account_type == AccountType::Taxable {
                balance
            } else {
                Decimal::ZERO
            },
            contributions: ContributionSchedule::default(),
            annual_fee_rate: Decimal::ZERO,
            contribution_limit: None,
        }
    }

    pub fn with_cost_basis(mut self, cost_basis: Decimal) -> Self {
        self.cost_basis = round_money(cost_basis);
        self
    }

    pub fn with_contributions(mut self, contributions: ContributionSchedule) -> Self {
        self.contributions = contributions;
        self
    }

    pub fn with_fee_rate(mut self, annual_fee_rate: Decimal) -> Self {
        self.annual_fee_rate = annual_fee_rate;
        self
    }

    pub fn with_limit(mut self, limit: ContributionLimit) -> Self {
        self.contribution_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> ProjectionResult<()> {
        if self.id.trim().is_empty() {
            return Err(ProjectionError::InvalidParameter(
                "account id must not be empty".to_string(),
            ));
        }
        check_input_amount(self.balance, &format!("account {} balance", self.id))?;
        check_input_amount(self.cost_basis, &format!("account {} cost basis", self.id))?;
        if self.annual_fee_rate < Decimal::ZERO || self.annual_fee_rate > Decimal::ONE {
            return Err(ProjectionError::InvalidParameter(format!(
                "account {} fee rate must be between 0 and 1",
                self.id
            )));
        }
        if let Some(limit) = &self.contribution_limit {
            let in_range = |amount: Decimal| amount >= Decimal::ZERO && amount <= MAX_INPUT_AMOUNT;
            if !in_range(limit.annual) || !in_range(limit.catch_up) {
                return Err(ProjectionError::InvalidParameter(format!(
                    "account {} contribution limit must be between 0 and {MAX_INPUT_AMOUNT}",
                    self.id
                )));
            }
        }
        self.contributions.validate()
    }

    /// Grow by the period return, then charge the pro-rated fee on the
    /// grown balance. Returns the fee charged. A grown balance above
    /// [`MAX_BALANCE`] is an error and leaves the account untouched.
    pub fn apply_growth(&mut self, period: &Period, return_rate: Decimal) -> ProjectionResult<Decimal> {
        let factor = growth_factor(return_rate, "period return")?;
        let grown = checked_mul(self.balance, factor, "account balance")?;
        let grown = within(non_negative(round_money(grown)), MAX_BALANCE, "account balance")?;
        let periods_per_year = Decimal::from(period.step.periods_per_year());
        let fee = round_money(grown * self.annual_fee_rate / periods_per_year).min(grown);
        self.balance = grown - fee;
        Ok(fee)
    }

    pub fn deposit(&mut self, amount: Decimal) -> ProjectionResult<()> {
        let amount = round_money(non_negative(amount));
        let balance = checked_add(self.balance, amount, "account balance")?;
        self.balance = within(balance, MAX_BALANCE, "account balance")?;
        if self.account_type == AccountType::Taxable {
            self.cost_basis = checked_add(self.cost_basis, amount, "cost basis")?;
        }
        Ok(())
    }

    /// Growth, fees, then the given contribution. Returns the fee charged.
    pub fn apply_period(
        &mut self,
        period: &Period,
        return_rate: Decimal,
        contribution: Decimal,
    ) -> ProjectionResult<Decimal> {
        let fee = self.apply_growth(period, return_rate)?;
        self.deposit(contribution)?;
        Ok(fee)
    }

    /// Take up to `amount`, clamped to the balance. The shortfall is
    /// `amount - returned`; running dry is never an error.
    pub fn withdraw(&mut self, amount: Decimal) -> Decimal {
        let requested = round_money(non_negative(amount));
        let taken = requested.min(self.balance);
        if taken <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        if self.account_type == AccountType::Taxable {
            let released = if taken == self.balance {
                self.cost_basis
            } else {
                self.basis_for(taken)
            };
            self.cost_basis = non_negative(self.cost_basis - released);
        }
        self.balance -= taken;
        taken
    }

    /// Cost basis attributable to selling `gross` of the current balance.
    pub fn basis_for(&self, gross: Decimal) -> Decimal {
        if self.balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        round_money(self.cost_basis * gross.min(self.balance) / self.balance).min(self.cost_basis)
    }

    /// Fraction of each unit withdrawn that counts as taxable income.
    pub fn taxable_share(&self) -> Decimal {
        match self.account_type {
            AccountType::TaxFree => Decimal::ZERO,
            AccountType::TaxDeferred => Decimal::ONE,
            AccountType::Taxable => {
                if self.balance <= Decimal::ZERO {
                    return Decimal::ZERO;
                }
                let gain = non_negative(self.balance - self.cost_basis);
                (gain / self.balance).min(Decimal::ONE)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ContributionFlow {
    pub deposited: Decimal,
    pub dropped: Decimal,
}

/// The account set owned by a single run.
#[derive(Clone, Debug)]
pub struct Ledger {
    accounts: Vec<Account>,
    contributed_this_year: Vec<Decimal>,
    contribution_year: Option<i32>,
    birth_year: Option<i32>,
}

impl Ledger {
    pub fn new(accounts: Vec<Account>, birth_year: Option<i32>) -> Self {
        let contributed_this_year = vec![Decimal::ZERO; accounts.len()];
        Self {
            accounts,
            contributed_this_year,
            contribution_year: None,
            birth_year,
        }
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub(crate) fn account_mut(&mut self, idx: usize) -> Option<&mut Account> {
        self.accounts.get_mut(idx)
    }

    /// Indices of accounts of the given type, in request order.
    pub fn indices_of(&self, account_type: AccountType) -> Vec<usize> {
        self.accounts
            .iter()
            .enumerate()
            .filter(|(_, a)| a.account_type == account_type)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn total_balance(&self) -> Decimal {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    pub fn balances(&self) -> Vec<AccountBalance> {
        self.accounts
            .iter()
            .map(|a| AccountBalance {
                account_id: a.id.clone(),
                account_type: a.account_type,
                balance: a.balance,
            })
            .collect()
    }

    /// Growth and fees for every account. Returns total fees charged.
    pub fn apply_growth(&mut self, period: &Period, return_rate: Decimal) -> ProjectionResult<Decimal> {
        let mut fees = Decimal::ZERO;
        for account in &mut self.accounts {
            fees += account.apply_growth(period, return_rate)?;
        }
        Ok(fees)
    }

    /// Unused calendar-year allowance of account `idx`; unlimited accounts
    /// have no ceiling.
    fn room(&self, idx: usize, year: i32) -> Decimal {
        match &self.accounts[idx].contribution_limit {
            Some(limit) => non_negative(
                limit.allowance_for_year(year, self.birth_year) - self.contributed_this_year[idx],
            ),
            None => Decimal::MAX,
        }
    }

    fn credit(&mut self, idx: usize, amount: Decimal) -> ProjectionResult<()> {
        self.accounts[idx].deposit(amount)?;
        self.contributed_this_year[idx] += amount;
        Ok(())
    }

    /// Deposit each account's scheduled contribution for `period`, capping
    /// at its calendar-year limit. Excess goes to taxable accounts in
    /// request order, each only up to its own remaining allowance; whatever
    /// no taxable account can take is dropped.
    pub fn contribute(&mut self, period: &Period) -> ProjectionResult<ContributionFlow> {
        let year = period.start_date.year();
        if self.contribution_year != Some(year) {
            self.contribution_year = Some(year);
            self.contributed_this_year.fill(Decimal::ZERO);
        }

        let mut flow = ContributionFlow::default();
        let mut overflow = Decimal::ZERO;
        for idx in 0..self.accounts.len() {
            let scheduled = self.accounts[idx].contributions.amount_for(period)?;
            let accepted = scheduled.min(self.room(idx, year));
            self.credit(idx, accepted)?;
            overflow += scheduled - accepted;
            flow.deposited += accepted;
        }

        for idx in self.indices_of(AccountType::Taxable) {
            if overflow <= Decimal::ZERO {
                break;
            }
            let accepted = overflow.min(self.room(idx, year));
            if accepted > Decimal::ZERO {
                self.credit(idx, accepted)?;
                overflow -= accepted;
                flow.deposited += accepted;
            }
        }
        flow.dropped = overflow;
        Ok(flow)
    }

    /// Growth, fees and, while accumulating, scheduled contributions.
    pub fn apply_period(
        &mut self,
        period: &Period,
        return_rate: Decimal,
    ) -> ProjectionResult<(Decimal, ContributionFlow)> {
        let fees = self.apply_growth(period, return_rate)?;
        let flow = match period.phase {
            Phase::Accumulating => self.contribute(period)?,
            Phase::Withdrawing => ContributionFlow::default(),
        };
        Ok((fees, flow))
    }
}
