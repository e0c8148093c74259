//! Progressive tax on withdrawals.
//!
//! Bracket bounds are annual amounts. Each period they are pro-rated by the
//! period length and, when configured, indexed to cumulative inflation.
//! Every marginal rate applies only to the slice of income inside its
//! bracket, and income above the last finite bound pays the last rate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{ProjectionError, ProjectionResult};
use super::money::{MAX_INPUT_AMOUNT, non_negative, round_money};
use super::types::Period;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    #[serde(default)]
    pub upper_bound: Option<Decimal>,
    pub rate: Decimal,
}

impl TaxBracket {
    pub fn up_to(upper_bound: Decimal, rate: Decimal) -> Self {
        Self {
            upper_bound: Some(upper_bound),
            rate,
        }
    }

    pub fn above(rate: Decimal) -> Self {
        Self {
            upper_bound: None,
            rate,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TaxBracket>", into = "Vec<TaxBracket>")]
pub struct TaxBracketTable {
    brackets: Vec<TaxBracket>,
}

#[derive(Copy, Clone, Debug)]
struct Segment {
    lower: Decimal,
    upper: Option<Decimal>,
    rate: Decimal,
}

impl TaxBracketTable {
    pub fn new(brackets: Vec<TaxBracket>) -> ProjectionResult<Self> {
        let mut previous = Decimal::ZERO;
        for (idx, bracket) in brackets.iter().enumerate() {
            if bracket.rate < Decimal::ZERO || bracket.rate >= Decimal::ONE {
                return Err(ProjectionError::InvalidTaxTable(format!(
                    "bracket {} rate must be in [0, 1)",
                    idx + 1
                )));
            }
            match bracket.upper_bound {
                Some(bound) => {
                    if bound > MAX_INPUT_AMOUNT {
                        return Err(ProjectionError::InvalidTaxTable(format!(
                            "bracket {} upper bound must not exceed {MAX_INPUT_AMOUNT}",
                            idx + 1
                        )));
                    }
                    if bound <= previous {
                        return Err(ProjectionError::InvalidTaxTable(format!(
                            "bracket {} upper bound must exceed {previous}",
                            idx + 1
                        )));
                    }
                    previous = bound;
                }
                None if idx + 1 != brackets.len() => {
                    return Err(ProjectionError::InvalidTaxTable(
                        "only the final bracket may be unbounded".to_string(),
                    ));
                }
                None => {}
            }
        }
        Ok(Self { brackets })
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn flat(rate: Decimal) -> ProjectionResult<Self> {
        Self::new(vec![TaxBracket::above(rate)])
    }

    pub fn brackets(&self) -> &[TaxBracket] {
        &self.brackets
    }

    pub fn is_empty(&self) -> bool {
        self.brackets.is_empty()
    }

    /// Same rates with every bound multiplied by `factor`.
    pub fn scaled(&self, factor: Decimal) -> Self {
        Self {
            brackets: self
                .brackets
                .iter()
                .map(|b| TaxBracket {
                    upper_bound: b.upper_bound.map(|bound| bound * factor),
                    rate: b.rate,
                })
                .collect(),
        }
    }

    fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(self.brackets.len() + 1);
        let mut lower = Decimal::ZERO;
        for bracket in &self.brackets {
            segments.push(Segment {
                lower,
                upper: bracket.upper_bound,
                rate: bracket.rate,
            });
            if let Some(bound) = bracket.upper_bound {
                lower = bound;
            }
        }
        if let Some(last) = self.brackets.last() {
            if let Some(bound) = last.upper_bound {
                segments.push(Segment {
                    lower: bound,
                    upper: None,
                    rate: last.rate,
                });
            }
        }
        segments
    }

    /// Unrounded progressive tax owed on `income`.
    pub fn tax_on(&self, income: Decimal) -> Decimal {
        let income = non_negative(income);
        let mut tax = Decimal::ZERO;
        for segment in self.segments() {
            if income <= segment.lower {
                break;
            }
            let top = segment.upper.map_or(income, |upper| upper.min(income));
            tax += (top - segment.lower) * segment.rate;
        }
        tax
    }

    /// Tax on the income added between `from` and `to`.
    pub fn tax_between(&self, from: Decimal, to: Decimal) -> Decimal {
        non_negative(self.tax_on(to) - self.tax_on(from))
    }

    /// Gross amount whose incremental tax, stacked on `income_so_far`,
    /// leaves exactly `net`. `taxable_share` is the fraction of the gross
    /// counted as income (1 for ordinary income, the gain share for sales).
    /// A gross too large for `Decimal` saturates at `Decimal::MAX`.
    pub fn gross_for_net(&self, income_so_far: Decimal, taxable_share: Decimal, net: Decimal) -> Decimal {
        let net = non_negative(net);
        let share = taxable_share.clamp(Decimal::ZERO, Decimal::ONE);
        if net.is_zero() || share.is_zero() {
            return net;
        }

        let mut income = non_negative(income_so_far);
        let mut remaining = net;
        let mut gross = Decimal::ZERO;
        for segment in self.segments() {
            if segment.upper.is_some_and(|upper| upper <= income) {
                continue;
            }
            let keep = Decimal::ONE - segment.rate * share;
            let Some(upper) = segment.upper else {
                return grossed_up(gross, remaining, keep);
            };
            let room = (upper - income)
                .checked_div(share)
                .and_then(|gross_room| Some((gross_room, gross_room.checked_mul(keep)?)));
            match room {
                Some((gross_room, net_room)) if remaining > net_room => {
                    let Some(total) = gross.checked_add(gross_room) else {
                        return Decimal::MAX;
                    };
                    gross = total;
                    remaining -= net_room;
                    income = upper;
                }
                _ => return grossed_up(gross, remaining, keep),
            }
        }
        gross.checked_add(remaining).unwrap_or(Decimal::MAX)
    }
}

fn grossed_up(gross: Decimal, remaining: Decimal, keep: Decimal) -> Decimal {
    remaining
        .checked_div(keep)
        .and_then(|extra| gross.checked_add(extra))
        .unwrap_or(Decimal::MAX)
}

impl TryFrom<Vec<TaxBracket>> for TaxBracketTable {
    type Error = ProjectionError;

    fn try_from(brackets: Vec<TaxBracket>) -> ProjectionResult<Self> {
        Self::new(brackets)
    }
}

impl From<TaxBracketTable> for Vec<TaxBracket> {
    fn from(table: TaxBracketTable) -> Self {
        table.brackets
    }
}

/// Tax configuration for a projection. Without a capital-gains table,
/// realized gains are stacked on ordinary income in the income table.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxRules {
    pub income: TaxBracketTable,
    pub capital_gains: Option<TaxBracketTable>,
    pub index_to_inflation: bool,
}

impl TaxRules {
    pub fn progressive(income: TaxBracketTable) -> Self {
        Self {
            income,
            ..Self::default()
        }
    }

    fn bound_factor(&self, period: &Period, inflation_index: Decimal) -> Decimal {
        let index = if self.index_to_inflation {
            inflation_index
        } else {
            Decimal::ONE
        };
        index / Decimal::from(period.step.periods_per_year())
    }
}

/// Running tax position for one withdrawal period.
#[derive(Clone, Debug)]
pub struct PeriodTax {
    income_table: TaxBracketTable,
    gains_table: Option<TaxBracketTable>,
    ordinary_income: Decimal,
    gains_income: Decimal,
    paid: Decimal,
}

impl PeriodTax {
    pub fn new(rules: &TaxRules, period: &Period, inflation_index: Decimal) -> Self {
        let factor = rules.bound_factor(period, inflation_index);
        Self {
            income_table: rules.income.scaled(factor),
            gains_table: rules.capital_gains.as_ref().map(|t| t.scaled(factor)),
            ordinary_income: Decimal::ZERO,
            gains_income: Decimal::ZERO,
            paid: Decimal::ZERO,
        }
    }

    pub fn paid(&self) -> Decimal {
        self.paid
    }

    pub fn gross_for_ordinary_net(&self, net: Decimal) -> Decimal {
        self.income_table
            .gross_for_net(self.ordinary_income, Decimal::ONE, net)
    }

    pub fn gross_for_gain_net(&self, gain_share: Decimal, net: Decimal) -> Decimal {
        match &self.gains_table {
            Some(table) => table.gross_for_net(self.gains_income, gain_share, net),
            None => self
                .income_table
                .gross_for_net(self.ordinary_income, gain_share, net),
        }
    }

    /// Record ordinary income and return the tax it adds, in cents.
    pub fn add_ordinary(&mut self, amount: Decimal) -> Decimal {
        let amount = non_negative(amount);
        let before = self.ordinary_income;
        self.ordinary_income += amount;
        let owed = round_money(self.income_table.tax_between(before, self.ordinary_income));
        self.paid += owed;
        owed
    }

    /// Record a realized gain and return the tax it adds, in cents.
    pub fn add_gain(&mut self, gain: Decimal) -> Decimal {
        let gain = non_negative(gain);
        let owed = match &self.gains_table {
            Some(table) => {
                let before = self.gains_income;
                self.gains_income += gain;
                round_money(table.tax_between(before, self.gains_income))
            }
            None => {
                let before = self.ordinary_income;
                self.ordinary_income += gain;
                round_money(self.income_table.tax_between(before, self.ordinary_income))
            }
        };
        self.paid += owed;
        owed
    }
}
