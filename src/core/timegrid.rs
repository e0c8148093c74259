use chrono::{Months, NaiveDate};

use super::error::{ProjectionError, ProjectionResult};
use super::types::{Period, Phase, StepSize};

/// Discrete simulation horizon. `accumulation_periods` is the number of
/// leading periods tagged `Accumulating`; every period after it withdraws.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TimeGrid {
    start: NaiveDate,
    horizon_length: u32,
    step: StepSize,
    accumulation_periods: u32,
}

// `new` rejects an empty horizon, so there is no `is_empty`.
#[allow(clippy::len_without_is_empty)]
impl TimeGrid {
    pub fn new(
        start: NaiveDate,
        horizon_length: u32,
        step: StepSize,
        accumulation_periods: u32,
    ) -> ProjectionResult<Self> {
        if horizon_length == 0 {
            return Err(ProjectionError::InvalidHorizon(
                "horizon length must be > 0".to_string(),
            ));
        }
        if accumulation_periods > horizon_length {
            return Err(ProjectionError::InvalidHorizon(format!(
                "transition after {accumulation_periods} periods lies outside a horizon of {horizon_length}"
            )));
        }

        let end_reachable = horizon_length
            .checked_mul(step.months())
            .and_then(|months| start.checked_add_months(Months::new(months)))
            .is_some();
        if !end_reachable {
            return Err(ProjectionError::InvalidHorizon(
                "horizon end date is out of range".to_string(),
            ));
        }

        Ok(Self {
            start,
            horizon_length,
            step,
            accumulation_periods,
        })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn step(&self) -> StepSize {
        self.step
    }

    pub fn accumulation_periods(&self) -> u32 {
        self.accumulation_periods
    }

    pub fn len(&self) -> usize {
        self.horizon_length as usize
    }

    pub fn phase_at(&self, index: u32) -> Phase {
        if index <= self.accumulation_periods {
            Phase::Accumulating
        } else {
            Phase::Withdrawing
        }
    }

    pub fn period(&self, index: u32) -> Option<Period> {
        if index == 0 || index > self.horizon_length {
            return None;
        }
        let months = self.step.months();
        let start_date = self
            .start
            .checked_add_months(Months::new((index - 1) * months))?;
        let end_date = self.start.checked_add_months(Months::new(index * months))?;
        Some(Period {
            index,
            start_date,
            end_date,
            step: self.step,
            phase: self.phase_at(index),
        })
    }

    /// Lazily walks the horizon in order, one `Period` per step.
    pub fn periods(&self) -> Periods<'_> {
        Periods {
            grid: self,
            next_index: 1,
        }
    }
}

pub struct Periods<'a> {
    grid: &'a TimeGrid,
    next_index: u32,
}

impl Iterator for Periods<'_> {
    type Item = Period;

    fn next(&mut self) -> Option<Period> {
        let period = self.grid.period(self.next_index)?;
        self.next_index += 1;
        Some(period)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.grid.horizon_length + 1).saturating_sub(self.next_index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Periods<'_> {}
