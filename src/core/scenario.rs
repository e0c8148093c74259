//! Economic scenario generation.
//!
//! All randomness goes through [`derive_seed`]: a batch seed plus a run
//! index yields the seed of one PCG stream, and that stream alone produces
//! the run's return path. Nothing here touches a global or thread-local RNG,
//! so a batch is reproducible however its runs are scheduled.

use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rand_pcg::Pcg64Mcg;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::{ProjectionError, ProjectionResult};
use super::money::{MAX_RATE, rate_from_f64};
use super::types::{ReturnPath, ReturnPoint};

const MIN_RETURN: f64 = -0.95;
const MAX_RETURN: f64 = 2.5;
const MIN_INFLATION: f64 = -0.03;
const MAX_INFLATION: f64 = 0.20;

/// Per-period distribution of nominal returns and inflation.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionParams {
    pub return_mean: f64,
    pub return_std_dev: f64,
    #[serde(default)]
    pub serial_correlation: Option<f64>,
    #[serde(default)]
    pub inflation_mean: f64,
    #[serde(default)]
    pub inflation_std_dev: f64,
}

impl DistributionParams {
    pub fn validate(&self) -> ProjectionResult<()> {
        for (label, value) in [
            ("return mean", self.return_mean),
            ("return standard deviation", self.return_std_dev),
            ("inflation mean", self.inflation_mean),
            ("inflation standard deviation", self.inflation_std_dev),
        ] {
            if !value.is_finite() {
                return Err(ProjectionError::InvalidParameter(format!(
                    "{label} must be finite"
                )));
            }
        }
        if self.return_std_dev < 0.0 || self.inflation_std_dev < 0.0 {
            return Err(ProjectionError::InvalidParameter(
                "standard deviations must be >= 0".to_string(),
            ));
        }
        if let Some(phi) = self.serial_correlation {
            if !phi.is_finite() || phi.abs() >= 1.0 {
                return Err(ProjectionError::InvalidParameter(
                    "serial correlation must lie strictly between -1 and 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Wrap caller-authored series as a path, checking both match the horizon.
/// Returns must lie in [-1, MAX_RATE] and inflation in (-1, MAX_RATE].
pub fn deterministic_path(
    horizon_length: usize,
    returns: Vec<Decimal>,
    inflation: Vec<Decimal>,
) -> ProjectionResult<ReturnPath> {
    for series in [&returns, &inflation] {
        if series.len() != horizon_length {
            return Err(ProjectionError::LengthMismatch {
                expected: horizon_length,
                actual: series.len(),
            });
        }
    }

    for (idx, (nominal_return, inflation)) in returns.iter().zip(&inflation).enumerate() {
        if *nominal_return < -Decimal::ONE || *nominal_return > MAX_RATE {
            return Err(ProjectionError::InvalidParameter(format!(
                "return {nominal_return} in period {} must be between -1 and {MAX_RATE}",
                idx + 1
            )));
        }
        if *inflation <= -Decimal::ONE || *inflation > MAX_RATE {
            return Err(ProjectionError::InvalidParameter(format!(
                "inflation {inflation} in period {} must be above -1 and at most {MAX_RATE}",
                idx + 1
            )));
        }
    }

    let points = returns
        .into_iter()
        .zip(inflation)
        .map(|(nominal_return, inflation)| ReturnPoint {
            nominal_return,
            inflation,
        })
        .collect();
    Ok(ReturnPath::from_points(points))
}

pub fn sample(
    horizon_length: usize,
    params: &DistributionParams,
    seed: u64,
) -> ProjectionResult<ReturnPath> {
    params.validate()?;
    Ok(sample_path(horizon_length, params, seed))
}

pub fn sample_many(
    count: usize,
    horizon_length: usize,
    params: &DistributionParams,
    batch_seed: u64,
) -> ProjectionResult<Vec<ReturnPath>> {
    params.validate()?;
    Ok((0..count)
        .into_par_iter()
        .map(|run_index| sample_path(horizon_length, params, derive_seed(batch_seed, run_index as u64)))
        .collect())
}

/// Draw one path. Parameters must already be validated.
pub(crate) fn sample_path(
    horizon_length: usize,
    params: &DistributionParams,
    seed: u64,
) -> ReturnPath {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let phi = params.serial_correlation.unwrap_or(0.0);
    let innovation_scale = params.return_std_dev * (1.0 - phi * phi).sqrt();
    let mut previous: Option<f64> = None;

    let mut points = Vec::with_capacity(horizon_length);
    for _ in 0..horizon_length {
        let z_return: f64 = rng.sample(StandardNormal);
        let z_inflation: f64 = rng.sample(StandardNormal);

        // AR(1) around the mean; the first draw uses the stationary spread.
        let raw_return = match previous {
            Some(prev) => {
                params.return_mean
                    + phi * (prev - params.return_mean)
                    + innovation_scale * z_return
            }
            None => params.return_mean + params.return_std_dev * z_return,
        };
        let nominal_return = raw_return.clamp(MIN_RETURN, MAX_RETURN);
        previous = Some(nominal_return);

        let inflation = (params.inflation_mean + params.inflation_std_dev * z_inflation)
            .clamp(MIN_INFLATION, MAX_INFLATION);

        points.push(ReturnPoint {
            nominal_return: rate_from_f64(nominal_return),
            inflation: rate_from_f64(inflation),
        });
    }
    ReturnPath::from_points(points)
}

/// Per-run seed for `run_index` within a batch. splitmix64 is a bijection,
/// so distinct run indices under one batch seed never share a seed.
pub fn derive_seed(batch_seed: u64, run_index: u64) -> u64 {
    splitmix64(batch_seed ^ run_index)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}
