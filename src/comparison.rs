//! Discrepancy metrics between a freshly acquired probe and the trusted baseline.
//!
//! Every strategy maps `(observed, baseline)` onto a non-negative score where
//! larger means "further from the baseline". Argument order matters: the
//! reference metric normalizes by the *baseline* magnitude and is therefore
//! not symmetric.
//!
//! Shape mismatches (different sample counts, or x positions that disagree)
//! score `f64::INFINITY` so they always land in the bad-data zone.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::node::CheckParameters;

/// Tolerance used when checking that both bundles sample the same x positions.
const X_POSITION_TOLERANCE: f64 = 1e-9;

/// Pure comparison strategy attached to a calibration node.
pub trait ComparisonModel: Send + Sync {
    fn compare(&self, observed: &CheckParameters, baseline: &CheckParameters) -> f64;

    /// Short name used in log lines.
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> ComparisonModel for F
where
    F: Fn(&CheckParameters, &CheckParameters) -> f64 + Send + Sync,
{
    fn compare(&self, observed: &CheckParameters, baseline: &CheckParameters) -> f64 {
        self(observed, baseline)
    }
}

/// Root-mean-square residual divided by the baseline's mean absolute value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedRmse;

impl ComparisonModel for NormalizedRmse {
    fn compare(&self, observed: &CheckParameters, baseline: &CheckParameters) -> f64 {
        if !same_shape(observed, baseline) {
            return f64::INFINITY;
        }
        if baseline.y.is_empty() {
            return 0.0;
        }

        let n = baseline.y.len() as f64;
        let sum_sq: f64 = observed
            .y
            .iter()
            .zip(&baseline.y)
            .map(|(o, b)| (o - b).powi(2))
            .sum();
        let rmse = (sum_sq / n).sqrt();
        let scale = baseline.y.iter().map(|b| b.abs()).sum::<f64>() / n;

        let score = normalize(rmse, scale);
        debug!("[compare] nrmse rmse={:.6} scale={:.6} score={:.6}", rmse, scale, score);
        score
    }

    fn name(&self) -> &'static str {
        "normalized_rmse"
    }
}

/// Largest pointwise residual divided by the baseline's peak magnitude.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxAbsDeviation;

impl ComparisonModel for MaxAbsDeviation {
    fn compare(&self, observed: &CheckParameters, baseline: &CheckParameters) -> f64 {
        if !same_shape(observed, baseline) {
            return f64::INFINITY;
        }

        let worst = observed
            .y
            .iter()
            .zip(&baseline.y)
            .map(|(o, b)| (o - b).abs())
            .fold(0.0_f64, f64::max);
        let peak = baseline.y.iter().map(|b| b.abs()).fold(0.0_f64, f64::max);

        normalize(worst, peak)
    }

    fn name(&self) -> &'static str {
        "max_abs_deviation"
    }
}

/// Configuration-level selector for the built-in strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonKind {
    #[default]
    NormalizedRmse,
    MaxAbsDeviation,
}

impl ComparisonKind {
    pub fn build(self) -> Box<dyn ComparisonModel> {
        match self {
            ComparisonKind::NormalizedRmse => Box::new(NormalizedRmse),
            ComparisonKind::MaxAbsDeviation => Box::new(MaxAbsDeviation),
        }
    }
}

fn same_shape(observed: &CheckParameters, baseline: &CheckParameters) -> bool {
    if observed.y.len() != baseline.y.len() || observed.x.len() != baseline.x.len() {
        return false;
    }
    observed
        .x
        .iter()
        .zip(&baseline.x)
        .all(|(a, b)| (a - b).abs() <= X_POSITION_TOLERANCE)
}

fn normalize(residual: f64, scale: f64) -> f64 {
    if scale > 0.0 {
        residual / scale
    } else if residual == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}
