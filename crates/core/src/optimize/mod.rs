//! Single-period mean-variance allocation.
//!
//! Minimizes `w'Σw - γ·μ'w` over long-only, fully invested portfolios, optionally with
//! a floor on `μ'w`. `γ` is [`RiskProfile::return_reward`].

pub mod interior_point;

use crate::domain::portfolio::RiskProfile;
use crate::domain::recommendation::OptimalWeights;
use crate::error::RebalanceError;
use crate::stats::ReturnStats;
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

pub use interior_point::InteriorPoint;

/// Raw solver weights below this are treated as zero.
pub const ZERO_WEIGHT_EPS: f64 = 1e-6;

/// `w'·quadratic·w + linear'·w`.
#[derive(Debug, Clone, PartialEq)]
pub struct Objective {
    pub quadratic: DMatrix<f64>,
    pub linear: DVector<f64>,
}

/// `coefficients'·w >= target`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnFloor {
    pub coefficients: DVector<f64>,
    pub target: f64,
}

/// Feasible set: `sum(w) = 1`, `w >= 0`, plus an optional return floor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min_return: Option<ReturnFloor>,
}

#[derive(Debug, Clone, Error)]
pub enum SolveError {
    #[error("problem is infeasible: {0}")]
    Infeasible(String),

    #[error("solver did not converge (status {status})")]
    NotConverged { status: String },

    #[error("malformed problem: {0}")]
    Malformed(String),
}

/// A convex QP backend.
pub trait QpSolver: Send + Sync {
    fn solve(&self, objective: &Objective, constraints: &Constraints)
        -> Result<DVector<f64>, SolveError>;
}

pub fn compute_optimal_weights(
    stats: &ReturnStats,
    risk: RiskProfile,
    target_return: Option<f64>,
) -> Result<OptimalWeights, RebalanceError> {
    compute_optimal_weights_with(&InteriorPoint::default(), stats, risk, target_return)
}

pub fn compute_optimal_weights_with(
    solver: &dyn QpSolver,
    stats: &ReturnStats,
    risk: RiskProfile,
    target_return: Option<f64>,
) -> Result<OptimalWeights, RebalanceError> {
    let n = stats.symbols.len();
    if n == 0 {
        return Ok(OptimalWeights::default());
    }

    let gamma = risk.return_reward();
    let objective = Objective {
        quadratic: stats.sigma.clone(),
        linear: &stats.mu * -gamma,
    };
    let constraints = Constraints {
        min_return: target_return.map(|target| ReturnFloor {
            coefficients: stats.mu.clone(),
            target,
        }),
    };

    let raw = solver
        .solve(&objective, &constraints)
        .map_err(|e| RebalanceError::OptimizationFailed(e.to_string()))?;

    if raw.len() != n {
        return Err(RebalanceError::OptimizationFailed(format!(
            "solver returned {} weights for {n} assets",
            raw.len()
        )));
    }
    if raw.iter().any(|w| !w.is_finite()) {
        return Err(RebalanceError::OptimizationFailed(
            "solver returned non-finite weights".to_string(),
        ));
    }

    let weights = normalize_weights(raw.as_slice());
    tracing::debug!(assets = n, gamma, ?target_return, "optimal weights computed");

    Ok(stats.symbols.iter().cloned().zip(weights).collect())
}

/// Zeroes weights below [`ZERO_WEIGHT_EPS`] and rescales the rest to sum to 1.
/// Falls back to equal weights when nothing survives the clip.
pub fn normalize_weights(raw: &[f64]) -> Vec<f64> {
    let n = raw.len();
    let clipped: Vec<f64> = raw
        .iter()
        .map(|w| if *w < ZERO_WEIGHT_EPS { 0.0 } else { *w })
        .collect();
    let total: f64 = clipped.iter().sum();

    if total > 0.0 {
        clipped.into_iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / n as f64; n]
    }
}
