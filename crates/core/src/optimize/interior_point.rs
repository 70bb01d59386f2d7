use crate::optimize::{Constraints, Objective, QpSolver, SolveError};
use clarabel::algebra::*;
use clarabel::solver::*;
use nalgebra::DVector;

const FEASIBILITY_TOL: f64 = 1e-9;
/// Diagonal entries below this fraction of the largest one are left unscaled.
const MIN_RELATIVE_VARIANCE: f64 = 1e-12;

/// Clarabel interior-point backend.
///
/// Clarabel minimizes `½x'Px + q'x` subject to `Ax + s = b`, `s ∈ K`. The simplex becomes
/// one zero-cone row (`sum(w) = 1`) and `n` non-negative rows (`-w <= 0`); a return floor
/// adds the row `-μ'w <= -target`.
///
/// Variables are Jacobi-scaled (`w = D·v`, `D_ii ∝ 1/σ_i`) and the objective is normalized
/// before solving, so portfolios mixing volatile coins with near-constant stablecoins are
/// solved to full precision.
#[derive(Debug, Clone)]
pub struct InteriorPoint {
    pub max_iter: u32,
    pub tol_gap_abs: f64,
    pub tol_gap_rel: f64,
    pub tol_feas: f64,
}

impl Default for InteriorPoint {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol_gap_abs: 1e-10,
            tol_gap_rel: 1e-10,
            tol_feas: 1e-10,
        }
    }
}

impl QpSolver for InteriorPoint {
    fn solve(
        &self,
        objective: &Objective,
        constraints: &Constraints,
    ) -> Result<DVector<f64>, SolveError> {
        let n = objective.linear.len();
        validate(objective, constraints)?;
        if n == 0 {
            return Ok(DVector::zeros(0));
        }

        if let Some(floor) = &constraints.min_return {
            let best = floor.coefficients.max();
            if floor.target > best + FEASIBILITY_TOL {
                return Err(SolveError::Infeasible(format!(
                    "target return {} exceeds the best asset mean {best}",
                    floor.target
                )));
            }
        }

        let q_mat = &objective.quadratic;
        let scale = jacobi_scale(q_mat);

        // P = 2·D·Q·D (upper triangle), q = D·c, both divided by a common factor.
        let mut p_entries = Vec::new();
        for j in 0..n {
            for i in 0..=j {
                let v = 2.0 * scale[i] * q_mat[(i, j)] * scale[j];
                if v != 0.0 {
                    p_entries.push((i, j, v));
                }
            }
        }
        let q_vec: Vec<f64> = (0..n).map(|i| scale[i] * objective.linear[i]).collect();

        let magnitude = p_entries
            .iter()
            .map(|(_, _, v)| v.abs())
            .chain(q_vec.iter().map(|v| v.abs()))
            .fold(0.0_f64, f64::max);
        let norm = if magnitude > 0.0 { magnitude } else { 1.0 };

        let mut p_colptr = vec![0];
        let mut p_rowval = Vec::with_capacity(p_entries.len());
        let mut p_nzval = Vec::with_capacity(p_entries.len());
        let mut entries = p_entries.into_iter().peekable();
        for j in 0..n {
            while let Some((i, _, v)) = entries.next_if(|(_, col, _)| *col == j) {
                p_rowval.push(i);
                p_nzval.push(v / norm);
            }
            p_colptr.push(p_nzval.len());
        }
        let p = CscMatrix::new(n, n, p_colptr, p_rowval, p_nzval);
        let q: Vec<f64> = q_vec.into_iter().map(|v| v / norm).collect();

        // Rows: 0 = budget, 1..=n = non-negativity, n+1 = optional return floor.
        let floor = constraints.min_return.as_ref();
        let rows = 1 + n + usize::from(floor.is_some());
        let mut a_colptr = vec![0];
        let mut a_rowval = Vec::new();
        let mut a_nzval = Vec::new();
        for j in 0..n {
            a_rowval.push(0);
            a_nzval.push(scale[j]);
            a_rowval.push(1 + j);
            a_nzval.push(-1.0);
            if let Some(f) = floor {
                let coef = -f.coefficients[j] * scale[j];
                if coef != 0.0 {
                    a_rowval.push(1 + n);
                    a_nzval.push(coef);
                }
            }
            a_colptr.push(a_nzval.len());
        }
        let a = CscMatrix::new(rows, n, a_colptr, a_rowval, a_nzval);

        let mut b = vec![1.0];
        b.extend(std::iter::repeat(0.0).take(n));
        if let Some(f) = floor {
            b.push(-f.target);
        }

        let cones = [ZeroConeT(1), NonnegativeConeT(rows - 1)];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iter)
            .tol_gap_abs(self.tol_gap_abs)
            .tol_gap_rel(self.tol_gap_rel)
            .tol_feas(self.tol_feas)
            .verbose(false)
            .build()
            .map_err(|e| SolveError::Malformed(format!("invalid solver settings: {e}")))?;

        let mut solver = DefaultSolver::new(&p, &q, &a, &b, &cones, settings)
            .map_err(|e| SolveError::Malformed(format!("solver setup failed: {e:?}")))?;
        solver.solve();

        match &solver.solution.status {
            SolverStatus::Solved => {}
            status @ (SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible) => {
                return Err(SolveError::Infeasible(format!("solver reported {status:?}")));
            }
            other => {
                return Err(SolveError::NotConverged {
                    status: format!("{other:?}"),
                });
            }
        }

        Ok(DVector::from_fn(n, |i, _| scale[i] * solver.solution.x[i]))
    }
}

/// `D_ii = σ_max / σ_i`, or 1 for (near) zero-variance assets.
fn jacobi_scale(q: &nalgebra::DMatrix<f64>) -> Vec<f64> {
    let diag: Vec<f64> = q.diagonal().iter().copied().collect();
    let max_var = diag.iter().copied().fold(0.0_f64, f64::max);
    if max_var <= 0.0 {
        return vec![1.0; diag.len()];
    }
    let floor = max_var * MIN_RELATIVE_VARIANCE;
    diag.iter()
        .map(|&v| if v > floor { (max_var / v).sqrt() } else { 1.0 })
        .collect()
}

fn validate(objective: &Objective, constraints: &Constraints) -> Result<(), SolveError> {
    let n = objective.linear.len();
    let q = &objective.quadratic;
    if q.nrows() != n || q.ncols() != n {
        return Err(SolveError::Malformed(format!(
            "quadratic term is {}x{}, expected {n}x{n}",
            q.nrows(),
            q.ncols()
        )));
    }
    if q.iter().chain(objective.linear.iter()).any(|v| !v.is_finite()) {
        return Err(SolveError::Malformed("non-finite objective".to_string()));
    }
    if let Some(floor) = &constraints.min_return {
        if floor.coefficients.len() != n {
            return Err(SolveError::Malformed(format!(
                "return floor has {} coefficients, expected {n}",
                floor.coefficients.len()
            )));
        }
        if !floor.target.is_finite() || floor.coefficients.iter().any(|v| !v.is_finite()) {
            return Err(SolveError::Malformed("non-finite return floor".to_string()));
        }
    }
    Ok(())
}
