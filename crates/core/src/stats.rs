use crate::error::RebalanceError;
use crate::market::types::PriceTable;
use nalgebra::{DMatrix, DVector};

/// Minimum number of usable return rows for a sample covariance.
pub const MIN_RETURN_ROWS: usize = 2;

/// Mean and sample covariance of daily log-returns, columns in `symbols` order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStats {
    pub symbols: Vec<String>,
    pub mu: DVector<f64>,
    pub sigma: DMatrix<f64>,
    pub observations: usize,
}

/// Log-returns between consecutive dates. A row is kept only when both dates have a
/// positive price for every symbol.
pub fn log_returns(table: &PriceTable) -> Vec<Vec<f64>> {
    table
        .rows
        .windows(2)
        .filter_map(|pair| {
            pair[0]
                .iter()
                .zip(&pair[1])
                .map(|(prev, cur)| match (prev, cur) {
                    (Some(p0), Some(p1)) if *p0 > 0.0 && *p1 > 0.0 => Some((p1 / p0).ln()),
                    _ => None,
                })
                .collect::<Option<Vec<f64>>>()
        })
        .collect()
}

pub fn estimate(table: &PriceTable) -> Result<ReturnStats, RebalanceError> {
    let n = table.symbols.len();
    let returns = log_returns(table);
    let t = returns.len();

    if n == 0 || t < MIN_RETURN_ROWS {
        return Err(RebalanceError::InsufficientHistory {
            usable: t,
            required: MIN_RETURN_ROWS,
        });
    }

    let r = DMatrix::from_fn(t, n, |i, j| returns[i][j]);

    let mu = DVector::from_fn(n, |j, _| r.column(j).mean());

    let mut centered = r;
    for j in 0..n {
        let m = mu[j];
        centered.column_mut(j).add_scalar_mut(-m);
    }
    let mut sigma = centered.transpose() * &centered / (t as f64 - 1.0);
    // Exact symmetry; the product can differ in the last bit across the diagonal.
    sigma = (&sigma + sigma.transpose()) * 0.5;

    tracing::debug!(symbols = n, observations = t, "return statistics estimated");

    Ok(ReturnStats {
        symbols: table.symbols.clone(),
        mu,
        sigma,
        observations: t,
    })
}
