use crate::domain::portfolio::{Holding, RiskProfile};
use anyhow::Context;

#[derive(Debug, Clone)]
pub struct PortfolioRecord {
    pub id: i64,
    pub name: String,
    pub risk: RiskProfile,
    /// Ordered by asset symbol so repeated runs produce the same plan order.
    pub holdings: Vec<Holding>,
}

#[derive(sqlx::FromRow)]
struct PortfolioRow {
    id: i64,
    name: String,
    risk_tolerance: f64,
}

#[derive(sqlx::FromRow)]
struct HoldingRow {
    symbol: String,
    quantity: f64,
    target_pct: Option<f64>,
}

/// Loads a portfolio with its holdings and the owner's risk tolerance.
/// Returns `None` when no portfolio has this id.
pub async fn load_portfolio(
    pool: &sqlx::PgPool,
    portfolio_id: i64,
) -> anyhow::Result<Option<PortfolioRecord>> {
    let row: Option<PortfolioRow> = sqlx::query_as(
        "SELECT p.id, p.name, u.risk_tolerance \
         FROM portfolios p JOIN users u ON u.id = p.user_id \
         WHERE p.id = $1",
    )
    .bind(portfolio_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select portfolio failed (id={portfolio_id})"))?;

    let Some(row) = row else {
        return Ok(None);
    };

    let holdings: Vec<HoldingRow> = sqlx::query_as(
        "SELECT a.symbol, pa.quantity, pa.target_pct \
         FROM portfolio_assets pa JOIN assets a ON a.id = pa.asset_id \
         WHERE pa.portfolio_id = $1 \
         ORDER BY a.symbol",
    )
    .bind(portfolio_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select portfolio_assets failed (id={portfolio_id})"))?;

    let risk = RiskProfile::new(row.risk_tolerance)
        .with_context(|| format!("owner of portfolio {portfolio_id} has an invalid risk tolerance"))?;

    Ok(Some(PortfolioRecord {
        id: row.id,
        name: row.name,
        risk,
        holdings: holdings
            .into_iter()
            .map(|h| Holding {
                symbol: h.symbol,
                quantity: h.quantity,
                target_pct: h.target_pct,
            })
            .collect(),
    }))
}
