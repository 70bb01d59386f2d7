use crate::domain::recommendation::{RebalancePlan, RebalanceReport, Recommendation};
use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    portfolio_id: i64,
    generated_at: DateTime<Utc>,
    recommendations: Json<Vec<Recommendation>>,
}

impl From<ReportRow> for RebalanceReport {
    fn from(row: ReportRow) -> Self {
        Self {
            report_id: row.id,
            portfolio_id: row.portfolio_id,
            generated_at: row.generated_at,
            recommendations: row.recommendations.0,
        }
    }
}

/// Stores the recommendations of a completed run. Zero-value plans are rejected; they
/// carry no recommendations worth keeping.
pub async fn persist_report(
    pool: &sqlx::PgPool,
    portfolio_id: i64,
    plan: &RebalancePlan,
) -> anyhow::Result<RebalanceReport> {
    anyhow::ensure!(
        !plan.is_zero_value(),
        "zero-value plans are not persisted"
    );

    let report = RebalanceReport {
        report_id: Uuid::new_v4(),
        portfolio_id,
        generated_at: Utc::now(),
        recommendations: plan.recommendations.clone(),
    };

    sqlx::query(
        "INSERT INTO rebalancing_reports (id, portfolio_id, generated_at, recommendations) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(report.report_id)
    .bind(report.portfolio_id)
    .bind(report.generated_at)
    .bind(Json(&report.recommendations))
    .execute(pool)
    .await
    .context("insert rebalancing_reports failed")?;

    tracing::info!(
        report_id = %report.report_id,
        portfolio_id,
        recommendations = report.recommendations.len(),
        "rebalancing report persisted"
    );
    Ok(report)
}

pub async fn latest_report(
    pool: &sqlx::PgPool,
    portfolio_id: i64,
) -> anyhow::Result<Option<RebalanceReport>> {
    let row: Option<ReportRow> = sqlx::query_as(
        "SELECT id, portfolio_id, generated_at, recommendations \
         FROM rebalancing_reports \
         WHERE portfolio_id = $1 \
         ORDER BY generated_at DESC \
         LIMIT 1",
    )
    .bind(portfolio_id)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select latest rebalancing_reports failed (portfolio_id={portfolio_id})"))?;

    Ok(row.map(RebalanceReport::from))
}
