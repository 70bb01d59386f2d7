use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use rebalancer_core::domain::contract::{RebalanceRequest, TargetMode, DEFAULT_LOOKBACK_DAYS};
use rebalancer_core::domain::recommendation::{RebalanceReport, Recommendation};
use rebalancer_core::rebalance::Rebalancer;
use rebalancer_core::RebalanceError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = rebalancer_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match rebalancer_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let rebalancer = Rebalancer::from_settings(&settings)?;
    let state = AppState { pool, rebalancer };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/portfolios/:id/rebalance", post(rebalance_portfolio))
        .route("/portfolios/:id/reports/latest", get(get_latest_report))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    rebalancer: Rebalancer,
}

#[derive(Debug, Deserialize)]
struct RebalanceQuery {
    days: Option<u32>,
    mode: Option<TargetMode>,
    /// Minimum expected daily log-return; only used by the optimized mode.
    target_return: Option<f64>,
}

#[derive(Debug, Serialize)]
struct RebalanceResponse {
    portfolio_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generated_at: Option<DateTime<Utc>>,
    recommendations: Vec<Recommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: anyhow::Error) -> Self {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    fn db_unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
    }
}

impl From<RebalanceError> for ApiError {
    fn from(err: RebalanceError) -> Self {
        let status = status_for(&err);
        let message = err.to_string();
        if status.is_server_error() {
            sentry_anyhow::capture_anyhow(&anyhow::Error::new(err));
            tracing::error!(error = %message, %status, "rebalance failed upstream");
        } else {
            tracing::warn!(error = %message, %status, "rebalance rejected");
        }
        Self::new(status, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

fn status_for(err: &RebalanceError) -> StatusCode {
    match err {
        RebalanceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        RebalanceError::InsufficientHistory { .. } | RebalanceError::OptimizationFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RebalanceError::UpstreamRateLimited { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RebalanceError::UpstreamFetchFailed { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn rebalance_portfolio(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
    Query(query): Query<RebalanceQuery>,
) -> Result<Json<RebalanceResponse>, ApiError> {
    let Some(pool) = &state.pool else {
        return Err(ApiError::db_unavailable());
    };

    let portfolio = rebalancer_core::storage::portfolios::load_portfolio(pool, portfolio_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "portfolio not found"))?;

    let request = RebalanceRequest::new(
        portfolio.holdings,
        portfolio.risk,
        query.days.unwrap_or(DEFAULT_LOOKBACK_DAYS),
    )
    .with_mode(query.mode.unwrap_or_default())
    .with_target_return(query.target_return);

    let plan = state.rebalancer.rebalance(request).await?;

    if plan.is_zero_value() {
        return Ok(Json(RebalanceResponse {
            portfolio_id,
            report_id: None,
            generated_at: None,
            recommendations: plan.recommendations,
            message: plan.message,
        }));
    }

    let report = rebalancer_core::storage::reports::persist_report(pool, portfolio_id, &plan)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(RebalanceResponse {
        portfolio_id,
        report_id: Some(report.report_id),
        generated_at: Some(report.generated_at),
        recommendations: report.recommendations,
        message: None,
    }))
}

async fn get_latest_report(
    State(state): State<AppState>,
    Path(portfolio_id): Path<i64>,
) -> Result<Json<RebalanceReport>, ApiError> {
    let Some(pool) = &state.pool else {
        return Err(ApiError::db_unavailable());
    };

    let report = rebalancer_core::storage::reports::latest_report(pool, portfolio_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no report for portfolio"))?;

    Ok(Json(report))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &rebalancer_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
