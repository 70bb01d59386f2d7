use anyhow::Context;
use clap::Parser;
use rebalancer_core::domain::contract::{RebalanceRequest, TargetMode, DEFAULT_LOOKBACK_DAYS};
use rebalancer_core::domain::portfolio::{Holding, RiskProfile};
use rebalancer_core::rebalance::Rebalancer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod holdings;

#[derive(Debug, Parser)]
#[command(name = "rebalancer_worker")]
struct Args {
    /// Inline holding as SYMBOL=QTY[:TARGET]. Repeatable.
    #[arg(long = "holding", value_parser = holdings::parse_holding, conflicts_with = "portfolio_id")]
    holdings: Vec<Holding>,

    /// Load holdings and the owner's risk tolerance from the database.
    #[arg(long)]
    portfolio_id: Option<i64>,

    /// Overrides the stored risk tolerance. Defaults to 0.5 for inline holdings.
    #[arg(long)]
    risk_tolerance: Option<f64>,

    /// History window for the return estimates (5..=365).
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
    days: u32,

    /// `optimized` or `stored`.
    #[arg(long, default_value_t = TargetMode::Optimized)]
    mode: TargetMode,

    /// Minimum expected daily log-return for the optimized allocation.
    #[arg(long)]
    target_return: Option<f64>,

    /// Do everything except writing to the database.
    #[arg(long)]
    dry_run: bool,
}

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

    let args = Args::parse();

    if let Err(err) = run(&settings, args).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %format!("{err:#}"), "rebalance run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(settings: &rebalancer_core::config::Settings, args: Args) -> anyhow::Result<()> {
    let rebalancer = Rebalancer::from_settings(settings)?;

    let (pool, holdings, stored_risk) = match args.portfolio_id {
        Some(portfolio_id) => {
            let db_url = settings.require_database_url()?;
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(2)
                .connect(db_url)
                .await
                .context("connect DATABASE_URL failed")?;
            rebalancer_core::storage::migrate(&pool).await?;

            let portfolio = rebalancer_core::storage::portfolios::load_portfolio(&pool, portfolio_id)
                .await?
                .with_context(|| format!("portfolio {portfolio_id} not found"))?;
            tracing::info!(
                portfolio_id,
                name = %portfolio.name,
                holdings = portfolio.holdings.len(),
                "loaded portfolio"
            );
            (Some((pool, portfolio_id)), portfolio.holdings, Some(portfolio.risk))
        }
        None => (None, args.holdings, None),
    };

    let risk = match args.risk_tolerance {
        Some(t) => RiskProfile::new(t)?,
        None => stored_risk.unwrap_or_default(),
    };

    let request = RebalanceRequest::new(holdings, risk, args.days)
        .with_mode(args.mode)
        .with_target_return(args.target_return);

    let plan = rebalancer.rebalance(request).await?;
    println!("{}", serde_json::to_string_pretty(&plan)?);

    let Some((pool, portfolio_id)) = pool else {
        return Ok(());
    };
    if args.dry_run {
        tracing::info!(portfolio_id, dry_run = true, "skipping report persistence");
        return Ok(());
    }
    if plan.is_zero_value() {
        tracing::info!(portfolio_id, "zero-value portfolio; no report persisted");
        return Ok(());
    }

    let report = rebalancer_core::storage::reports::persist_report(&pool, portfolio_id, &plan).await?;
    tracing::info!(portfolio_id, report_id = %report.report_id, "persisted rebalancing report");
    Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inline_run() {
        let args = Args::try_parse_from([
            "rebalancer_worker",
            "--holding",
            "bitcoin=1",
            "--holding",
            "ethereum=10:0.5",
            "--mode",
            "stored",
            "--days",
            "90",
        ])
        .unwrap();
        assert_eq!(args.holdings.len(), 2);
        assert_eq!(args.mode, TargetMode::Stored);
        assert_eq!(args.days, 90);
        assert!(args.portfolio_id.is_none());
    }

    #[test]
    fn inline_holdings_conflict_with_portfolio_id() {
        let res = Args::try_parse_from([
            "rebalancer_worker",
            "--holding",
            "bitcoin=1",
            "--portfolio-id",
            "7",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn defaults_to_optimized_thirty_days() {
        let args = Args::try_parse_from(["rebalancer_worker", "--portfolio-id", "7"]).unwrap();
        assert_eq!(args.mode, TargetMode::Optimized);
        assert_eq!(args.days, 30);
        assert!(!args.dry_run);
    }
}
