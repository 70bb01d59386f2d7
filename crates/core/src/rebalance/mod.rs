pub mod generator;

use crate::config::Settings;
use crate::domain::contract::{RebalanceRequest, TargetMode};
use crate::domain::portfolio::Holding;
use crate::domain::recommendation::{OptimalWeights, RebalancePlan};
use crate::error::RebalanceError;
use crate::market::coingecko::CoinGeckoFeed;
use crate::market::retry::RetryPolicy;
use crate::market::MarketDataClient;
use crate::optimize::{compute_optimal_weights_with, InteriorPoint, QpSolver};
use crate::stats;
use std::sync::Arc;

pub use generator::generate;

/// Prices a portfolio, derives target weights, and turns the gap into buy/sell actions.
/// Holds no per-request state; one instance can serve concurrent requests.
#[derive(Clone)]
pub struct Rebalancer {
    market: MarketDataClient,
    quote_currency: String,
    solver: Arc<dyn QpSolver>,
}

impl Rebalancer {
    pub fn new(market: MarketDataClient, quote_currency: impl Into<String>) -> Self {
        Self {
            market,
            quote_currency: quote_currency.into(),
            solver: Arc::new(InteriorPoint::default()),
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let feed = CoinGeckoFeed::from_settings(settings)?;
        let market = MarketDataClient::new(Arc::new(feed), RetryPolicy::from_env());
        Ok(Self::new(market, settings.quote_currency()))
    }

    pub fn with_solver(mut self, solver: Arc<dyn QpSolver>) -> Self {
        self.solver = solver;
        self
    }

    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    pub async fn rebalance(&self, request: RebalanceRequest) -> Result<RebalancePlan, RebalanceError> {
        let request = request.validate_and_normalize()?;
        let symbols = request.symbols();

        tracing::info!(
            assets = symbols.len(),
            mode = %request.mode,
            lookback_days = request.lookback_days,
            risk_tolerance = request.risk.risk_tolerance,
            feed = self.market.feed_name(),
            "rebalance started"
        );

        let prices = self
            .market
            .fetch_current_prices(&symbols, &self.quote_currency)
            .await?;

        let total_value: f64 = request
            .holdings
            .iter()
            .map(|h| h.quantity * prices.get(&h.symbol).copied().unwrap_or(0.0))
            .sum();
        if total_value <= 0.0 {
            tracing::info!("portfolio has zero value; skipping optimization");
            return Ok(generate(&request.holdings, &prices, &OptimalWeights::default()));
        }

        let targets = match request.mode {
            TargetMode::Optimized => {
                let history = self
                    .market
                    .fetch_historical_prices(&symbols, &self.quote_currency, request.lookback_days)
                    .await?;
                let stats = stats::estimate(&history)?;
                compute_optimal_weights_with(
                    self.solver.as_ref(),
                    &stats,
                    request.risk,
                    request.target_return,
                )?
            }
            TargetMode::Stored => stored_targets(&request.holdings),
        };

        let plan = generate(&request.holdings, &prices, &targets);
        tracing::info!(
            recommendations = plan.recommendations.len(),
            total_value,
            "rebalance finished"
        );
        Ok(plan)
    }
}

fn stored_targets(holdings: &[Holding]) -> OptimalWeights {
    holdings
        .iter()
        .map(|h| (h.symbol.clone(), h.target_pct.unwrap_or(0.0)))
        .collect()
}
