//! Price retrieval: the feed abstraction, the CoinGecko-compatible HTTP feed, and the
//! retrying client the rebalancer talks to.

pub mod coingecko;
pub mod retry;
pub mod types;

use crate::domain::portfolio::PriceMap;
use crate::error::RebalanceError;
use crate::market::retry::{with_backoff, RetryPolicy};
use crate::market::types::{MarketChartResponse, PriceSeries, PriceTable, SimplePriceResponse};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// Upstream answered 429.
    #[error("rate limited")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl From<FeedError> for RebalanceError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::RateLimited => RebalanceError::UpstreamRateLimited { attempts: 1 },
            FeedError::Status { status, body } => RebalanceError::UpstreamFetchFailed {
                status: Some(status),
                detail: body,
            },
            other => RebalanceError::fetch_failed(other.to_string()),
        }
    }
}

/// One request/response round trip against the upstream price API. No retries here.
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    fn feed_name(&self) -> &'static str;

    async fn simple_price(
        &self,
        ids: &[String],
        quote_currency: &str,
    ) -> Result<SimplePriceResponse, FeedError>;

    async fn market_chart(
        &self,
        id: &str,
        quote_currency: &str,
        days: u32,
    ) -> Result<MarketChartResponse, FeedError>;
}

#[derive(Clone)]
pub struct MarketDataClient {
    feed: Arc<dyn PriceFeed>,
    retry: RetryPolicy,
}

impl MarketDataClient {
    pub fn new(feed: Arc<dyn PriceFeed>, retry: RetryPolicy) -> Self {
        Self { feed, retry }
    }

    pub fn feed_name(&self) -> &'static str {
        self.feed.feed_name()
    }

    /// Prices for `symbols` in one request. Symbols the feed does not quote map to 0.0.
    pub async fn fetch_current_prices(
        &self,
        symbols: &[String],
        quote_currency: &str,
    ) -> Result<PriceMap, RebalanceError> {
        let ids = distinct(symbols);
        if ids.is_empty() {
            return Ok(PriceMap::new());
        }

        let feed = self.feed.as_ref();
        let quotes = with_backoff(&self.retry, "simple_price", || {
            feed.simple_price(&ids, quote_currency)
        })
        .await?;

        let prices: PriceMap = ids
            .iter()
            .map(|id| {
                let price = quotes
                    .get(id)
                    .and_then(|q| q.get(quote_currency))
                    .copied()
                    .flatten()
                    .unwrap_or(0.0);
                (id.clone(), price)
            })
            .collect();

        let unquoted = prices.values().filter(|p| **p == 0.0).count();
        if unquoted > 0 {
            tracing::warn!(unquoted, quote_currency, "price feed returned no quote for some symbols");
        }

        Ok(prices)
    }

    /// Daily history for every symbol, fetched concurrently and aligned into one table.
    /// Columns follow the order of `symbols` regardless of which request finishes first.
    pub async fn fetch_historical_prices(
        &self,
        symbols: &[String],
        quote_currency: &str,
        days: u32,
    ) -> Result<PriceTable, RebalanceError> {
        let ids = distinct(symbols);

        let mut handles = Vec::with_capacity(ids.len());
        for id in &ids {
            let feed = Arc::clone(&self.feed);
            let retry = self.retry;
            let id = id.clone();
            let quote = quote_currency.to_string();
            handles.push(tokio::spawn(async move {
                let chart = with_backoff(&retry, &id, || feed.market_chart(&id, &quote, days)).await?;
                Ok::<_, RebalanceError>(PriceSeries::from_chart(id, &chart))
            }));
        }

        let mut series = Vec::with_capacity(handles.len());
        let mut pending = handles.into_iter();
        while let Some(handle) = pending.next() {
            let joined = handle
                .await
                .map_err(|e| RebalanceError::fetch_failed(format!("history task failed: {e}")))
                .and_then(|res| res);
            match joined {
                Ok(s) => series.push(s),
                Err(err) => {
                    for rest in pending {
                        rest.abort();
                    }
                    return Err(err);
                }
            }
        }

        let table = PriceTable::align(series);
        tracing::debug!(
            symbols = table.symbols.len(),
            rows = table.len(),
            days,
            "historical prices aligned"
        );
        Ok(table)
    }
}

fn distinct(symbols: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    symbols
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// In-memory feed. Histories are given as daily closes starting 2026-01-01.
    #[derive(Default)]
    pub struct ScriptedFeed {
        pub quotes: BTreeMap<String, f64>,
        pub histories: BTreeMap<String, Vec<Option<f64>>>,
        pub delays: BTreeMap<String, Duration>,
        pub rate_limit_always: bool,
        pub fail_status: Option<u16>,
        /// Per-id HTTP failure for `market_chart`.
        pub chart_failures: BTreeMap<String, u16>,
        /// Ids whose first `market_chart` call answers 429.
        pub throttled_once: Mutex<BTreeSet<String>>,
        /// Successful `market_chart` calls, with the (tokio) time they returned.
        pub completed: Mutex<Vec<(String, Instant)>>,
        pub simple_calls: AtomicU32,
        pub chart_calls: AtomicU32,
    }

    impl ScriptedFeed {
        pub fn quote(mut self, id: &str, price: f64) -> Self {
            self.quotes.insert(id.to_string(), price);
            self
        }

        pub fn history(mut self, id: &str, closes: &[f64]) -> Self {
            self.histories
                .insert(id.to_string(), closes.iter().map(|p| Some(*p)).collect());
            self
        }

        pub fn sparse_history(mut self, id: &str, closes: &[Option<f64>]) -> Self {
            self.histories.insert(id.to_string(), closes.to_vec());
            self
        }

        pub fn delay(mut self, id: &str, delay: Duration) -> Self {
            self.delays.insert(id.to_string(), delay);
            self
        }

        pub fn chart_failure(mut self, id: &str, status: u16) -> Self {
            self.chart_failures.insert(id.to_string(), status);
            self
        }

        pub fn throttle_once(self, id: &str) -> Self {
            self.throttled_once.lock().unwrap().insert(id.to_string());
            self
        }

        pub fn completion_of(&self, id: &str) -> Option<Instant> {
            self.completed
                .lock()
                .unwrap()
                .iter()
                .find(|(done, _)| done == id)
                .map(|(_, at)| *at)
        }

        fn check(&self) -> Result<(), FeedError> {
            if self.rate_limit_always {
                return Err(FeedError::RateLimited);
            }
            if let Some(status) = self.fail_status {
                return Err(FeedError::Status {
                    status,
                    body: "scripted failure".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl PriceFeed for ScriptedFeed {
        fn feed_name(&self) -> &'static str {
            "scripted"
        }

        async fn simple_price(
            &self,
            ids: &[String],
            quote_currency: &str,
        ) -> Result<SimplePriceResponse, FeedError> {
            self.simple_calls.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            Ok(ids
                .iter()
                .filter_map(|id| {
                    let price = self.quotes.get(id)?;
                    let inner = BTreeMap::from([(quote_currency.to_string(), Some(*price))]);
                    Some((id.clone(), inner))
                })
                .collect())
        }

        async fn market_chart(
            &self,
            id: &str,
            _quote_currency: &str,
            _days: u32,
        ) -> Result<MarketChartResponse, FeedError> {
            self.chart_calls.fetch_add(1, Ordering::SeqCst);
            if self.throttled_once.lock().unwrap().remove(id) {
                return Err(FeedError::RateLimited);
            }
            if let Some(delay) = self.delays.get(id) {
                tokio::time::sleep(*delay).await;
            }
            self.check()?;
            if let Some(status) = self.chart_failures.get(id) {
                return Err(FeedError::Status {
                    status: *status,
                    body: "scripted failure".into(),
                });
            }

            let start = NaiveDate::from_ymd_opt(2026, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc().timestamp_millis())
                .unwrap_or_default();
            let closes = self.histories.get(id).cloned().unwrap_or_default();
            let prices = closes
                .iter()
                .enumerate()
                .filter_map(|(i, p)| {
                    p.map(|price| [(start + i as i64 * 86_400_000) as f64, price])
                })
                .collect();
            self.completed
                .lock()
                .unwrap()
                .push((id.to_string(), Instant::now()));
            Ok(MarketChartResponse { prices })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedFeed;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn client(feed: ScriptedFeed) -> (MarketDataClient, Arc<ScriptedFeed>) {
        let feed = Arc::new(feed);
        (
            MarketDataClient::new(feed.clone(), RetryPolicy::default()),
            feed,
        )
    }

    fn syms(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn missing_quote_resolves_to_zero() {
        let (client, _) = client(ScriptedFeed::default().quote("bitcoin", 50_000.0));
        let prices = client
            .fetch_current_prices(&syms(&["bitcoin", "unknown"]), "usd")
            .await
            .unwrap();
        assert_eq!(prices["bitcoin"], 50_000.0);
        assert_eq!(prices["unknown"], 0.0);
    }

    #[tokio::test]
    async fn empty_symbol_set_skips_the_feed() {
        let (client, feed) = client(ScriptedFeed::default());
        let prices = client.fetch_current_prices(&[], "usd").await.unwrap();
        assert!(prices.is_empty());
        assert_eq!(feed.simple_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn current_prices_exhaust_retries_on_persistent_rate_limit() {
        let (client, feed) = client(ScriptedFeed {
            rate_limit_always: true,
            ..Default::default()
        });
        let err = client
            .fetch_current_prices(&syms(&["bitcoin"]), "usd")
            .await
            .unwrap_err();
        assert!(matches!(err, RebalanceError::UpstreamRateLimited { attempts: 3 }));
        assert_eq!(feed.simple_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn history_columns_follow_input_order_not_completion_order() {
        let (client, _) = client(
            ScriptedFeed::default()
                .history("slow", &[1.0, 2.0, 3.0])
                .history("fast", &[10.0, 20.0, 30.0])
                .delay("slow", Duration::from_secs(5)),
        );
        let table = client
            .fetch_historical_prices(&syms(&["slow", "fast"]), "usd", 3)
            .await
            .unwrap();
        assert_eq!(table.symbols, syms(&["slow", "fast"]));
        assert_eq!(table.rows[0], vec![Some(1.0), Some(10.0)]);
        assert_eq!(table.rows[2], vec![Some(3.0), Some(30.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn history_requests_run_concurrently() {
        let (client, feed) = client(
            ScriptedFeed::default()
                .history("a", &[1.0, 2.0])
                .history("b", &[3.0, 4.0])
                .history("c", &[5.0, 6.0])
                .delay("a", Duration::from_secs(5))
                .delay("b", Duration::from_secs(5))
                .delay("c", Duration::from_secs(5)),
        );
        let start = tokio::time::Instant::now();
        let table = client
            .fetch_historical_prices(&syms(&["a", "b", "c"]), "usd", 2)
            .await
            .unwrap();
        assert_eq!(table.symbols.len(), 3);
        assert_eq!(start.elapsed().as_secs(), 5);
        assert_eq!(feed.chart_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_symbol_backing_off_does_not_hold_up_the_others() {
        let (client, feed) = client(
            ScriptedFeed::default()
                .history("throttled", &[1.0, 2.0])
                .history("steady", &[3.0, 4.0])
                .throttle_once("throttled"),
        );
        let start = tokio::time::Instant::now();
        let table = client
            .fetch_historical_prices(&syms(&["throttled", "steady"]), "usd", 2)
            .await
            .unwrap();

        assert_eq!(table.symbols, syms(&["throttled", "steady"]));
        assert_eq!(start.elapsed().as_secs(), 10);
        let steady_done = feed.completion_of("steady").unwrap();
        assert_eq!((steady_done - start).as_secs(), 0);
        let throttled_done = feed.completion_of("throttled").unwrap();
        assert_eq!((throttled_done - start).as_secs(), 10);
        assert_eq!(feed.chart_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_aborts_the_remaining_history_requests() {
        let (client, feed) = client(
            ScriptedFeed::default()
                .history("slow", &[1.0, 2.0])
                .chart_failure("broken", 404)
                .delay("slow", Duration::from_secs(60)),
        );
        let start = tokio::time::Instant::now();
        let err = client
            .fetch_historical_prices(&syms(&["broken", "slow"]), "usd", 2)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RebalanceError::UpstreamFetchFailed {
                status: Some(404),
                ..
            }
        ));
        assert_eq!(start.elapsed().as_secs(), 0);

        // The aborted request never finishes, even once its delay has passed.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(feed.completion_of("slow").is_none());
    }

    #[tokio::test]
    async fn history_fetch_failure_is_fatal() {
        let (client, feed) = client(ScriptedFeed {
            fail_status: Some(404),
            ..Default::default()
        });
        let err = client
            .fetch_historical_prices(&syms(&["bitcoin", "ethereum"]), "usd", 30)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RebalanceError::UpstreamFetchFailed {
                status: Some(404),
                ..
            }
        ));
        assert!(feed.chart_calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn sparse_history_keeps_gaps_as_missing() {
        let (client, _) = client(
            ScriptedFeed::default()
                .history("a", &[1.0, 2.0, 3.0])
                .sparse_history("b", &[Some(5.0), None, Some(7.0)]),
        );
        let table = client
            .fetch_historical_prices(&syms(&["a", "b"]), "usd", 3)
            .await
            .unwrap();
        assert_eq!(table.column("b").unwrap(), vec![Some(5.0), None, Some(7.0)]);
    }
}
