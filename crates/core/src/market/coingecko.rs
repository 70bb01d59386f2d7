use crate::config::Settings;
use crate::market::types::{MarketChartResponse, SimplePriceResponse};
use crate::market::{FeedError, PriceFeed};
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const SIMPLE_PRICE_PATH: &str = "/simple/price";
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// CoinGecko-compatible price API over HTTP JSON.
#[derive(Debug, Clone)]
pub struct CoinGeckoFeed {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl CoinGeckoFeed {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.price_feed_base_url().to_string();
        let api_key = settings.price_feed_api_key.clone();

        let timeout_secs = std::env::var("PRICE_FEED_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build price feed http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, FeedError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| FeedError::Transport(format!("invalid api key header: {e}")))?;
            headers.insert(API_KEY_HEADER, value);
        }
        Ok(headers)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FeedError> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| FeedError::Transport(format!("failed to read price feed response: {e}")))?;

        classify(status, &text)?;

        serde_json::from_str::<T>(&text)
            .map_err(|e| FeedError::Decode(format!("{e}: {text}")))
    }
}

fn classify(status: StatusCode, body: &str) -> Result<(), FeedError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FeedError::RateLimited);
    }
    if !status.is_success() {
        return Err(FeedError::Status {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(())
}

#[async_trait::async_trait]
impl PriceFeed for CoinGeckoFeed {
    fn feed_name(&self) -> &'static str {
        "coingecko"
    }

    async fn simple_price(
        &self,
        ids: &[String],
        quote_currency: &str,
    ) -> Result<SimplePriceResponse, FeedError> {
        self.get_json(
            SIMPLE_PRICE_PATH,
            &[
                ("ids", ids.join(",")),
                ("vs_currencies", quote_currency.to_string()),
            ],
        )
        .await
    }

    async fn market_chart(
        &self,
        id: &str,
        quote_currency: &str,
        days: u32,
    ) -> Result<MarketChartResponse, FeedError> {
        let path = format!("/coins/{id}/market_chart");
        self.get_json(
            &path,
            &[
                ("vs_currency", quote_currency.to_string()),
                ("days", days.to_string()),
                ("interval", "daily".to_string()),
            ],
        )
        .await
    }
}
