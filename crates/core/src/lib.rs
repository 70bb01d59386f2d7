pub mod domain;
pub mod error;
pub mod market;
pub mod optimize;
pub mod rebalance;
pub mod stats;
pub mod storage;

pub use error::RebalanceError;

pub mod config {
    use anyhow::Context;

    pub const DEFAULT_PRICE_FEED_BASE_URL: &str = "https://api.coingecko.com/api/v3";
    pub const DEFAULT_QUOTE_CURRENCY: &str = "usd";

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub price_feed_base_url: Option<String>,
        pub price_feed_api_key: Option<String>,
        pub quote_currency: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                price_feed_base_url: std::env::var("PRICE_FEED_BASE_URL").ok(),
                price_feed_api_key: std::env::var("PRICE_FEED_API_KEY")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                quote_currency: std::env::var("QUOTE_CURRENCY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn price_feed_base_url(&self) -> &str {
            self.price_feed_base_url
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(DEFAULT_PRICE_FEED_BASE_URL)
        }

        pub fn quote_currency(&self) -> String {
            self.quote_currency
                .as_deref()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_QUOTE_CURRENCY.to_string())
        }
    }
}
