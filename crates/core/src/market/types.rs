use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// `/simple/price` body: `{ "<id>": { "<currency>": price } }`.
pub type SimplePriceResponse = BTreeMap<String, BTreeMap<String, Option<f64>>>;

/// `/coins/{id}/market_chart` body. Only the price points are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketChartResponse {
    /// `[unix_millis, price]` pairs.
    #[serde(default)]
    pub prices: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub price: f64,
}

/// Daily closes for one symbol, ascending by date. Days without data are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Collapses intraday samples to calendar days (UTC); the last sample of a day wins.
    /// Non-finite or non-positive prices are treated as missing.
    pub fn from_chart(symbol: impl Into<String>, chart: &MarketChartResponse) -> Self {
        let mut by_day = BTreeMap::<NaiveDate, (i64, f64)>::new();
        for [ts, price] in chart.prices.iter().copied() {
            if !ts.is_finite() || !price.is_finite() || price <= 0.0 {
                continue;
            }
            let millis = ts as i64;
            let Some(at) = DateTime::<Utc>::from_timestamp_millis(millis) else {
                continue;
            };
            let day = at.date_naive();
            match by_day.get(&day) {
                Some((seen, _)) if *seen > millis => {}
                _ => {
                    by_day.insert(day, (millis, price));
                }
            }
        }

        Self {
            symbol: symbol.into(),
            points: by_day
                .into_iter()
                .map(|(date, (_, price))| PricePoint { date, price })
                .collect(),
        }
    }
}

/// Several series aligned on the union of their dates.
///
/// `rows[i][j]` is the price of `symbols[j]` on `dates[i]`, or `None` when that symbol has
/// no observation for the date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    pub symbols: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub rows: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Column order follows the order of `series`.
    pub fn align(series: Vec<PriceSeries>) -> Self {
        let dates: BTreeSet<NaiveDate> = series
            .iter()
            .flat_map(|s| s.points.iter().map(|p| p.date))
            .collect();
        let dates: Vec<NaiveDate> = dates.into_iter().collect();

        let lookups: Vec<BTreeMap<NaiveDate, f64>> = series
            .iter()
            .map(|s| s.points.iter().map(|p| (p.date, p.price)).collect())
            .collect();

        let rows = dates
            .iter()
            .map(|date| lookups.iter().map(|col| col.get(date).copied()).collect())
            .collect();

        Self {
            symbols: series.into_iter().map(|s| s.symbol).collect(),
            dates,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, symbol: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.symbols.iter().position(|s| s == symbol)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}
