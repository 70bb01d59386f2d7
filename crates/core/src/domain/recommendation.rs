use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => f.write_str("buy"),
            Action::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub current_pct: f64,
    pub target_pct: f64,
    pub action: Action,
    pub amount_units: f64,
    pub amount_value: f64,
}

/// Target allocation keyed by symbol. Weights are non-negative and sum to 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimalWeights(BTreeMap<String, f64>);

impl OptimalWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self(weights)
    }

    /// Weight for `symbol`, or 0.0 when the symbol has no target.
    pub fn get(&self, symbol: &str) -> f64 {
        self.0.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for OptimalWeights {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Outcome of one rebalancing run.
///
/// `message` is only set when the run short-circuited on a zero-value portfolio,
/// in which case `recommendations` is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub recommendations: Vec<Recommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RebalancePlan {
    pub fn is_zero_value(&self) -> bool {
        self.recommendations.is_empty() && self.message.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub report_id: uuid::Uuid,
    pub portfolio_id: i64,
    pub generated_at: DateTime<Utc>,
    pub recommendations: Vec<Recommendation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Action::Buy).unwrap(), json!("buy"));
        assert_eq!(serde_json::to_value(Action::Sell).unwrap(), json!("sell"));
        assert_eq!(Action::Sell.to_string(), "sell");
    }

    #[test]
    fn missing_weight_reads_as_zero() {
        let w: OptimalWeights = [("bitcoin".to_string(), 1.0)].into_iter().collect();
        assert_eq!(w.get("bitcoin"), 1.0);
        assert_eq!(w.get("ethereum"), 0.0);
    }

    #[test]
    fn plan_omits_message_when_absent() {
        let v = serde_json::to_value(RebalancePlan::default()).unwrap();
        assert_eq!(v, json!({"recommendations": []}));
    }
}
