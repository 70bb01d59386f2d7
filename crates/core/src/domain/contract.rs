use crate::domain::portfolio::{Holding, RiskProfile};
use crate::error::RebalanceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const MIN_LOOKBACK_DAYS: u32 = 5;
pub const MAX_LOOKBACK_DAYS: u32 = 365;
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// Where target weights come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// Mean-variance weights computed from recent price history.
    #[default]
    Optimized,
    /// Each holding's stored `target_pct`.
    Stored,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::Optimized => f.write_str("optimized"),
            TargetMode::Stored => f.write_str("stored"),
        }
    }
}

impl FromStr for TargetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimized" => Ok(TargetMode::Optimized),
            "stored" => Ok(TargetMode::Stored),
            other => Err(format!("unknown target mode: {other} (expected optimized|stored)")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceRequest {
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub risk: RiskProfile,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub mode: TargetMode,
    #[serde(default)]
    pub target_return: Option<f64>,
}

fn default_lookback_days() -> u32 {
    DEFAULT_LOOKBACK_DAYS
}

impl RebalanceRequest {
    pub fn new(holdings: Vec<Holding>, risk: RiskProfile, lookback_days: u32) -> Self {
        Self {
            holdings,
            risk,
            lookback_days,
            mode: TargetMode::default(),
            target_return: None,
        }
    }

    pub fn with_mode(mut self, mode: TargetMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_target_return(mut self, target_return: Option<f64>) -> Self {
        self.target_return = target_return;
        self
    }

    /// Checks request bounds and lowercases symbols (feed identifiers are lowercase).
    pub fn validate_and_normalize(mut self) -> Result<Self, RebalanceError> {
        ensure(!self.holdings.is_empty(), || "portfolio has no assets".to_string())?;

        let tolerance = self.risk.risk_tolerance;
        ensure((0.0..=1.0).contains(&tolerance), || {
            format!("risk_tolerance must be between 0 and 1 (got {tolerance})")
        })?;

        let days = self.lookback_days;
        ensure(
            (MIN_LOOKBACK_DAYS..=MAX_LOOKBACK_DAYS).contains(&days),
            || format!("lookback_days must be {MIN_LOOKBACK_DAYS}..={MAX_LOOKBACK_DAYS} (got {days})"),
        )?;

        if let Some(target) = self.target_return {
            ensure(target.is_finite(), || {
                format!("target_return must be finite (got {target})")
            })?;
        }

        let mut seen = BTreeSet::<String>::new();
        for holding in &mut self.holdings {
            let symbol = holding.symbol.trim().to_ascii_lowercase();
            ensure(!symbol.is_empty(), || "symbol must be non-empty".to_string())?;
            ensure(seen.insert(symbol.clone()), || format!("duplicate symbol: {symbol}"))?;

            let quantity = holding.quantity;
            ensure(quantity.is_finite() && quantity >= 0.0, || {
                format!("quantity for {symbol} must be >= 0 (got {quantity})")
            })?;

            if let Some(target) = holding.target_pct {
                ensure((0.0..=1.0).contains(&target), || {
                    format!("target_pct for {symbol} must be between 0 and 1 (got {target})")
                })?;
            }

            holding.symbol = symbol;
        }

        Ok(self)
    }

    pub fn symbols(&self) -> Vec<String> {
        self.holdings.iter().map(|h| h.symbol.clone()).collect()
    }
}

fn ensure(cond: bool, msg: impl FnOnce() -> String) -> Result<(), RebalanceError> {
    if cond {
        Ok(())
    } else {
        Err(RebalanceError::InvalidRequest(msg()))
    }
}
