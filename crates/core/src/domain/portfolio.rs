use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current price per symbol, in the requested quote currency.
pub type PriceMap = BTreeMap<String, f64>;

/// Scale applied to `risk_tolerance` to obtain the optimizer's return-reward coefficient.
pub const RETURN_REWARD_SCALE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub symbol: String,
    pub quantity: f64,
    /// Stored allocation target. Only read by the stored-target mode.
    #[serde(default)]
    pub target_pct: Option<f64>,
}

impl Holding {
    pub fn new(symbol: impl Into<String>, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            target_pct: None,
        }
    }

    pub fn with_target_pct(mut self, target_pct: f64) -> Self {
        self.target_pct = Some(target_pct);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub risk_tolerance: f64,
}

impl Default for RiskProfile {
    fn default() -> Self {
        Self {
            risk_tolerance: 0.5,
        }
    }
}

impl RiskProfile {
    pub fn new(risk_tolerance: f64) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (0.0..=1.0).contains(&risk_tolerance),
            "risk_tolerance must be between 0 and 1 (got {risk_tolerance})"
        );
        Ok(Self { risk_tolerance })
    }

    /// `gamma` in `w'Σw - gamma·μ'w`.
    pub fn return_reward(&self) -> f64 {
        self.risk_tolerance * RETURN_REWARD_SCALE
    }
}
