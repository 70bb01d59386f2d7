use crate::domain::portfolio::{Holding, PriceMap};
use crate::domain::recommendation::{Action, OptimalWeights, RebalancePlan, Recommendation};

pub const ZERO_VALUE_MESSAGE: &str = "Total portfolio value is zero; check asset quantities";

/// Diffs current holdings against `targets`, one recommendation per holding, in input order.
pub fn generate(holdings: &[Holding], prices: &PriceMap, targets: &OptimalWeights) -> RebalancePlan {
    let price_of = |symbol: &str| prices.get(symbol).copied().unwrap_or(0.0);

    let total_value: f64 = holdings
        .iter()
        .map(|h| h.quantity * price_of(&h.symbol))
        .sum();

    if total_value <= 0.0 {
        return RebalancePlan {
            recommendations: Vec::new(),
            message: Some(ZERO_VALUE_MESSAGE.to_string()),
        };
    }

    let recommendations = holdings
        .iter()
        .map(|h| {
            let price = price_of(&h.symbol);
            let current_pct = h.quantity * price / total_value;
            let target_pct = targets.get(&h.symbol);
            let diff = target_pct - current_pct;
            let action = if diff > 0.0 { Action::Buy } else { Action::Sell };

            // Unpriced assets get a unit price of 1 so the unit count stays finite.
            let unit_price = if price > 0.0 { price } else { 1.0 };
            let amount_units = diff.abs() * total_value / unit_price;

            Recommendation {
                symbol: h.symbol.clone(),
                current_pct,
                target_pct,
                action,
                amount_units,
                amount_value: amount_units * price,
            }
        })
        .collect();

    RebalancePlan {
        recommendations,
        message: None,
    }
}
