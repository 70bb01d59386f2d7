use rebalancer_core::domain::portfolio::Holding;

/// Parses `SYMBOL=QTY` or `SYMBOL=QTY:TARGET`, e.g. `bitcoin=0.5:0.6`.
pub fn parse_holding(raw: &str) -> Result<Holding, String> {
    let (symbol, rest) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SYMBOL=QTY[:TARGET], got `{raw}`"))?;

    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(format!("missing symbol in `{raw}`"));
    }

    let (quantity, target) = match rest.split_once(':') {
        Some((q, t)) => (q, Some(t)),
        None => (rest, None),
    };

    let quantity: f64 = quantity
        .trim()
        .parse()
        .map_err(|e| format!("invalid quantity in `{raw}`: {e}"))?;

    let mut holding = Holding::new(symbol, quantity);
    if let Some(t) = target {
        let target: f64 = t
            .trim()
            .parse()
            .map_err(|e| format!("invalid target in `{raw}`: {e}"))?;
        holding = holding.with_target_pct(target);
    }
    Ok(holding)
}
