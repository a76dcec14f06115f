// Stop-loss / take-profit calculator and signal classifier

use crate::config::RiskConfig;
use crate::core::position::Position;
use crate::types::SignalKind;

/// Compute the stop price for a position.
///
/// Before the first take-profit the stop is fixed relative to cost. After
/// it, the stop trails the high-water mark: tiers are matched from the
/// highest threshold down and the first tier whose threshold the peak gain
/// has reached wins.
pub fn stop_loss_price(
    cost_price: f64,
    highest_price: f64,
    profit_triggered: bool,
    risk: &RiskConfig,
) -> f64 {
    if cost_price <= 0.0 {
        return 0.0;
    }
    let highest = if highest_price > 0.0 { highest_price } else { cost_price };

    if !profit_triggered {
        return cost_price * (1.0 + risk.stop_loss_ratio);
    }

    let highest_gain = (highest - cost_price) / cost_price;

    let mut tiers: Vec<_> = risk.dynamic_tiers.clone();
    tiers.sort_by(|a, b| b.threshold.partial_cmp(&a.threshold).unwrap());

    let mut coefficient = risk.fallback_coefficient;
    for tier in &tiers {
        if highest_gain >= tier.threshold {
            coefficient = tier.coefficient;
            break;
        }
    }

    highest * coefficient
}

/// Classify the current tick against the risk rules.
///
/// Priority order: fixed stop, then first take-profit, then trailing stop.
/// Pure over its inputs, so repeated calls on an unchanged position and
/// price return the same answer.
pub fn classify(position: &Position, current_price: f64, risk: &RiskConfig) -> Option<SignalKind> {
    if position.cost_price <= 0.0 || current_price <= 0.0 {
        return None;
    }

    if !position.profit_triggered {
        let fixed_stop = position.cost_price * (1.0 + risk.stop_loss_ratio);
        if current_price <= fixed_stop {
            return Some(SignalKind::StopLoss);
        }

        let profit_ratio = (current_price - position.cost_price) / position.cost_price;
        if profit_ratio >= risk.initial_take_profit_ratio {
            return Some(SignalKind::TakeProfitHalf);
        }

        return None;
    }

    let trailing_stop = stop_loss_price(
        position.cost_price,
        position.highest_price,
        true,
        risk,
    );
    if current_price <= trailing_stop {
        return Some(SignalKind::TakeProfitFull);
    }

    None
}

/// Threshold price that backs a classification, for signal reporting.
pub fn threshold_price(position: &Position, kind: SignalKind, risk: &RiskConfig) -> f64 {
    match kind {
        SignalKind::StopLoss => position.cost_price * (1.0 + risk.stop_loss_ratio),
        SignalKind::TakeProfitHalf => {
            position.cost_price * (1.0 + risk.initial_take_profit_ratio)
        }
        SignalKind::TakeProfitFull => stop_loss_price(
            position.cost_price,
            position.highest_price,
            true,
            risk,
        ),
    }
}
