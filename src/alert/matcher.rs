//! Price threshold matching

use tracing::warn;

use super::AlertCondition;

/// Decide whether `current_price` satisfies an alert rule.
///
/// Both boundaries are inclusive. An unrecognized condition never matches.
pub fn evaluate(condition: &AlertCondition, target_price: f64, current_price: f64) -> bool {
    match condition {
        AlertCondition::Above => current_price >= target_price,
        AlertCondition::Below => current_price <= target_price,
        AlertCondition::Unrecognized(raw) => {
            warn!(condition = %raw, target_price, "skipping alert with unrecognized condition");
            false
        }
    }
}
