//! Adaptive fuel-rate controller.
//!
//! Utilisation over a sliding window of recent blocks moves the per-unit
//! fuel price: below 75% of the run-step target the rate deflates by 10%,
//! above 85% it inflates by 10%, inside the deadband it holds. The float
//! multiply followed by integer truncation is consensus-critical and must
//! not be rewritten in rational arithmetic.

use crate::chain::{BlockIndex, ChainView};
use crate::params::ChainParams;
use tracing::debug;

/// Fuel rate for the block built on `tip`.
pub fn fuel_rate_for_next(
    chain: &dyn ChainView,
    tip: Option<&BlockIndex>,
    params: &ChainParams,
    burn_window: u64,
) -> u64 {
    let Some(tip) = tip else {
        return params.init_fuel_rate;
    };
    let window = burn_window.max(1);
    if window * 2 >= tip.height.saturating_sub(1) {
        // Not enough history to measure utilisation.
        return params.init_fuel_rate;
    }

    let mut total_step: u64 = 0;
    let mut cursor = tip.clone();
    for _ in 0..window {
        if cursor.fuel_rate > 0 {
            total_step += cursor.fuel / cursor.fuel_rate * 100;
        }
        match chain.index_by_hash(&cursor.prev_hash) {
            Some(prev) => cursor = prev,
            None => break,
        }
    }

    let avg_step = total_step / window;
    let target = params.max_block_run_step;
    let mut new_rate = if (avg_step as f64) < target as f64 * 0.75 {
        (tip.fuel_rate as f64 * 0.9) as u64
    } else if (avg_step as f64) > target as f64 * 0.85 {
        (tip.fuel_rate as f64 * 1.1) as u64
    } else {
        tip.fuel_rate
    };
    if new_rate < params.min_fuel_rate {
        new_rate = params.min_fuel_rate;
    }

    debug!(
        height = tip.height,
        prev_rate = tip.fuel_rate,
        new_rate,
        avg_step,
        "fuel rate for next block"
    );
    new_rate
}
