mod hold;
mod sma_cross;

pub use hold::HoldStrategy;
pub use sma_cross::SmaCrossStrategy;

use crate::application::strategy_runner::Strategy;
use crate::domain::candle::Interval;
use anyhow::{Result, anyhow};
use rust_decimal_macros::dec;
use std::sync::Arc;

/// Resolve a strategy by its registered name.
pub fn create_strategy(name: &str, tick_interval: Interval) -> Result<Arc<dyn Strategy>> {
    match name {
        "hold" => Ok(Arc::new(HoldStrategy::new(tick_interval))),
        "sma-cross" => Ok(Arc::new(SmaCrossStrategy::new(
            tick_interval,
            5,
            20,
            dec!(2),
            dec!(1),
            240,
        ))),
        _ => Err(anyhow!(
            "Unknown strategy: {}. Available: hold, sma-cross",
            name
        )),
    }
}
