pub mod binance;
pub mod mock;

pub use binance::BinanceExchange;
pub use mock::MockExchange;

use crate::domain::ports::ExchangeAdapter;
use anyhow::{Result, anyhow};
use std::sync::Arc;

/// Resolve an exchange adapter by its registered name.
pub fn create_adapter(name: &str, max_retries: u32) -> Result<Arc<dyn ExchangeAdapter>> {
    match name {
        "binance" => Ok(Arc::new(
            BinanceExchange::builder().max_retries(max_retries).build(),
        )),
        "mock" => Ok(Arc::new(MockExchange::new())),
        _ => Err(anyhow!(
            "Unknown exchange: {}. Available: binance, mock",
            name
        )),
    }
}
