use crate::domain::candle::{Candle, Interval};
use crate::domain::errors::ExchangeError;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Market-data contract consumed by the core. Implementations must return
/// candles contiguous and sorted ascending by open time.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange name as used in run contexts and event envelopes.
    fn name(&self) -> &str;

    /// Up to `limit` candles for `(symbol, interval)` ending at
    /// `ending_at` (ms, inclusive) or at the latest closed candle when
    /// `None`.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        ending_at: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Render a price with the symbol's tick precision.
    fn format_price(&self, symbol: &str, price: Decimal) -> String;

    /// Render a quantity with the symbol's lot precision.
    fn format_quantity(&self, symbol: &str, qty: Decimal) -> String;
}
