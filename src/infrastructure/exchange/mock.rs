use crate::domain::candle::{Candle, Interval};
use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeAdapter;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Scripted in-memory adapter used by tests and the `mock` exchange name.
///
/// Returns only candles previously loaded with [`set_candles`]; unknown
/// symbols surface as `SymbolUnknown`, and [`fail_next`] scripts transient
/// unavailability for retry coverage.
///
/// [`set_candles`]: MockExchange::set_candles
/// [`fail_next`]: MockExchange::fail_next
#[derive(Default)]
pub struct MockExchange {
    series: Mutex<HashMap<(String, Interval), Vec<Candle>>>,
    fail_remaining: AtomicU32,
    calls: AtomicUsize,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_candles(&self, symbol: &str, interval: Interval, candles: Vec<Candle>) {
        self.series
            .lock()
            .expect("mock series lock poisoned")
            .insert((symbol.to_string(), interval), candles);
    }

    /// Script the next `count` fetches to fail as `Unavailable`.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of `get_candles` calls that reached the adapter.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    fn name(&self) -> &str {
        "mock"
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        ending_at: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(ExchangeError::Unavailable {
                reason: "scripted outage".to_string(),
            });
        }

        let series = self.series.lock().expect("mock series lock poisoned");
        let candles = series
            .get(&(symbol.to_string(), interval))
            .ok_or_else(|| ExchangeError::SymbolUnknown {
                symbol: symbol.to_string(),
            })?;

        let mut selected: Vec<Candle> = match ending_at {
            Some(ts) => candles.iter().filter(|c| c.open_time <= ts).cloned().collect(),
            None => candles.clone(),
        };
        let skip = selected.len().saturating_sub(limit);
        Ok(selected.split_off(skip))
    }

    fn format_price(&self, _symbol: &str, price: Decimal) -> String {
        price.round_dp(2).to_string()
    }

    fn format_quantity(&self, _symbol: &str, qty: Decimal) -> String {
        qty.round_dp(6).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open_time: i64) -> Candle {
        Candle {
            open_time,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume: dec!(1),
        }
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_fatal() {
        let mock = MockExchange::new();
        let err = mock
            .get_candles("NOPE", Interval::OneMin, 10, None)
            .await
            .unwrap_err();
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_ending_at_filters_and_limits() {
        let mock = MockExchange::new();
        mock.set_candles(
            "BTCUSDT",
            Interval::OneMin,
            (0..10).map(|i| candle(i * 60_000)).collect(),
        );
        let got = mock
            .get_candles("BTCUSDT", Interval::OneMin, 3, Some(300_000))
            .await
            .unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got.last().unwrap().open_time, 300_000);
    }

    #[tokio::test]
    async fn test_scripted_failures_recover() {
        let mock = MockExchange::new();
        mock.set_candles("BTCUSDT", Interval::OneMin, vec![candle(0)]);
        mock.fail_next(1);
        assert!(
            mock.get_candles("BTCUSDT", Interval::OneMin, 1, None)
                .await
                .is_err()
        );
        assert!(
            mock.get_candles("BTCUSDT", Interval::OneMin, 1, None)
                .await
                .is_ok()
        );
    }
}
