use crate::application::candle_cache::CandleCache;
use crate::application::clock::Clock;
use crate::domain::candle::{Candle, Interval};
use crate::domain::decision::Decision;
use crate::domain::errors::{EngineError, ExchangeError};
use crate::domain::frame::RunMode;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Window used by the average-price helper.
const AVERAGE_PRICE_CANDLES: usize = 15;

/// The user strategy contract. Implementations may keep internal state
/// behind interior mutability; the runner always calls them from the run's
/// single execution stream.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Cadence at which the runner polls `get_signal`, aligned to interval
    /// boundaries.
    fn tick_interval(&self) -> Interval;

    async fn get_signal(&self, ctx: &StrategyContext) -> anyhow::Result<Decision>;
}

/// Everything a strategy may touch: candles through the cache, the average
/// price helper, and the mode-agnostic clock.
#[derive(Clone)]
pub struct StrategyContext {
    symbol: String,
    clock: Clock,
    cache: Arc<CandleCache>,
}

impl StrategyContext {
    pub fn new(symbol: impl Into<String>, clock: Clock, cache: Arc<CandleCache>) -> Self {
        Self {
            symbol: symbol.into(),
            clock,
            cache,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn mode(&self) -> RunMode {
        self.clock.mode()
    }

    /// Latest `limit` closed candles ending at the current clock.
    pub async fn get_candles(
        &self,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let ending_at = interval.period_start(self.now()).saturating_sub(1);
        self.cache
            .get_candles(&self.symbol, interval, limit, Some(ending_at))
            .await
    }

    /// The `interval` candle containing the current instant, synthesized
    /// from finer cached history when possible, fetched otherwise.
    pub async fn get_candle_at(
        &self,
        interval: Interval,
    ) -> Result<Option<Candle>, ExchangeError> {
        let now = self.now();
        if let Some(candle) = self.cache.synthesize(&self.symbol, interval, now).await {
            return Ok(Some(candle));
        }
        Ok(self
            .cache
            .get_candles(&self.symbol, interval, 1, Some(now))
            .await?
            .pop())
    }

    /// Volume-weighted average over the latest minute candles, falling back
    /// to the last close when no volume traded.
    pub async fn get_average_price(&self) -> Result<Decimal, ExchangeError> {
        let candles = self
            .get_candles(Interval::OneMin, AVERAGE_PRICE_CANDLES)
            .await?;
        if candles.is_empty() {
            return Err(ExchangeError::Unavailable {
                reason: format!("no candles for {}", self.symbol),
            });
        }
        let volume: Decimal = candles.iter().map(|c| c.volume).sum();
        if volume.is_zero() {
            return Ok(candles.last().map(|c| c.close).unwrap_or(Decimal::ZERO));
        }
        let weighted: Decimal = candles.iter().map(|c| c.close * c.volume).sum();
        Ok(weighted / volume)
    }
}

/// Polls the strategy at tick boundaries and converts faults and timeouts
/// into recoverable engine errors.
pub struct StrategyRunner {
    strategy: Arc<dyn Strategy>,
    ctx: StrategyContext,
    timeout: Duration,
    last_tick_boundary: Option<i64>,
}

impl StrategyRunner {
    pub fn new(strategy: Arc<dyn Strategy>, ctx: StrategyContext, timeout: Duration) -> Self {
        Self {
            strategy,
            ctx,
            timeout,
            last_tick_boundary: None,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn context(&self) -> &StrategyContext {
        &self.ctx
    }

    /// The strategy-tick boundary falling inside `[window_start,
    /// window_end)`, if one does and it has not been consumed yet.
    pub fn tick_due(&self, window_start: i64, window_end: i64) -> Option<i64> {
        let interval = self.strategy.tick_interval();
        let boundary = if interval.is_boundary(window_start) {
            window_start
        } else {
            interval.period_start(window_start) + interval.as_millis()
        };
        if boundary >= window_end {
            return None;
        }
        if self.last_tick_boundary == Some(boundary) {
            return None;
        }
        Some(boundary)
    }

    /// Invoke the strategy for the tick at `boundary`. Faults and timeouts
    /// become `StrategyFault`; the engine reports them as `error.info` and
    /// treats the tick as `Wait`.
    pub async fn poll(&mut self, boundary: i64) -> Result<Decision, EngineError> {
        self.last_tick_boundary = Some(boundary);
        let name = self.strategy.name().to_string();
        debug!(
            "StrategyRunner [{}]: tick '{}' at {}",
            self.ctx.symbol(),
            name,
            boundary
        );

        match tokio::time::timeout(self.timeout, self.strategy.get_signal(&self.ctx)).await {
            Ok(Ok(decision)) => Ok(decision),
            Ok(Err(e)) => {
                warn!(
                    "StrategyRunner [{}]: strategy '{}' faulted: {}",
                    self.ctx.symbol(),
                    name,
                    e
                );
                Err(EngineError::StrategyFault {
                    message: format!("strategy '{}' failed: {}", name, e),
                })
            }
            Err(_) => {
                warn!(
                    "StrategyRunner [{}]: strategy '{}' timed out after {:?}",
                    self.ctx.symbol(),
                    name,
                    self.timeout
                );
                Err(EngineError::StrategyFault {
                    message: format!(
                        "strategy '{}' timed out after {}ms",
                        name,
                        self.timeout.as_millis()
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::exchange::mock::MockExchange;

    struct WaitStrategy;

    #[async_trait]
    impl Strategy for WaitStrategy {
        fn name(&self) -> &str {
            "wait"
        }

        fn tick_interval(&self) -> Interval {
            Interval::FiveMin
        }

        async fn get_signal(&self, _ctx: &StrategyContext) -> anyhow::Result<Decision> {
            Ok(Decision::Wait)
        }
    }

    struct SlowStrategy;

    #[async_trait]
    impl Strategy for SlowStrategy {
        fn name(&self) -> &str {
            "slow"
        }

        fn tick_interval(&self) -> Interval {
            Interval::OneMin
        }

        async fn get_signal(&self, _ctx: &StrategyContext) -> anyhow::Result<Decision> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Decision::Wait)
        }
    }

    fn runner(strategy: Arc<dyn Strategy>, timeout_ms: u64) -> StrategyRunner {
        let (clock, _driver) = Clock::backtest(0);
        let cache = Arc::new(CandleCache::new(Arc::new(MockExchange::new()), 1, 4));
        let ctx = StrategyContext::new("BTCUSDT", clock, cache);
        StrategyRunner::new(strategy, ctx, Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_tick_due_on_aligned_boundary() {
        let r = runner(Arc::new(WaitStrategy), 1_000);
        // Five-minute strategy, one-minute candles: only the aligned candle
        // carries a tick.
        assert_eq!(r.tick_due(300_000, 360_000), Some(300_000));
        assert_eq!(r.tick_due(360_000, 420_000), None);
    }

    #[test]
    fn test_tick_due_consumed_once() {
        let mut r = runner(Arc::new(WaitStrategy), 1_000);
        let boundary = r.tick_due(0, 60_000).unwrap();
        r.last_tick_boundary = Some(boundary);
        assert_eq!(r.tick_due(0, 60_000), None);
    }

    #[tokio::test]
    async fn test_poll_returns_decision() {
        let mut r = runner(Arc::new(WaitStrategy), 1_000);
        let decision = r.poll(0).await.unwrap();
        assert!(decision.is_wait());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_strategy_fault() {
        let mut r = runner(Arc::new(SlowStrategy), 50);
        let err = r.poll(0).await.unwrap_err();
        match err {
            EngineError::StrategyFault { message } => {
                assert!(message.contains("timed out"));
            }
            other => panic!("expected strategy fault, got {:?}", other),
        }
    }
}
