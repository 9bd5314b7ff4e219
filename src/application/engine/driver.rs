use crate::application::candle_cache::CandleCache;
use crate::application::engine::{RunSummary, SignalEngine};
use crate::application::strategy_runner::StrategyRunner;
use crate::domain::candle::{Candle, Interval};
use crate::domain::errors::EngineError;
use crate::domain::frame::FrameWindow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Delay after an interval boundary before fetching the closed candle, so
/// the exchange has published it.
const LIVE_FETCH_DELAY_MS: i64 = 1_500;

/// Replays a frame window candle by candle: clock to open time, expiries,
/// strategy tick if a boundary falls inside the candle, intra-candle
/// replay, then a progress event.
pub struct BacktestDriver {
    engine: SignalEngine,
    runner: StrategyRunner,
    cache: Arc<CandleCache>,
    frame: FrameWindow,
    stop_rx: watch::Receiver<bool>,
}

impl BacktestDriver {
    pub fn new(
        engine: SignalEngine,
        runner: StrategyRunner,
        cache: Arc<CandleCache>,
        frame: FrameWindow,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            runner,
            cache,
            frame,
            stop_rx,
        }
    }

    pub async fn run(mut self) -> Result<RunSummary, EngineError> {
        let symbol = self.engine.symbol().to_string();
        let candles = match self.cache.frame_candles(&symbol, &self.frame).await {
            Ok(candles) => candles,
            Err(e) => return Self::abort(self.engine, e.into()),
        };
        let total = candles.len();
        info!(
            "BacktestDriver [{}]: replaying {} candle(s) at {}",
            symbol, total, self.frame.interval
        );

        for (index, candle) in candles.iter().enumerate() {
            if *self.stop_rx.borrow() {
                info!("BacktestDriver [{}]: stop requested, draining", symbol);
                break;
            }
            if let Err(e) = step(&mut self.engine, &mut self.runner, candle, self.frame.interval).await
            {
                return Self::abort(self.engine, e);
            }
            self.engine.emit_progress(index + 1, total)?;
        }

        self.engine.emit_done(false)?;
        Ok(self.engine.into_summary())
    }

    fn abort(mut engine: SignalEngine, error: EngineError) -> Result<RunSummary, EngineError> {
        warn!(
            "BacktestDriver [{}]: aborting run: {}",
            engine.symbol(),
            error
        );
        let _ = engine.emit_error_critical(error.to_string());
        let _ = engine.emit_done(true);
        Err(error)
    }
}

/// Polls the exchange for each newly closed candle and feeds it through the
/// same per-candle flow as the backtest driver, so both modes share one
/// semantics.
pub struct LiveDriver {
    engine: SignalEngine,
    runner: StrategyRunner,
    cache: Arc<CandleCache>,
    interval: Interval,
    stop_rx: watch::Receiver<bool>,
}

impl LiveDriver {
    pub fn new(
        engine: SignalEngine,
        runner: StrategyRunner,
        cache: Arc<CandleCache>,
        interval: Interval,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            runner,
            cache,
            interval,
            stop_rx,
        }
    }

    pub async fn run(mut self) -> Result<RunSummary, EngineError> {
        let symbol = self.engine.symbol().to_string();
        info!(
            "LiveDriver [{}]: polling closed {} candles",
            symbol, self.interval
        );
        let mut last_processed: Option<i64> = None;

        loop {
            if *self.stop_rx.borrow() {
                info!("LiveDriver [{}]: stop requested, draining", symbol);
                break;
            }

            let now = chrono::Utc::now().timestamp_millis();
            let current_open = self.interval.period_start(now);
            let next_close = current_open + self.interval.as_millis() + LIVE_FETCH_DELAY_MS;
            let wait = Duration::from_millis(next_close.saturating_sub(now).max(0) as u64);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.stop_rx.changed() => continue,
            }

            let closed_open = current_open;
            if last_processed == Some(closed_open) {
                continue;
            }

            let candles = match self
                .cache
                .get_candles(&symbol, self.interval, 2, None)
                .await
            {
                Ok(candles) => candles,
                Err(e) => return Self::abort(self.engine, e.into()),
            };
            let Some(candle) = candles.into_iter().find(|c| c.open_time == closed_open) else {
                warn!(
                    "LiveDriver [{}]: closed candle {} not yet published",
                    symbol, closed_open
                );
                continue;
            };

            info!(
                "LiveDriver [{}]: candle {} closed at {}",
                symbol,
                candle.open_time,
                self.cache.adapter().format_price(&symbol, candle.close)
            );
            if let Err(e) = step(&mut self.engine, &mut self.runner, &candle, self.interval).await {
                return Self::abort(self.engine, e);
            }
            last_processed = Some(closed_open);
        }

        self.engine.emit_done(false)?;
        Ok(self.engine.into_summary())
    }

    fn abort(mut engine: SignalEngine, error: EngineError) -> Result<RunSummary, EngineError> {
        warn!("LiveDriver [{}]: aborting run: {}", engine.symbol(), error);
        let _ = engine.emit_error_critical(error.to_string());
        let _ = engine.emit_done(true);
        Err(error)
    }
}

/// One candle through the engine, shared by both drivers: expiries at the
/// open, a strategy tick when a boundary falls inside the candle, then the
/// intra-candle replay. Strategy faults skip the tick and the run goes on.
async fn step(
    engine: &mut SignalEngine,
    runner: &mut StrategyRunner,
    candle: &Candle,
    interval: Interval,
) -> Result<(), EngineError> {
    engine.begin_candle(candle)?;

    let close_time = candle.close_time(interval);
    if let Some(boundary) = runner.tick_due(candle.open_time, close_time) {
        match runner.poll(boundary).await {
            Ok(decision) => engine.submit_decision(decision, candle.open)?,
            Err(EngineError::StrategyFault { message }) => {
                engine.emit_error_info(message)?;
            }
            Err(e) => return Err(e),
        }
    }

    engine.replay_candle(candle, interval)
}
