use crate::application::candle_cache::CandleCache;
use crate::application::clock::Clock;
use crate::application::engine::driver::{BacktestDriver, LiveDriver};
use crate::application::engine::{EngineSettings, RunSummary, SignalEngine};
use crate::application::risk_gate::RiskGate;
use crate::application::strategy_runner::{Strategy, StrategyContext, StrategyRunner};
use crate::config::EngineConfig;
use crate::domain::errors::EngineError;
use crate::domain::frame::{FrameSchema, RunContext, RunMode};
use crate::domain::ports::ExchangeAdapter;
use crate::domain::risk::RiskProfile;
use crate::infrastructure::event_bus::{EventBus, EventStream};
use crate::infrastructure::persistence::RunLog;
use anyhow::{Context, Result, anyhow};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Resolve a risk profile by its registered name.
pub fn create_risk_profile(name: &str) -> Result<RiskProfile> {
    match name {
        "none" => Ok(RiskProfile::none()),
        "min-rr" => Ok(RiskProfile::min_risk_reward(dec!(2))),
        "max-active" => Ok(RiskProfile::max_active(3)),
        _ => Err(anyhow!(
            "Unknown risk profile: {}. Available: none, min-rr, max-active",
            name
        )),
    }
}

/// Shared endpoints of a running engine: the event stream and the stop
/// switch. Cheap to clone.
#[derive(Clone)]
pub struct RunHandle {
    stop_tx: watch::Sender<bool>,
    bus: EventBus,
}

impl RunHandle {
    /// Ask the run to drain its current commit batch, emit `done`, and
    /// exit. No partial state is persisted beyond what already landed.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

enum RunDriver {
    Backtest(BacktestDriver),
    Live(LiveDriver),
}

/// Composition root for one (symbol, strategy) run.
///
/// Builds the clock, cache, gate, engine and driver for the requested mode
/// and owns them until [`execute`] consumes the run. All per-run state
/// lives here; nothing is registered globally.
///
/// [`execute`]: Run::execute
pub struct Run {
    ctx: RunContext,
    driver: RunDriver,
    handle: RunHandle,
}

impl Run {
    pub fn build(
        config: &EngineConfig,
        ctx: RunContext,
        adapter: Arc<dyn ExchangeAdapter>,
        strategy: Arc<dyn Strategy>,
        profile: RiskProfile,
        frame: Option<FrameSchema>,
    ) -> Result<Self> {
        info!(
            "Run [{}]: building {} run (strategy={}, exchange={}, risk={})",
            ctx.symbol, ctx.mode, ctx.strategy_name, ctx.exchange_name, profile.name
        );

        let (clock, clock_driver) = match ctx.mode {
            RunMode::Backtest => {
                let frame = frame
                    .as_ref()
                    .ok_or_else(|| anyhow!("backtest mode requires a frame"))?;
                let (clock, driver) = Clock::backtest(frame.window().start_time);
                (clock, Some(driver))
            }
            RunMode::Live => (Clock::live(), None),
        };

        let cache = Arc::new(CandleCache::new(
            Arc::clone(&adapter),
            config.max_retries,
            config.cache_max_pages,
        ));

        let run_id = format!(
            "{}-{}-{}",
            ctx.symbol.to_lowercase(),
            ctx.strategy_name,
            uuid::Uuid::new_v4()
        );
        let log = RunLog::create(&config.runs_dir, &run_id)
            .with_context(|| format!("cannot create run log under {}", config.runs_dir.display()))?;

        let settings = EngineSettings {
            slippage_percent: config.percent_slippage,
            fee_percent: config.percent_fee,
            schedule_await_minutes: config.schedule_await_minutes,
            partial_levels: config.partial_levels.clone(),
            breakeven_trigger_percent: config.breakeven_trigger_percent,
            grace_minutes: config.signal_grace_minutes,
        };

        let bus = EventBus::new();
        let engine = SignalEngine::new(
            ctx.clone(),
            settings,
            clock.clone(),
            clock_driver,
            RiskGate::new(profile),
            bus.clone(),
            Some(log),
        );

        let runner = StrategyRunner::new(
            strategy,
            StrategyContext::new(ctx.symbol.clone(), clock, Arc::clone(&cache)),
            Duration::from_millis(config.strategy_timeout_ms),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let driver = match ctx.mode {
            RunMode::Backtest => {
                let frame = frame.expect("frame checked above");
                RunDriver::Backtest(BacktestDriver::new(
                    engine,
                    runner,
                    cache,
                    frame.window(),
                    stop_rx,
                ))
            }
            RunMode::Live => {
                let interval = frame
                    .map(|f| f.interval)
                    .unwrap_or(config.tick_interval);
                RunDriver::Live(LiveDriver::new(engine, runner, cache, interval, stop_rx))
            }
        };

        Ok(Self {
            ctx,
            driver,
            handle: RunHandle { stop_tx, bus },
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    /// Drive the run to completion on the caller's task.
    pub async fn execute(self) -> Result<RunSummary, EngineError> {
        match self.driver {
            RunDriver::Backtest(driver) => driver.run().await,
            RunDriver::Live(driver) => driver.run().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_profile_registry() {
        assert!(create_risk_profile("none").is_ok());
        assert!(create_risk_profile("min-rr").is_ok());
        assert!(create_risk_profile("aggressive").is_err());
    }
}
