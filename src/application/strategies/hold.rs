use crate::application::strategy_runner::{Strategy, StrategyContext};
use crate::domain::candle::Interval;
use crate::domain::decision::Decision;
use async_trait::async_trait;

/// Strategy that never trades. Useful for dry runs against a new exchange
/// or frame: the engine, cache and event stream all exercise normally.
#[derive(Debug, Clone)]
pub struct HoldStrategy {
    tick_interval: Interval,
}

impl HoldStrategy {
    pub fn new(tick_interval: Interval) -> Self {
        Self { tick_interval }
    }
}

#[async_trait]
impl Strategy for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }

    fn tick_interval(&self) -> Interval {
        self.tick_interval
    }

    async fn get_signal(&self, _ctx: &StrategyContext) -> anyhow::Result<Decision> {
        Ok(Decision::Wait)
    }
}
