use crate::application::strategy_runner::{Strategy, StrategyContext};
use crate::domain::candle::Interval;
use crate::domain::decision::{Decision, OpenRequest};
use crate::domain::signal::Position;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use std::sync::Mutex;
use ta::Next;
use ta::indicators::SimpleMovingAverage;

/// SMA crossover entry strategy.
///
/// Opens a long when the fast SMA crosses above the slow SMA and a short on
/// the opposite cross, with TP/SL set as percentage offsets from the entry.
/// Crossing state lives behind a mutex so the strategy stays `Sync` while
/// the runner drives it from the single run stream.
pub struct SmaCrossStrategy {
    tick_interval: Interval,
    fast_period: usize,
    slow_period: usize,
    take_profit_percent: Decimal,
    stop_loss_percent: Decimal,
    minute_estimated_time: i64,
    state: Mutex<CrossState>,
}

#[derive(Default)]
struct CrossState {
    last_fast_above: Option<bool>,
}

impl SmaCrossStrategy {
    pub fn new(
        tick_interval: Interval,
        fast_period: usize,
        slow_period: usize,
        take_profit_percent: Decimal,
        stop_loss_percent: Decimal,
        minute_estimated_time: i64,
    ) -> Self {
        Self {
            tick_interval,
            fast_period,
            slow_period,
            take_profit_percent,
            stop_loss_percent,
            minute_estimated_time,
            state: Mutex::new(CrossState::default()),
        }
    }

    fn open_request(&self, position: Position, price: Decimal) -> OpenRequest {
        let tp_shift = price * self.take_profit_percent / Decimal::from(100);
        let sl_shift = price * self.stop_loss_percent / Decimal::from(100);
        let (tp, sl) = match position {
            Position::Long => (price + tp_shift, price - sl_shift),
            Position::Short => (price - tp_shift, price + sl_shift),
        };
        OpenRequest {
            position,
            price_open: price,
            price_take_profit: tp,
            price_stop_loss: sl,
            minute_estimated_time: self.minute_estimated_time,
            note: Some(format!(
                "sma cross {}/{}",
                self.fast_period, self.slow_period
            )),
        }
    }
}

#[async_trait]
impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma-cross"
    }

    fn tick_interval(&self) -> Interval {
        self.tick_interval
    }

    async fn get_signal(&self, ctx: &StrategyContext) -> anyhow::Result<Decision> {
        let candles = ctx
            .get_candles(self.tick_interval, self.slow_period + 1)
            .await?;
        if candles.len() < self.slow_period {
            return Ok(Decision::Wait);
        }

        let mut fast = SimpleMovingAverage::new(self.fast_period)?;
        let mut slow = SimpleMovingAverage::new(self.slow_period)?;
        let mut fast_value = 0.0;
        let mut slow_value = 0.0;
        for candle in &candles {
            let close = candle.close.to_f64().unwrap_or_default();
            fast_value = fast.next(close);
            slow_value = slow.next(close);
        }

        let fast_above = fast_value > slow_value;
        let crossed = {
            let mut state = self.state.lock().expect("cross state poisoned");
            let crossed = state.last_fast_above.is_some_and(|was| was != fast_above);
            state.last_fast_above = Some(fast_above);
            crossed
        };
        if !crossed {
            return Ok(Decision::Wait);
        }

        let price = candles
            .last()
            .map(|c| c.close)
            .unwrap_or_else(|| Decimal::from_f64(slow_value).unwrap_or_default());
        let position = if fast_above {
            Position::Long
        } else {
            Position::Short
        };
        Ok(Decision::Open(self.open_request(position, price)))
    }
}
