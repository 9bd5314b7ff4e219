use crate::domain::frame::RunMode;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// The single source of "now" for all core code.
///
/// In live mode `now()` returns wall-clock time; in backtest mode it
/// returns the timestamp currently being replayed. Strategy and lifecycle
/// code read time only through this handle and stay mode-agnostic. Only
/// the SignalEngine holds the advancing [`ClockDriver`].
#[derive(Clone)]
pub struct Clock {
    mode: RunMode,
    replayed: Arc<AtomicI64>,
}

impl Clock {
    pub fn live() -> Self {
        Self {
            mode: RunMode::Live,
            replayed: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Backtest clock starting at `start_time`; the returned driver is the
    /// only way to advance it.
    pub fn backtest(start_time: i64) -> (Self, ClockDriver) {
        let cell = Arc::new(AtomicI64::new(start_time));
        let clock = Self {
            mode: RunMode::Backtest,
            replayed: Arc::clone(&cell),
        };
        (clock, ClockDriver { cell })
    }

    /// Current time in epoch milliseconds.
    pub fn now(&self) -> i64 {
        match self.mode {
            RunMode::Live => chrono::Utc::now().timestamp_millis(),
            RunMode::Backtest => self.replayed.load(Ordering::SeqCst),
        }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }
}

/// Write half of a backtest clock; owned by the SignalEngine, advanced
/// exactly once per replay step.
pub struct ClockDriver {
    cell: Arc<AtomicI64>,
}

impl ClockDriver {
    pub fn advance_to(&self, timestamp_ms: i64) {
        self.cell.store(timestamp_ms, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backtest_clock_follows_driver() {
        let (clock, driver) = Clock::backtest(1_000);
        assert_eq!(clock.now(), 1_000);
        driver.advance_to(2_500);
        assert_eq!(clock.now(), 2_500);
        assert_eq!(clock.mode(), RunMode::Backtest);
    }

    #[test]
    fn test_live_clock_tracks_wall_time() {
        let clock = Clock::live();
        let before = chrono::Utc::now().timestamp_millis();
        let now = clock.now();
        let after = chrono::Utc::now().timestamp_millis();
        assert!(now >= before && now <= after);
        assert_eq!(clock.mode(), RunMode::Live);
    }
}
