use crate::domain::candle::Interval;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Execution mode of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Live,
    Backtest,
}

impl RunMode {
    pub fn is_backtest(&self) -> bool {
        matches!(self, RunMode::Backtest)
    }
}

impl FromStr for RunMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "live" => Ok(RunMode::Live),
            "backtest" => Ok(RunMode::Backtest),
            _ => Err(anyhow!(
                "Invalid mode: {}. Must be 'live' or 'backtest'",
                s
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Live => write!(f, "live"),
            RunMode::Backtest => write!(f, "backtest"),
        }
    }
}

/// The backtest replay window and its step cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameWindow {
    pub start_time: i64,
    pub end_time: i64,
    pub interval: Interval,
}

impl FrameWindow {
    /// Number of whole candles inside the window.
    pub fn candle_count(&self) -> usize {
        if self.end_time <= self.start_time {
            return 0;
        }
        ((self.end_time - self.start_time) / self.interval.as_millis()) as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            return Err(anyhow!(
                "Frame window end ({}) must be after start ({})",
                self.end_time,
                self.start_time
            ));
        }
        Ok(())
    }
}

/// A named backtest frame as declared in `frames.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSchema {
    pub name: String,
    pub interval: Interval,
    pub start_time: i64,
    pub end_time: i64,
}

impl FrameSchema {
    pub fn window(&self) -> FrameWindow {
        FrameWindow {
            start_time: self.interval.period_start(self.start_time),
            end_time: self.end_time,
            interval: self.interval,
        }
    }
}

/// Identity of one engine run. Each (strategy, symbol) pair is an
/// independent run with its own engine, queue and clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub mode: RunMode,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: Option<String>,
}

impl RunContext {
    pub fn backtest(&self) -> bool {
        self.mode.is_backtest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_parsing() {
        assert_eq!("backtest".parse::<RunMode>().unwrap(), RunMode::Backtest);
        assert_eq!("LIVE".parse::<RunMode>().unwrap(), RunMode::Live);
        assert!("paper".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_candle_count() {
        let w = FrameWindow {
            start_time: 0,
            end_time: 600_000,
            interval: Interval::OneMin,
        };
        assert_eq!(w.candle_count(), 10);
        assert!(w.validate().is_ok());

        let empty = FrameWindow {
            start_time: 600_000,
            end_time: 0,
            interval: Interval::OneMin,
        };
        assert_eq!(empty.candle_count(), 0);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_schema_window_aligns_start() {
        let schema = FrameSchema {
            name: "jan".to_string(),
            interval: Interval::FiveMin,
            start_time: 723_000,
            end_time: 1_200_000,
        };
        assert_eq!(schema.window().start_time, 600_000);
    }
}
