use anyhow::{Result, anyhow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV bar for a fixed interval. Immutable value type; `open_time` is
/// epoch milliseconds of the bar open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Close timestamp (exclusive) given the bar interval.
    pub fn close_time(&self, interval: Interval) -> i64 {
        self.open_time + interval.as_millis()
    }

    pub fn is_green(&self) -> bool {
        self.close >= self.open
    }

    pub fn is_doji(&self) -> bool {
        self.close == self.open
    }
}

/// Candle interval supported by the engine and its adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Interval {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Interval::OneMin => 1,
            Interval::FiveMin => 5,
            Interval::FifteenMin => 15,
            Interval::OneHour => 60,
            Interval::FourHour => 240,
            Interval::OneDay => 1440,
        }
    }

    pub fn as_millis(&self) -> i64 {
        self.to_minutes() * 60_000
    }

    /// All intervals in ascending order.
    pub fn all() -> Vec<Interval> {
        vec![
            Interval::OneMin,
            Interval::FiveMin,
            Interval::FifteenMin,
            Interval::OneHour,
            Interval::FourHour,
            Interval::OneDay,
        ]
    }

    /// Intervals strictly finer than this one, coarsest first.
    pub fn finer(&self) -> Vec<Interval> {
        Interval::all()
            .into_iter()
            .filter(|i| i.as_millis() < self.as_millis())
            .rev()
            .collect()
    }

    /// Start timestamp (ms) of the period containing `timestamp_ms`.
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.as_millis())
    }

    /// Whether `timestamp_ms` falls exactly on a period boundary.
    pub fn is_boundary(&self, timestamp_ms: i64) -> bool {
        timestamp_ms.rem_euclid(self.as_millis()) == 0
    }

    /// Binance kline interval string.
    pub fn to_binance_string(&self) -> &'static str {
        match self {
            Interval::OneMin => "1m",
            Interval::FiveMin => "5m",
            Interval::FifteenMin => "15m",
            Interval::OneHour => "1h",
            Interval::FourHour => "4h",
            Interval::OneDay => "1d",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_binance_string())
    }
}

impl FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" => Ok(Interval::OneMin),
            "5m" => Ok(Interval::FiveMin),
            "15m" => Ok(Interval::FifteenMin),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHour),
            "1d" => Ok(Interval::OneDay),
            _ => Err(anyhow!(
                "Invalid interval: {}. Must be one of 1m, 5m, 15m, 1h, 4h, 1d",
                s
            )),
        }
    }
}
