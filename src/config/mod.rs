//! Configuration module for CandleCast.
//!
//! Engine knobs load from `CC_*` environment variables with defaults and
//! validation at startup; named backtest frames load from a `frames.toml`
//! file.

use crate::domain::candle::Interval;
use crate::domain::frame::FrameSchema;
use crate::domain::signal::PartialLevel;
use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Typed engine configuration. All recognized options, their defaults and
/// their validation live here; nothing else reads the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// `CC_PERCENT_SLIPPAGE`: applied symmetrically on entry and exit.
    pub percent_slippage: Decimal,
    /// `CC_PERCENT_FEE`: doubled across the round trip.
    pub percent_fee: Decimal,
    /// `CC_SCHEDULE_AWAIT_MINUTES`: scheduled signals cancel after this.
    pub schedule_await_minutes: i64,
    /// `CC_MAX_RETRIES`: adapter retry cap.
    pub max_retries: u32,
    /// `CC_PARTIAL_LEVELS`: armed milestone levels, e.g. "10,20,50".
    pub partial_levels: BTreeSet<PartialLevel>,
    /// `CC_BREAKEVEN_TRIGGER_PERCENT`: unset disables breakeven.
    pub breakeven_trigger_percent: Option<Decimal>,
    /// `CC_STRATEGY_TIMEOUT_MS`: wall-clock cap per strategy invocation.
    pub strategy_timeout_ms: u64,
    /// `CC_SIGNAL_GRACE_MINUTES`: terminal signals stay visible this long.
    pub signal_grace_minutes: i64,
    /// `CC_CACHE_MAX_PAGES`: candle cache soft cap.
    pub cache_max_pages: usize,
    /// `CC_RUNS_DIR`: per-run NDJSON persistence root.
    pub runs_dir: PathBuf,
    /// `CC_TICK_INTERVAL`: strategy tick cadence.
    pub tick_interval: Interval,
    /// `CC_RISK_NAME`: risk profile applied to every proposal.
    pub risk_name: String,
    /// `CC_FRAMES_PATH`: frames.toml location.
    pub frames_path: PathBuf,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            percent_slippage: parse_env("CC_PERCENT_SLIPPAGE", Decimal::new(1, 1))?,
            percent_fee: parse_env("CC_PERCENT_FEE", Decimal::new(1, 1))?,
            schedule_await_minutes: parse_env("CC_SCHEDULE_AWAIT_MINUTES", 30)?,
            max_retries: parse_env("CC_MAX_RETRIES", 3)?,
            partial_levels: parse_partial_levels(env::var("CC_PARTIAL_LEVELS").ok().as_deref())?,
            breakeven_trigger_percent: parse_optional_env("CC_BREAKEVEN_TRIGGER_PERCENT")?,
            strategy_timeout_ms: parse_env("CC_STRATEGY_TIMEOUT_MS", 5_000)?,
            signal_grace_minutes: parse_env("CC_SIGNAL_GRACE_MINUTES", 5)?,
            cache_max_pages: parse_env("CC_CACHE_MAX_PAGES", 64)?,
            runs_dir: PathBuf::from(
                env::var("CC_RUNS_DIR").unwrap_or_else(|_| "runs".to_string()),
            ),
            tick_interval: parse_env("CC_TICK_INTERVAL", Interval::OneMin)?,
            risk_name: env::var("CC_RISK_NAME").unwrap_or_else(|_| "none".to_string()),
            frames_path: PathBuf::from(
                env::var("CC_FRAMES_PATH").unwrap_or_else(|_| "frames.toml".to_string()),
            ),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.percent_slippage < Decimal::ZERO {
            return Err(anyhow!("CC_PERCENT_SLIPPAGE must not be negative"));
        }
        if self.percent_fee < Decimal::ZERO {
            return Err(anyhow!("CC_PERCENT_FEE must not be negative"));
        }
        if self.schedule_await_minutes < 1 {
            return Err(anyhow!("CC_SCHEDULE_AWAIT_MINUTES must be at least 1"));
        }
        if self.strategy_timeout_ms == 0 {
            return Err(anyhow!("CC_STRATEGY_TIMEOUT_MS must be positive"));
        }
        if self.signal_grace_minutes < 0 {
            return Err(anyhow!("CC_SIGNAL_GRACE_MINUTES must not be negative"));
        }
        if self.cache_max_pages == 0 {
            return Err(anyhow!("CC_CACHE_MAX_PAGES must be positive"));
        }
        if let Some(trigger) = self.breakeven_trigger_percent {
            if trigger <= Decimal::ZERO {
                return Err(anyhow!("CC_BREAKEVEN_TRIGGER_PERCENT must be positive"));
            }
        }
        Ok(())
    }

    /// Load the named frame from `frames.toml`.
    pub fn find_frame(&self, name: &str) -> Result<FrameSchema> {
        let frames = load_frames(&self.frames_path)?;
        frames
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| {
                anyhow!(
                    "Frame '{}' not found in {}",
                    name,
                    self.frames_path.display()
                )
            })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

fn parse_optional_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {}: {}", key, e)),
        _ => Ok(None),
    }
}

fn parse_partial_levels(raw: Option<&str>) -> Result<BTreeSet<PartialLevel>> {
    let Some(raw) = raw else {
        return Ok(BTreeSet::new());
    };
    let mut levels = BTreeSet::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let value: u8 = part
            .parse()
            .map_err(|e| anyhow!("Invalid CC_PARTIAL_LEVELS entry '{}': {}", part, e))?;
        let level = PartialLevel::new(value).ok_or_else(|| {
            anyhow!(
                "Invalid CC_PARTIAL_LEVELS entry '{}': must be one of 10, 20, ..., 100",
                part
            )
        })?;
        levels.insert(level);
    }
    Ok(levels)
}

#[derive(Debug, Deserialize)]
struct FrameFile {
    #[serde(default)]
    frame: Vec<FrameEntry>,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    name: String,
    interval: String,
    start: String,
    end: String,
}

/// Parse every `[[frame]]` entry of a frames.toml file.
pub fn load_frames(path: &Path) -> Result<Vec<FrameSchema>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read frames file {}", path.display()))?;
    let file: FrameFile = toml::from_str(&raw)
        .with_context(|| format!("cannot parse frames file {}", path.display()))?;

    file.frame
        .into_iter()
        .map(|entry| {
            let interval: Interval = entry
                .interval
                .parse()
                .with_context(|| format!("frame '{}'", entry.name))?;
            let start_time = parse_rfc3339(&entry.start)
                .with_context(|| format!("frame '{}' start", entry.name))?;
            let end_time = parse_rfc3339(&entry.end)
                .with_context(|| format!("frame '{}' end", entry.name))?;
            if end_time <= start_time {
                return Err(anyhow!("frame '{}': end must be after start", entry.name));
            }
            Ok(FrameSchema {
                name: entry.name,
                interval,
                start_time,
                end_time,
            })
        })
        .collect()
}

fn parse_rfc3339(raw: &str) -> Result<i64> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow!("invalid timestamp '{}': {}", raw, e))?
        .timestamp_millis())
}
