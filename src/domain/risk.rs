use crate::domain::decision::OpenRequest;
use crate::domain::signal::Signal;
use anyhow::Result;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Result of a risk check.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    /// Check passed, the proposal can proceed.
    Approve,
    /// Check failed, the proposal is rejected with a reason.
    Reject(String),
}

impl ValidationResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, ValidationResult::Approve)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ValidationResult::Reject(_))
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            ValidationResult::Reject(reason) => Some(reason),
            ValidationResult::Approve => None,
        }
    }
}

/// Context handed to every check of a profile during one evaluation.
#[derive(Debug)]
pub struct RiskCheckContext<'a> {
    /// The open proposal being validated.
    pub proposal: &'a OpenRequest,
    pub symbol: &'a str,
    /// Current market price at the evaluating tick.
    pub current_price: Decimal,
    /// Signals currently active on this run's symbol.
    pub active_positions: &'a [Signal],
}

impl<'a> RiskCheckContext<'a> {
    /// Risk/reward ratio of the proposal (reward distance over risk
    /// distance). Zero when the stop sits on the entry.
    pub fn risk_reward_ratio(&self) -> Decimal {
        let reward = (self.proposal.price_take_profit - self.proposal.price_open).abs();
        let risk = (self.proposal.price_open - self.proposal.price_stop_loss).abs();
        if risk.is_zero() {
            Decimal::ZERO
        } else {
            reward / risk
        }
    }
}

/// A single risk predicate. Checks are pure and synchronous: the gate runs
/// on the engine's per-symbol stream which must not suspend. A check that
/// returns `Err` is a validation fault; the proposal is rejected and an
/// `error.validation` event is emitted.
pub trait RiskCheck: Send + Sync {
    /// Unique name for logging.
    fn name(&self) -> &str;

    fn check(&self, ctx: &RiskCheckContext<'_>) -> Result<ValidationResult>;
}

/// Closure-backed check, for profiles assembled at runtime.
pub struct FnCheck<F>
where
    F: Fn(&RiskCheckContext<'_>) -> Result<ValidationResult> + Send + Sync,
{
    name: String,
    f: F,
}

impl<F> FnCheck<F>
where
    F: Fn(&RiskCheckContext<'_>) -> Result<ValidationResult> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> RiskCheck for FnCheck<F>
where
    F: Fn(&RiskCheckContext<'_>) -> Result<ValidationResult> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, ctx: &RiskCheckContext<'_>) -> Result<ValidationResult> {
        (self.f)(ctx)
    }
}

/// An ordered list of checks evaluated before a proposal may enter the
/// state machine. First rejection short-circuits.
#[derive(Clone)]
pub struct RiskProfile {
    pub name: String,
    pub checks: Vec<Arc<dyn RiskCheck>>,
}

impl RiskProfile {
    pub fn new(name: impl Into<String>, checks: Vec<Arc<dyn RiskCheck>>) -> Self {
        Self {
            name: name.into(),
            checks,
        }
    }

    /// Profile that accepts everything.
    pub fn none() -> Self {
        Self::new("none", Vec::new())
    }

    /// Profile requiring a minimum risk/reward ratio on every proposal.
    pub fn min_risk_reward(ratio: Decimal) -> Self {
        let check = FnCheck::new("min-risk-reward", move |ctx: &RiskCheckContext<'_>| {
            let rr = ctx.risk_reward_ratio();
            if rr < ratio {
                Ok(ValidationResult::Reject(format!(
                    "R/R {rr:.2} below required {ratio:.2}"
                )))
            } else {
                Ok(ValidationResult::Approve)
            }
        });
        Self::new("min-rr", vec![Arc::new(check)])
    }

    /// Profile limiting the number of concurrently active signals.
    pub fn max_active(limit: usize) -> Self {
        let check = FnCheck::new("max-active", move |ctx: &RiskCheckContext<'_>| {
            if ctx.active_positions.len() >= limit {
                Ok(ValidationResult::Reject(format!(
                    "{} active signals, limit {}",
                    ctx.active_positions.len(),
                    limit
                )))
            } else {
                Ok(ValidationResult::Approve)
            }
        });
        Self::new("max-active", vec![Arc::new(check)])
    }
}
