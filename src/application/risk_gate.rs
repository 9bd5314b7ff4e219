use crate::domain::risk::{RiskCheckContext, RiskProfile, ValidationResult};
use tracing::{debug, warn};

/// Outcome of gating one open proposal.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Accepted,
    /// A check rejected the proposal; surfaces as a `risk.rejection` event.
    Rejected { note: String },
    /// A check itself failed; surfaces as an `error.validation` event and
    /// the proposal is rejected.
    Faulted { message: String },
}

/// Validates every proposed signal against the run's risk profile before it
/// may enter the state machine. Checks run in declared order; the first
/// rejection short-circuits.
pub struct RiskGate {
    profile: RiskProfile,
}

impl RiskGate {
    pub fn new(profile: RiskProfile) -> Self {
        Self { profile }
    }

    pub fn profile_name(&self) -> &str {
        &self.profile.name
    }

    pub fn evaluate(&self, ctx: &RiskCheckContext<'_>) -> GateOutcome {
        for check in &self.profile.checks {
            match check.check(ctx) {
                Ok(ValidationResult::Approve) => {
                    debug!(
                        "RiskGate [{}]: check '{}' approved",
                        ctx.symbol,
                        check.name()
                    );
                }
                Ok(ValidationResult::Reject(note)) => {
                    warn!(
                        "RiskGate [{}]: check '{}' rejected proposal: {}",
                        ctx.symbol,
                        check.name(),
                        note
                    );
                    return GateOutcome::Rejected { note };
                }
                Err(e) => {
                    warn!(
                        "RiskGate [{}]: check '{}' faulted: {}",
                        ctx.symbol,
                        check.name(),
                        e
                    );
                    return GateOutcome::Faulted {
                        message: format!("risk check '{}' failed: {}", check.name(), e),
                    };
                }
            }
        }
        GateOutcome::Accepted
    }
}
