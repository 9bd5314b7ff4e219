use crate::domain::decision::OpenRequest;
use crate::domain::signal::{MilestoneKind, PartialLevel, SignalId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A queued lifecycle or management transition awaiting application.
///
/// Every mutation of a signal flows through one of these, in FIFO order per
/// symbol: path-synthesized crossings during intra-candle replay, engine
/// injections (expiries), and user-initiated intents from the strategy.
/// The persisted commit log (`commits.ndjson`) is therefore a complete
/// record: replaying it against a fresh store reproduces the exact event
/// emissions of the original run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitEvent {
    pub signal_id: SignalId,
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: CommitPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommitPayload {
    /// RiskGate accepted an open decision; creates the signal record.
    /// `immediate` marks an entry priced at the current market, which
    /// skips the scheduled state.
    OpenAccepted { request: OpenRequest, immediate: bool },
    /// The market touched the signal's entry price.
    EntryTouched { price: Decimal },
    /// The effective stop loss was touched.
    StopLossTouched,
    /// The effective take profit was touched (inclusive).
    TakeProfitTouched,
    /// The path crossed an armed milestone threshold.
    MilestoneReached {
        milestone: MilestoneKind,
        level: PartialLevel,
        price: Decimal,
    },
    /// The path first touched the breakeven trigger distance.
    BreakevenTriggered { price: Decimal },
    /// The schedule window elapsed without an entry touch.
    ScheduleExpired,
    /// The estimated holding time elapsed.
    TimeExpired { price: Decimal },
    /// Strategy cancelled a scheduled signal.
    CancelScheduled,
    /// Strategy cancelled a pending signal before activation.
    ClosePending,
    /// Strategy takes partial profit at the current price.
    PartialProfitCommit { level: PartialLevel, price: Decimal },
    /// Strategy takes partial loss at the current price.
    PartialLossCommit { level: PartialLevel, price: Decimal },
    /// Strategy tightens the stop by a percentage shift.
    TrailingStop { percent: Decimal },
    /// Strategy tightens the take by a percentage shift.
    TrailingTake { percent: Decimal },
    /// Strategy moves the stop to the entry price.
    Breakeven { price: Decimal },
    /// Strategy forces entry of a scheduled signal at the current price.
    ActivateScheduled { price: Decimal },
}

impl CommitPayload {
    /// Terminal close commits win exact-price ties against milestone and
    /// breakeven crossings within a sweep (inclusive close first).
    pub fn tie_priority(&self) -> u8 {
        match self {
            CommitPayload::StopLossTouched | CommitPayload::TakeProfitTouched => 0,
            CommitPayload::EntryTouched { .. } => 1,
            CommitPayload::BreakevenTriggered { .. } => 2,
            CommitPayload::MilestoneReached { .. } => 3,
            _ => 4,
        }
    }
}
