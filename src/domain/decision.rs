use crate::domain::signal::{PartialLevel, Position, SignalId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A proposed trade entry as produced by a strategy. Becomes a [`Signal`]
/// only after the RiskGate accepts it.
///
/// [`Signal`]: crate::domain::signal::Signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub position: Position,
    pub price_open: Decimal,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: i64,
    pub note: Option<String>,
}

/// Post-entry management intent scoped to a signal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ManagementAction {
    PartialProfit { level: PartialLevel },
    PartialLoss { level: PartialLevel },
    TrailingStop { percent: Decimal },
    TrailingTake { percent: Decimal },
    Breakeven,
    ActivateScheduled,
}

/// The strategy's answer at a tick. Every consumer matches exhaustively so
/// a new variant fails to compile rather than silently dropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Wait,
    Open(OpenRequest),
    CancelScheduled {
        signal_id: SignalId,
    },
    ClosePending {
        signal_id: SignalId,
    },
    Manage {
        signal_id: SignalId,
        #[serde(flatten)]
        action: ManagementAction,
    },
}

impl Decision {
    pub fn is_wait(&self) -> bool {
        matches!(self, Decision::Wait)
    }
}
