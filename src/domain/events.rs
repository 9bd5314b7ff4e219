use crate::domain::decision::OpenRequest;
use crate::domain::signal::{CloseReason, PartialLevel, Signal, SignalId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Envelope carried by every wire event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub id: String,
    pub timestamp: i64,
    pub backtest: bool,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
}

/// The typed notification stream. The `type` tag selects the payload; every
/// consumer matches exhaustively so adding a case fails to compile rather
/// than silently dropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    #[serde(rename = "signal.scheduled")]
    SignalScheduled { meta: EventMeta, signal: Signal },

    #[serde(rename = "signal.opened")]
    SignalOpened { meta: EventMeta, signal: Signal },

    #[serde(rename = "signal.closed")]
    SignalClosed {
        meta: EventMeta,
        signal: Signal,
        price_close: Decimal,
        pnl_percentage: Decimal,
        close_reason: CloseReason,
    },

    #[serde(rename = "signal.cancelled")]
    SignalCancelled {
        meta: EventMeta,
        signal: Signal,
        cancel_reason: String,
    },

    #[serde(rename = "partial_profit.available")]
    PartialProfitAvailable {
        meta: EventMeta,
        signal_id: SignalId,
        level: PartialLevel,
        price: Decimal,
    },

    #[serde(rename = "partial_loss.available")]
    PartialLossAvailable {
        meta: EventMeta,
        signal_id: SignalId,
        level: PartialLevel,
        price: Decimal,
    },

    #[serde(rename = "breakeven.available")]
    BreakevenAvailable {
        meta: EventMeta,
        signal_id: SignalId,
        price: Decimal,
    },

    #[serde(rename = "partial_profit.commit")]
    PartialProfitCommit {
        meta: EventMeta,
        signal_id: SignalId,
        level: PartialLevel,
        price: Decimal,
    },

    #[serde(rename = "partial_loss.commit")]
    PartialLossCommit {
        meta: EventMeta,
        signal_id: SignalId,
        level: PartialLevel,
        price: Decimal,
    },

    #[serde(rename = "breakeven.commit")]
    BreakevenCommit {
        meta: EventMeta,
        signal_id: SignalId,
        effective_price_stop_loss: Decimal,
    },

    #[serde(rename = "trailing_stop.commit")]
    TrailingStopCommit {
        meta: EventMeta,
        signal_id: SignalId,
        effective_price_stop_loss: Decimal,
    },

    #[serde(rename = "trailing_take.commit")]
    TrailingTakeCommit {
        meta: EventMeta,
        signal_id: SignalId,
        effective_price_take_profit: Decimal,
    },

    #[serde(rename = "risk.rejection")]
    RiskRejection {
        meta: EventMeta,
        rejection_note: String,
        proposal: OpenRequest,
    },

    #[serde(rename = "progress.backtest")]
    BacktestProgress {
        meta: EventMeta,
        processed: usize,
        total: usize,
    },

    #[serde(rename = "done")]
    Done { meta: EventMeta, aborted: bool },

    #[serde(rename = "error.info")]
    ErrorInfo { meta: EventMeta, message: String },

    #[serde(rename = "error.validation")]
    ErrorValidation { meta: EventMeta, message: String },

    #[serde(rename = "error.critical")]
    ErrorCritical { meta: EventMeta, message: String },
}

impl EngineEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            EngineEvent::SignalScheduled { meta, .. }
            | EngineEvent::SignalOpened { meta, .. }
            | EngineEvent::SignalClosed { meta, .. }
            | EngineEvent::SignalCancelled { meta, .. }
            | EngineEvent::PartialProfitAvailable { meta, .. }
            | EngineEvent::PartialLossAvailable { meta, .. }
            | EngineEvent::BreakevenAvailable { meta, .. }
            | EngineEvent::PartialProfitCommit { meta, .. }
            | EngineEvent::PartialLossCommit { meta, .. }
            | EngineEvent::BreakevenCommit { meta, .. }
            | EngineEvent::TrailingStopCommit { meta, .. }
            | EngineEvent::TrailingTakeCommit { meta, .. }
            | EngineEvent::RiskRejection { meta, .. }
            | EngineEvent::BacktestProgress { meta, .. }
            | EngineEvent::Done { meta, .. }
            | EngineEvent::ErrorInfo { meta, .. }
            | EngineEvent::ErrorValidation { meta, .. }
            | EngineEvent::ErrorCritical { meta, .. } => meta,
        }
    }

    /// The wire `type` tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            EngineEvent::SignalScheduled { .. } => "signal.scheduled",
            EngineEvent::SignalOpened { .. } => "signal.opened",
            EngineEvent::SignalClosed { .. } => "signal.closed",
            EngineEvent::SignalCancelled { .. } => "signal.cancelled",
            EngineEvent::PartialProfitAvailable { .. } => "partial_profit.available",
            EngineEvent::PartialLossAvailable { .. } => "partial_loss.available",
            EngineEvent::BreakevenAvailable { .. } => "breakeven.available",
            EngineEvent::PartialProfitCommit { .. } => "partial_profit.commit",
            EngineEvent::PartialLossCommit { .. } => "partial_loss.commit",
            EngineEvent::BreakevenCommit { .. } => "breakeven.commit",
            EngineEvent::TrailingStopCommit { .. } => "trailing_stop.commit",
            EngineEvent::TrailingTakeCommit { .. } => "trailing_take.commit",
            EngineEvent::RiskRejection { .. } => "risk.rejection",
            EngineEvent::BacktestProgress { .. } => "progress.backtest",
            EngineEvent::Done { .. } => "done",
            EngineEvent::ErrorInfo { .. } => "error.info",
            EngineEvent::ErrorValidation { .. } => "error.validation",
            EngineEvent::ErrorCritical { .. } => "error.critical",
        }
    }

    /// The signal this event references, when it references one.
    pub fn signal_id(&self) -> Option<&SignalId> {
        match self {
            EngineEvent::SignalScheduled { signal, .. }
            | EngineEvent::SignalOpened { signal, .. }
            | EngineEvent::SignalClosed { signal, .. }
            | EngineEvent::SignalCancelled { signal, .. } => Some(&signal.id),
            EngineEvent::PartialProfitAvailable { signal_id, .. }
            | EngineEvent::PartialLossAvailable { signal_id, .. }
            | EngineEvent::BreakevenAvailable { signal_id, .. }
            | EngineEvent::PartialProfitCommit { signal_id, .. }
            | EngineEvent::PartialLossCommit { signal_id, .. }
            | EngineEvent::BreakevenCommit { signal_id, .. }
            | EngineEvent::TrailingStopCommit { signal_id, .. }
            | EngineEvent::TrailingTakeCommit { signal_id, .. } => Some(signal_id),
            EngineEvent::RiskRejection { .. }
            | EngineEvent::BacktestProgress { .. }
            | EngineEvent::Done { .. }
            | EngineEvent::ErrorInfo { .. }
            | EngineEvent::ErrorValidation { .. }
            | EngineEvent::ErrorCritical { .. } => None,
        }
    }

    /// Whether this event belongs to a signal's lifecycle (as opposed to
    /// run progress and error reporting).
    pub fn is_lifecycle(&self) -> bool {
        self.signal_id().is_some()
    }
}
