use thiserror::Error;

/// Errors surfaced by exchange adapters.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Exchange unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Unknown symbol: {symbol}")]
    SymbolUnknown { symbol: String },
}

impl ExchangeError {
    /// Unavailability is retried with exponential backoff; an unknown
    /// symbol is fatal for the run.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ExchangeError::Unavailable { .. })
    }
}

/// Errors raised inside the engine's per-symbol stream.
///
/// Recoverable kinds never leave the stream; they surface as events
/// (`error.info`, `error.validation`). Fatal kinds unwind the run, emit
/// `error.critical` and `done` with an abort marker, and then exit.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Strategy fault: {message}")]
    StrategyFault { message: String },

    #[error("Validation fault: {message}")]
    ValidationFault { message: String },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::StrategyFault { .. } | EngineError::ValidationFault { .. } => false,
            EngineError::InvariantViolation { .. } | EngineError::Persistence(_) => true,
            EngineError::Exchange(e) => !e.is_retriable(),
        }
    }

    /// Process exit code for the CLI runner: 3 for adapter failures, 4 for
    /// invariant violations. Misconfiguration (2) is decided before a run
    /// ever starts.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Exchange(_) => 3,
            EngineError::InvariantViolation { .. } => 4,
            _ => 1,
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        EngineError::InvariantViolation {
            message: message.into(),
        }
    }
}
