// Core value types
pub mod candle;
pub mod signal;

// Strategy and lifecycle contracts
pub mod commit;
pub mod decision;
pub mod events;
pub mod frame;

// Risk profile contract
pub mod risk;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
