// Time and market data plumbing
pub mod candle_cache;
pub mod clock;

// Strategy invocation
pub mod strategies;
pub mod strategy_runner;

// Proposal gating
pub mod risk_gate;

// Signal lifecycle engine
pub mod engine;

// Composition root
pub mod system;
