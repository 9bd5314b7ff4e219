pub mod event_bus;
pub mod exchange;
pub mod persistence;
