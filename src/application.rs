//! Application layer
//!
//! The change orchestrator runs checks; the scheduler decides when.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{
    Cadence, ChangeOrchestrator, CheckOutcome, CycleReport, OrchestratorSettings,
};
pub use scheduler::{
    AVAILABILITY_INTERVAL_KEY, CheckScheduler, PRICE_INTERVAL_KEY, TimerSettings, TimerState,
};
