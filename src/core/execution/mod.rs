pub mod config;
mod lifecycle;
pub mod pool;
pub mod process;
pub mod simulation_engine;
pub(crate) mod unit;

pub use config::{InversionCheck, SimulationConfig};
pub use pool::PoolStats;
pub use process::{CompletionCallback, Process, ProcessContext, ProcessErrorHandler, ProcessOutcome};
pub use simulation_engine::{SimErrorHandler, Simulation};
