pub mod core;

// Re-export commonly used types
pub use crate::core::components::{Component, ComponentContext, Container};
pub use crate::core::error::{SimError, SimResult};
pub use crate::core::event::{Event, EventAction};
pub use crate::core::event_queue::{EventHeap, EventQueue};
pub use crate::core::execution::{
    InversionCheck, Process, ProcessContext, ProcessOutcome, Simulation, SimulationConfig,
};
pub use crate::core::observer::{LogObserver, MsgCategory, PrintMessage, SimulationObserver};
pub use crate::core::results::{ResultMap, ResultValue};
pub use crate::core::time::TimeConverter;
pub use crate::core::types::{
    ComponentKey, EventId, LifecycleEvent, ProcessId, ProcessState, SimState, SimTime,
    PRIO_DEFAULT, PRIO_HIGHEST, PRIO_LOWEST,
};
