use serde::{Deserialize, Serialize};

/// Simulated instant. Only ever moves forward within a run.
pub type SimTime = f64;

/// Most urgent event priority; lower values sort first.
pub const PRIO_HIGHEST: i32 = i32::MIN;
/// Priority used when callers do not care.
pub const PRIO_DEFAULT: i32 = 0;
/// Least urgent priority, used by the end-of-horizon event.
pub const PRIO_LOWEST: i32 = i32::MAX;

/// Identity of an event instance, stable across re-insertions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub(crate) u64);

impl EventId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ev#{}", self.0)
    }
}

/// Identity of a process within one simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub(crate) u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}

/// Handle of a node in the component tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentKey(pub(crate) u64);

/// Execution state of a simulation run.
///
/// `Initial → Init → BeforeRun → Running ⇄ Paused → Terminating → {Finished, Error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimState {
    Initial,
    Init,
    BeforeRun,
    Running,
    Paused,
    Terminating,
    Finished,
    Error,
}

impl SimState {
    /// True while the run loop is alive (running or parked by a pause)
    pub fn is_running(&self) -> bool {
        matches!(self, SimState::Running | SimState::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SimState::Finished | SimState::Error)
    }
}

/// State of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    Passive,
    Scheduled,
    Running,
    Terminated,
    Error,
}

impl ProcessState {
    pub fn is_done(&self) -> bool {
        matches!(self, ProcessState::Terminated | ProcessState::Error)
    }
}

/// Lifecycle notifications broadcast depth-first through the component tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Init,
    SimStart,
    ResetStats,
    SimEnd,
    Done,
    ProduceResults,
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleEvent::Init => "INIT",
            LifecycleEvent::SimStart => "SIM_START",
            LifecycleEvent::ResetStats => "RESET_STATS",
            LifecycleEvent::SimEnd => "SIM_END",
            LifecycleEvent::Done => "DONE",
            LifecycleEvent::ProduceResults => "PRODUCE_RESULTS",
        };
        write!(f, "{}", name)
    }
}
