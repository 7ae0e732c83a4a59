use thiserror::Error;

use super::types::SimTime;

/// Errors raised by the simulation kernel and by simulated behavior
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// An event was scheduled strictly before the current clock
    #[error("event scheduled at {time} which is before the current time {now}")]
    EventInPast { time: SimTime, now: SimTime },

    #[error("invalid event time {0}")]
    InvalidTime(SimTime),

    /// An operation was attempted in a state that does not allow it
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("component '{0}' has already been initialized")]
    AlreadyInitialized(String),

    /// `get()` was called on a process that has not terminated yet
    #[error("process '{0}' has not finished")]
    NotFinished(String),

    #[error("event queue is empty")]
    EmptyQueue,

    /// A failure raised by simulated behavior
    #[error("{0}")]
    Failure(String),

    /// A panic caught while running simulated behavior
    #[error("panicked: {0}")]
    Panicked(String),

    /// An unhandled failure of a process body, escalated to the simulation
    #[error("process '{process}' failed: {cause}")]
    ProcessFailed {
        process: String,
        cause: Box<SimError>,
    },

    /// Unwind signal delivered to parked processes while the simulation terminates
    #[error("simulation is terminating")]
    Terminated,

    #[error("component '{0}' not found")]
    ComponentNotFound(String),

    #[error("a component named '{name}' already exists under '{parent}'")]
    DuplicateName { parent: String, name: String },

    #[error("component '{0}' cannot hold children")]
    NotAContainer(String),

    /// The component is currently executing one of its own hooks
    #[error("component '{0}' is busy")]
    ComponentBusy(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to spawn execution unit: {0}")]
    ThreadSpawn(String),
}

impl SimError {
    /// Convenience constructor for failures raised by simulated behavior
    pub fn failure(msg: impl Into<String>) -> Self {
        SimError::Failure(msg.into())
    }

    pub fn illegal_state(msg: impl Into<String>) -> Self {
        SimError::IllegalState(msg.into())
    }

    /// The innermost cause, looking through `ProcessFailed` wrappers
    pub fn root_cause(&self) -> &SimError {
        match self {
            SimError::ProcessFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

pub type SimResult<T> = Result<T, SimError>;

/// Runs `f`, turning a panic into `SimError::Panicked`.
pub(crate) fn catch_failure<R>(f: impl FnOnce() -> SimResult<R>) -> SimResult<R> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(SimError::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_process_failures() {
        let err = SimError::ProcessFailed {
            process: "outer".to_string(),
            cause: Box::new(SimError::ProcessFailed {
                process: "inner".to_string(),
                cause: Box::new(SimError::failure("boom")),
            }),
        };
        assert_eq!(err.root_cause(), &SimError::failure("boom"));
        assert!(err.to_string().contains("outer"));
    }

    #[test]
    fn test_catch_failure_converts_panics() {
        let result: SimResult<()> = catch_failure(|| panic!("exploded"));
        assert_eq!(result, Err(SimError::Panicked("exploded".to_string())));

        let ok = catch_failure(|| Ok(3));
        assert_eq!(ok, Ok(3));
    }
}
