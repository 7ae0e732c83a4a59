use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

use super::types::SimTime;

/// Category (and verbosity threshold) of a print message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MsgCategory {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    All,
}

impl MsgCategory {
    /// Whether a message of category `msg` passes this threshold
    pub fn allows(&self, msg: MsgCategory) -> bool {
        msg != MsgCategory::Off && msg <= *self
    }
}

impl Default for MsgCategory {
    fn default() -> Self {
        MsgCategory::Info
    }
}

/// A message on the simulation's print channel
#[derive(Debug, Clone, PartialEq)]
pub struct PrintMessage {
    pub category: MsgCategory,
    pub sim_time: SimTime,
    pub message: String,
}

impl std::fmt::Display for PrintMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\t{:?}\t{}", self.sim_time, self.category, self.message)
    }
}

/// Observer trait for simulation output
///
/// Observers only watch; nothing they do feeds back into scheduling.
pub trait SimulationObserver: Send {
    /// Called for every print message passing the configured threshold
    fn on_print(&mut self, msg: &PrintMessage);

    /// Called when the simulation clock advances
    fn on_time_advance(&mut self, _old_time: SimTime, _new_time: SimTime) {}
}

/// Forwards print messages to the `log` facade
#[derive(Debug, Default)]
pub struct LogObserver;

impl SimulationObserver for LogObserver {
    fn on_print(&mut self, msg: &PrintMessage) {
        match msg.category {
            MsgCategory::Off => {}
            MsgCategory::Error => error!("[t={}] {}", msg.sim_time, msg.message),
            MsgCategory::Warn => warn!("[t={}] {}", msg.sim_time, msg.message),
            MsgCategory::Info => info!("[t={}] {}", msg.sim_time, msg.message),
            MsgCategory::Debug => debug!("[t={}] {}", msg.sim_time, msg.message),
            MsgCategory::Trace | MsgCategory::All => trace!("[t={}] {}", msg.sim_time, msg.message),
        }
    }
}

/// Fans print messages and clock advances out to the registered observers
#[derive(Default)]
pub(crate) struct PrintChannel {
    observers: Vec<Box<dyn SimulationObserver>>,
}

impl PrintChannel {
    pub(crate) fn add(&mut self, observer: Box<dyn SimulationObserver>) {
        self.observers.push(observer);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub(crate) fn publish(&mut self, msg: &PrintMessage) {
        for observer in &mut self.observers {
            observer.on_print(msg);
        }
    }

    pub(crate) fn time_advanced(&mut self, old_time: SimTime, new_time: SimTime) {
        for observer in &mut self.observers {
            observer.on_time_advance(old_time, new_time);
        }
    }
}
