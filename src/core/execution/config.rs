//! Configuration for a simulation run
//!
//! Covers the horizon, the presentation time mapping, print verbosity and
//! how execution units (the threads backing processes) are created.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::observer::MsgCategory;
use crate::core::time::TimeConverter;
use crate::core::types::{SimTime, PRIO_DEFAULT};

/// Which same-time schedules are reported as priority inversions.
///
/// An event scheduled at the current time runs after the event being
/// processed. It is reported when its priority asks to run before it
/// (`Strict`), or also when it ties (`NonIncreasing`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InversionCheck {
    Off,
    #[default]
    Strict,
    NonIncreasing,
}

impl InversionCheck {
    /// Whether `priority`, scheduled while `current` is processed, is reported
    pub fn flags(self, priority: i32, current: i32) -> bool {
        match self {
            InversionCheck::Off => false,
            InversionCheck::Strict => priority < current,
            InversionCheck::NonIncreasing => priority <= current,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Name of the root component
    pub name: String,
    /// Clock value when the run starts
    pub initial_time: SimTime,
    /// If set, an end-of-horizon event stops the run at this time
    pub sim_end_time: Option<SimTime>,
    /// If set, RESET_STATS is broadcast at this time
    pub stats_reset_time: Option<SimTime>,
    /// Wall-clock length of one simulated time unit
    pub time_unit: Duration,
    /// Wall-clock instant of simulated time 0
    pub epoch: SystemTime,
    /// Print messages above this category are discarded
    pub print_level: MsgCategory,
    /// Name prefix of execution unit threads
    pub thread_name_prefix: String,
    /// Stack size of execution unit threads; platform default when unset
    pub thread_stack_size: Option<usize>,
    /// Priority of the main process activation
    pub main_priority: i32,
    pub inversion_check: InversionCheck,
}

impl SimulationConfig {
    /// Create a new simulation configuration with default values
    pub fn new() -> Self {
        Self {
            name: "sim".to_string(),
            initial_time: 0.0,
            sim_end_time: None,
            stats_reset_time: None,
            time_unit: Duration::from_secs(60),
            epoch: UNIX_EPOCH,
            print_level: MsgCategory::default(),
            thread_name_prefix: "sim-unit".to_string(),
            thread_stack_size: None,
            main_priority: PRIO_DEFAULT,
            inversion_check: InversionCheck::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_initial_time(mut self, time: SimTime) -> Self {
        self.initial_time = time;
        self
    }

    /// Stop the run at `time` even if application events remain
    pub fn with_end_time(mut self, time: SimTime) -> Self {
        self.sim_end_time = Some(time);
        self
    }

    pub fn with_stats_reset_time(mut self, time: SimTime) -> Self {
        self.stats_reset_time = Some(time);
        self
    }

    pub fn with_time_mapping(mut self, epoch: SystemTime, time_unit: Duration) -> Self {
        self.epoch = epoch;
        self.time_unit = time_unit;
        self
    }

    pub fn with_print_level(mut self, level: MsgCategory) -> Self {
        self.print_level = level;
        self
    }

    /// Set the stack size of the threads backing processes
    ///
    /// # Note
    /// Deeply recursive process bodies need larger stacks
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = Some(size);
        self
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_main_priority(mut self, priority: i32) -> Self {
        self.main_priority = priority;
        self
    }

    /// Choose which same-time schedules are warned about
    pub fn with_inversion_check(mut self, check: InversionCheck) -> Self {
        self.inversion_check = check;
        self
    }

    pub fn time_converter(&self) -> TimeConverter {
        TimeConverter::new(self.epoch, self.time_unit)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::new()
    }
}
