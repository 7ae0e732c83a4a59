use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::types::SimTime;

/// Maps simulated time to wall-clock instants.
///
/// Simulated time `t` corresponds to `epoch + t * time_unit`. This is only a
/// presentation aid; event ordering never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeConverter {
    epoch: SystemTime,
    time_unit: Duration,
}

impl TimeConverter {
    pub fn new(epoch: SystemTime, time_unit: Duration) -> Self {
        Self { epoch, time_unit }
    }

    pub fn epoch(&self) -> SystemTime {
        self.epoch
    }

    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }

    /// Wall-clock instant of a simulated time. Negative times lie before the epoch.
    pub fn to_instant(&self, sim_time: SimTime) -> SystemTime {
        let offset = self.to_duration(sim_time.abs());
        if sim_time >= 0.0 {
            self.epoch + offset
        } else {
            self.epoch - offset
        }
    }

    pub fn from_instant(&self, instant: SystemTime) -> SimTime {
        match instant.duration_since(self.epoch) {
            Ok(after) => self.from_duration(after),
            Err(before) => -self.from_duration(before.duration()),
        }
    }

    /// Wall-clock length of a non-negative simulated span
    pub fn to_duration(&self, sim_delta: SimTime) -> Duration {
        self.time_unit.mul_f64(sim_delta.max(0.0))
    }

    pub fn from_duration(&self, duration: Duration) -> SimTime {
        duration.as_secs_f64() / self.time_unit.as_secs_f64()
    }
}

impl Default for TimeConverter {
    fn default() -> Self {
        Self::new(UNIX_EPOCH, Duration::from_secs(60))
    }
}
