use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use super::error::SimResult;
use super::execution::Simulation;
use super::types::{EventId, ProcessId, SimTime, PRIO_DEFAULT};

/// Global event ID counter for unique event identification
static EVENT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_event_id() -> EventId {
    EventId(EVENT_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
}

pub type ActionFn = Arc<dyn Fn(&Simulation) -> SimResult<()> + Send + Sync>;
pub type PeriodicFn = Arc<dyn Fn(&Simulation) -> SimResult<bool> + Send + Sync>;

/// What happens when an event fires
#[derive(Clone)]
pub enum EventAction {
    /// Run a user action
    Call(ActionFn),
    /// Run a user action and re-insert the same event `interval` later while it returns `true`
    Periodic { interval: SimTime, action: PeriodicFn },
    /// Reactivate a scheduled process
    Resume(ProcessId),
    /// Park the driving execution unit while pause requests are outstanding
    Pause,
    /// End-of-horizon: request termination
    End,
    /// Broadcast RESET_STATS through the component tree
    ResetStats,
    /// Does nothing; useful for queue tests and as a time marker
    Noop,
}

impl std::fmt::Debug for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Call(_) => write!(f, "Call"),
            EventAction::Periodic { interval, .. } => write!(f, "Periodic({})", interval),
            EventAction::Resume(pid) => write!(f, "Resume({})", pid),
            EventAction::Pause => write!(f, "Pause"),
            EventAction::End => write!(f, "End"),
            EventAction::ResetStats => write!(f, "ResetStats"),
            EventAction::Noop => write!(f, "Noop"),
        }
    }
}

/// A scheduled action: time, priority, insertion sequence and what to run.
///
/// Ordering is time ascending, then priority ascending, then sequence number
/// ascending, so events sharing `(time, priority)` run in insertion order.
#[derive(Debug, Clone)]
pub struct Event {
    pub(crate) id: EventId,
    pub(crate) time: SimTime,
    pub(crate) priority: i32,
    pub(crate) sequence_num: u64,
    pub(crate) app_event: bool,
    pub(crate) description: Option<String>,
    pub(crate) action: EventAction,
}

impl Event {
    /// Create an application event
    pub fn new(time: SimTime, priority: i32, action: EventAction) -> Self {
        Self {
            id: next_event_id(),
            time,
            priority,
            sequence_num: 0,
            app_event: true,
            description: None,
            action,
        }
    }

    /// Create an application event running `f`
    pub fn call<F>(time: SimTime, priority: i32, f: F) -> Self
    where
        F: Fn(&Simulation) -> SimResult<()> + Send + Sync + 'static,
    {
        Self::new(time, priority, EventAction::Call(Arc::new(f)))
    }

    /// An event that does nothing, at default priority
    pub fn marker(time: SimTime) -> Self {
        Self::new(time, PRIO_DEFAULT, EventAction::Noop)
    }

    /// Mark this event as a utility event that does not keep the run alive
    pub fn utility(mut self) -> Self {
        self.app_event = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Sequence number assigned by the queue at the last insertion
    pub fn sequence_num(&self) -> u64 {
        self.sequence_num
    }

    pub fn is_app_event(&self) -> bool {
        self.app_event
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn action(&self) -> &EventAction {
        &self.action
    }

    /// Move this instance to a new time before re-inserting it
    pub(crate) fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}(prio={}, seq={}",
            self.id, self.time, self.priority, self.sequence_num
        )?;
        if let Some(desc) = &self.description {
            write!(f, ", {}", desc)?;
        }
        write!(f, ", {:?})", self.action)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| self.sequence_num.cmp(&other.sequence_num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_unique_ids() {
        let a = Event::marker(1.0);
        let b = Event::marker(1.0);
        assert_ne!(a.id(), b.id());
        assert!(a.is_app_event());
        assert!(!a.clone().utility().is_app_event());
    }

    #[test]
    fn test_ordering_time_then_priority_then_sequence() {
        let mut early = Event::new(1.0, 5, EventAction::Noop);
        let mut urgent = Event::new(2.0, -1, EventAction::Noop);
        let mut first = Event::new(2.0, 3, EventAction::Noop);
        let mut second = Event::new(2.0, 3, EventAction::Noop);
        early.sequence_num = 9;
        urgent.sequence_num = 8;
        first.sequence_num = 1;
        second.sequence_num = 2;

        assert!(early < urgent);
        assert!(urgent < first);
        assert!(first < second);
    }

    #[test]
    fn test_display_mentions_description() {
        let event = Event::marker(3.5).with_description("arrival");
        let text = event.to_string();
        assert!(text.contains("3.5"));
        assert!(text.contains("arrival"));
    }
}
