use log::{debug, error, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

use super::config::{InversionCheck, SimulationConfig};
use super::pool::{ExecutionPool, PoolStats};
use super::process::{ProcessBody, ProcessContext, ProcessCore};
use super::unit::{lock, ExecutionUnit, Signal, UnitId};
use crate::core::components::tree::ComponentTree;
use crate::core::error::{catch_failure, SimError, SimResult};
use crate::core::event::{Event, EventAction};
use crate::core::event_queue::{EventHeap, EventQueue};
use crate::core::observer::{LogObserver, MsgCategory, PrintChannel, PrintMessage, SimulationObserver};
use crate::core::results::ResultMap;
use crate::core::time::TimeConverter;
use crate::core::types::{
    EventId, LifecycleEvent, ProcessId, ProcessState, SimState, SimTime, PRIO_HIGHEST,
};

/// Simulation-level failure handler; returns `true` if the failure is fatal
pub type SimErrorHandler = Arc<dyn Fn(&Simulation, &SimError) -> bool + Send + Sync>;

type ExternalAction = Box<dyn FnOnce(&Simulation) -> SimResult<()> + Send>;

/// How a unit stopped driving the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drive {
    /// The next event was the caller's own wake; it continues running
    SelfResumed,
    /// Another unit owns the loop now
    HandedOff,
    /// No more events will run; the root unit has to terminate the run
    Finished,
}

/// Mutable kernel state, guarded by one lock.
///
/// The lock is never held while user code runs or while a unit is parked.
/// When a process lock is needed as well, this one is taken first.
pub(crate) struct KernelState {
    pub(crate) exec: SimState,
    pub(crate) sim_time: SimTime,
    /// Priority of the event being processed
    pub(crate) current_priority: i32,
    pub(crate) queue: Box<dyn EventQueue>,
    /// Pending application events; the run ends when this reaches zero
    pub(crate) num_app_events: usize,
    pub(crate) events_processed: u64,
    pub(crate) end_requested: bool,
    pub(crate) failure: Option<SimError>,
    /// Known processes, removed when their body finishes
    pub(crate) processes: HashMap<ProcessId, Arc<ProcessCore>>,
    pub(crate) next_process_id: u64,
    pub(crate) current_process: Option<ProcessId>,
    pub(crate) loop_owner: Option<UnitId>,
    pub(crate) root_unit: Option<Arc<ExecutionUnit>>,
    pub(crate) results: ResultMap,
    pub(crate) run_started: Option<Instant>,
    pub(crate) run_duration: Option<Duration>,
}

impl KernelState {
    pub(crate) fn check_schedulable(&self, time: SimTime) -> SimResult<()> {
        if !time.is_finite() {
            return Err(SimError::InvalidTime(time));
        }
        if self.exec.is_terminal() {
            return Err(SimError::illegal_state("the simulation has already finished"));
        }
        if time < self.sim_time {
            return Err(SimError::EventInPast {
                time,
                now: self.sim_time,
            });
        }
        Ok(())
    }

    /// Whether an event at `time` with `priority` is a priority inversion
    /// relative to the event being processed
    pub(crate) fn is_inversion(&self, time: SimTime, priority: i32, check: InversionCheck) -> bool {
        self.exec.is_running()
            && self.events_processed > 0
            && time == self.sim_time
            && check.flags(priority, self.current_priority)
    }

    pub(crate) fn push(&mut self, event: Event) -> EventId {
        let id = event.id();
        if event.is_app_event() {
            self.num_app_events += 1;
        }
        self.queue.insert(event);
        id
    }

    pub(crate) fn remove(&mut self, id: EventId) -> Option<Event> {
        let removed = self.queue.remove(id)?;
        if removed.is_app_event() {
            self.num_app_events = self.num_app_events.saturating_sub(1);
        }
        Some(removed)
    }
}

/// Outstanding pause requests and the unit parked on them
#[derive(Default)]
struct PauseGate {
    requests: u32,
    parked: Option<Arc<ExecutionUnit>>,
}

pub(crate) struct Kernel {
    pub(crate) id: Uuid,
    pub(crate) config: SimulationConfig,
    converter: TimeConverter,
    pub(crate) state: Mutex<KernelState>,
    pub(crate) tree: Mutex<ComponentTree>,
    pause: Mutex<PauseGate>,
    submissions: Mutex<VecDeque<ExternalAction>>,
    printer: Mutex<PrintChannel>,
    error_handler: Mutex<Option<SimErrorHandler>>,
    main_body: Mutex<Option<ProcessBody>>,
    pub(crate) pool: ExecutionPool,
}

/// A discrete-event simulation.
///
/// `Simulation` is a cheap handle; clones share the same kernel. Actions,
/// process bodies and component hooks all receive a reference to it.
#[derive(Clone)]
pub struct Simulation {
    pub(crate) kernel: Arc<Kernel>,
}

impl Simulation {
    /// Create a new simulation backed by an `EventHeap`
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_queue(config, Box::new(EventHeap::new()))
    }

    /// Create a new simulation with a custom event queue
    pub fn with_queue(config: SimulationConfig, queue: Box<dyn EventQueue>) -> Self {
        let mut printer = PrintChannel::default();
        printer.add(Box::new(LogObserver));
        let id = Uuid::new_v4();
        debug!("Creating simulation '{}' ({})", config.name, id);

        let kernel = Kernel {
            id,
            converter: config.time_converter(),
            state: Mutex::new(KernelState {
                exec: SimState::Initial,
                sim_time: config.initial_time,
                current_priority: PRIO_HIGHEST,
                queue,
                num_app_events: 0,
                events_processed: 0,
                end_requested: false,
                failure: None,
                processes: HashMap::new(),
                next_process_id: 1,
                current_process: None,
                loop_owner: None,
                root_unit: None,
                results: ResultMap::new(),
                run_started: None,
                run_duration: None,
            }),
            tree: Mutex::new(ComponentTree::new(&config.name)),
            pause: Mutex::new(PauseGate::default()),
            submissions: Mutex::new(VecDeque::new()),
            printer: Mutex::new(printer),
            error_handler: Mutex::new(None),
            main_body: Mutex::new(None),
            pool: ExecutionPool::new(&config.thread_name_prefix, config.thread_stack_size),
            config,
        };
        Self {
            kernel: Arc::new(kernel),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, KernelState> {
        lock(&self.kernel.state)
    }

    /// Unique id of this simulation instance, reported as `runId`
    pub fn id(&self) -> Uuid {
        self.kernel.id
    }

    pub fn name(&self) -> &str {
        &self.kernel.config.name
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.kernel.config
    }

    pub fn sim_time(&self) -> SimTime {
        self.lock_state().sim_time
    }

    /// Priority of the event currently being processed
    pub fn current_priority(&self) -> i32 {
        self.lock_state().current_priority
    }

    pub fn state(&self) -> SimState {
        self.lock_state().exec
    }

    pub fn events_processed(&self) -> u64 {
        self.lock_state().events_processed
    }

    /// Number of pending application events
    pub fn num_app_events(&self) -> usize {
        self.lock_state().num_app_events
    }

    /// The process currently owning the event loop, if any
    pub fn current_process(&self) -> Option<ProcessId> {
        self.lock_state().current_process
    }

    /// The failure that aborted the run, if any
    pub fn failure(&self) -> Option<SimError> {
        self.lock_state().failure.clone()
    }

    pub fn time_converter(&self) -> &TimeConverter {
        &self.kernel.converter
    }

    /// Wall-clock instant corresponding to `time`
    pub fn sim_time_to_instant(&self, time: SimTime) -> SystemTime {
        self.kernel.converter.to_instant(time)
    }

    pub fn instant_to_sim_time(&self, instant: SystemTime) -> SimTime {
        self.kernel.converter.from_instant(instant)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.kernel.pool.stats()
    }

    // ---- Scheduling ----

    /// Insert `event` into the queue.
    ///
    /// Fails with `InvalidTime` for non-finite times and `EventInPast` for
    /// times before the clock. Scheduling at the current time with a more
    /// urgent priority than the event being processed is allowed but warned
    /// about, since that event can no longer run first. The config's
    /// `inversion_check` decides whether ties are warned about too.
    pub fn schedule(&self, event: Event) -> SimResult<EventId> {
        let mut st = self.lock_state();
        st.check_schedulable(event.time())?;
        let inverted = st.is_inversion(
            event.time(),
            event.priority(),
            self.kernel.config.inversion_check,
        ) && matches!(
            event.action(),
            EventAction::Call(_) | EventAction::Periodic { .. }
        );
        let current_priority = st.current_priority;
        let description = if inverted { Some(event.to_string()) } else { None };
        let id = st.push(event);
        drop(st);

        if let Some(description) = description {
            self.report_inversion(&description, current_priority);
        }
        Ok(id)
    }

    pub(crate) fn report_inversion(&self, description: &str, current_priority: i32) {
        warn!(
            "Priority inversion: {} scheduled while processing priority {}",
            description, current_priority
        );
        self.print_with(MsgCategory::Warn, || {
            format!("priority inversion scheduling {}", description)
        });
    }

    /// Run `action` at `time`
    pub fn schedule_at<F>(&self, time: SimTime, priority: i32, action: F) -> SimResult<EventId>
    where
        F: Fn(&Simulation) -> SimResult<()> + Send + Sync + 'static,
    {
        self.schedule(Event::call(time, priority, action))
    }

    /// Run `action` `delay` time units from now
    pub fn schedule_in<F>(&self, delay: SimTime, priority: i32, action: F) -> SimResult<EventId>
    where
        F: Fn(&Simulation) -> SimResult<()> + Send + Sync + 'static,
    {
        if delay.is_nan() {
            return Err(SimError::InvalidTime(delay));
        }
        self.schedule_at(self.sim_time() + delay, priority, action)
    }

    /// Like `schedule_at`, but the event does not keep the run alive
    pub fn schedule_utility_at<F>(&self, time: SimTime, priority: i32, action: F) -> SimResult<EventId>
    where
        F: Fn(&Simulation) -> SimResult<()> + Send + Sync + 'static,
    {
        self.schedule(Event::call(time, priority, action).utility())
    }

    /// Run `action` at `first` and then every `interval` while it returns `Ok(true)`.
    ///
    /// Every occurrence is the same event instance and keeps its id.
    pub fn schedule_periodic<F>(
        &self,
        first: SimTime,
        interval: SimTime,
        priority: i32,
        action: F,
    ) -> SimResult<EventId>
    where
        F: Fn(&Simulation) -> SimResult<bool> + Send + Sync + 'static,
    {
        if !(interval.is_finite() && interval > 0.0) {
            return Err(SimError::InvalidTime(interval));
        }
        self.schedule(Event::new(
            first,
            priority,
            EventAction::Periodic {
                interval,
                action: Arc::new(action),
            },
        ))
    }

    /// Remove a pending event; `false` if it already ran or never existed
    pub fn unschedule(&self, id: EventId) -> bool {
        self.lock_state().remove(id).is_some()
    }

    /// Snapshot of the queue in processing order
    pub fn pending_events(&self) -> Vec<Event> {
        self.lock_state().queue.all_events()
    }

    /// Run `action` inside the event loop before the next event is processed.
    ///
    /// Safe to call from any thread.
    pub fn submit<F>(&self, action: F)
    where
        F: FnOnce(&Simulation) -> SimResult<()> + Send + 'static,
    {
        lock(&self.kernel.submissions).push_back(Box::new(action));
    }

    /// Request termination; the event being processed completes first
    pub fn end(&self) {
        let mut st = self.lock_state();
        if !st.end_requested {
            debug!("End of simulation requested at t={}", st.sim_time);
        }
        st.end_requested = true;
    }

    // ---- Pausing ----

    /// Ask the event loop to park before the next event.
    ///
    /// Requests are counted; the run continues after as many `unpause` calls.
    pub fn pause(&self) {
        let first = {
            let mut gate = lock(&self.kernel.pause);
            gate.requests += 1;
            gate.requests == 1
        };
        if first {
            self.submit(|sim| {
                let now = sim.sim_time();
                sim.schedule(
                    Event::new(now, PRIO_HIGHEST, EventAction::Pause)
                        .utility()
                        .with_description("pause"),
                )?;
                Ok(())
            });
        }
    }

    /// Withdraw one pause request; the last one resumes the parked loop
    pub fn unpause(&self) -> SimResult<()> {
        let parked = {
            let mut gate = lock(&self.kernel.pause);
            if gate.requests == 0 {
                return Err(SimError::illegal_state("unpause without matching pause"));
            }
            gate.requests -= 1;
            if gate.requests == 0 {
                gate.parked.take()
            } else {
                None
            }
        };
        if let Some(unit) = parked {
            unit.post(Signal::Resume);
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.kernel.pause).requests > 0
    }

    /// Park `unit`, the one driving the loop, until the last `unpause`
    fn wait_while_paused(&self, unit: &Arc<ExecutionUnit>) {
        {
            let mut gate = lock(&self.kernel.pause);
            if gate.requests == 0 {
                return;
            }
            gate.parked = Some(unit.clone());
        }
        self.lock_state().exec = SimState::Paused;
        info!("Simulation '{}' paused at t={}", self.name(), self.sim_time());

        match unit.park() {
            Signal::Resume => {}
            other => warn!("{} woken with {:?} while paused", unit.id(), other),
        }

        self.lock_state().exec = SimState::Running;
        info!("Simulation '{}' resumed at t={}", self.name(), self.sim_time());
    }

    // ---- Print channel ----

    /// Register an observer for print messages and clock advances.
    ///
    /// Observers must not print or register observers themselves.
    pub fn add_observer(&self, observer: Box<dyn SimulationObserver>) {
        lock(&self.kernel.printer).add(observer);
    }

    pub fn print(&self, category: MsgCategory, message: impl std::fmt::Display) {
        self.print_with(category, || message.to_string());
    }

    /// Print a lazily built message; `message` only runs if the category passes
    pub fn print_with(&self, category: MsgCategory, message: impl FnOnce() -> String) {
        if !self.kernel.config.print_level.allows(category) {
            return;
        }
        let msg = PrintMessage {
            category,
            sim_time: self.sim_time(),
            message: message(),
        };
        let mut printer = lock(&self.kernel.printer);
        if !printer.is_empty() {
            printer.publish(&msg);
        }
    }

    // ---- Failure handling ----

    /// Install the handler deciding whether a failure ends the run
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&Simulation, &SimError) -> bool + Send + Sync + 'static,
    {
        *lock(&self.kernel.error_handler) = Some(Arc::new(handler));
    }

    /// Route a failure raised by simulated behavior to the error handler.
    ///
    /// Without a handler the failure is logged and treated as fatal.
    pub(crate) fn handle_failure(&self, err: SimError) {
        let handler = lock(&self.kernel.error_handler).clone();
        let fatal = match handler {
            Some(handler) => catch_failure(|| Ok(handler(self, &err))).unwrap_or(true),
            None => {
                error!(
                    "Simulation '{}' failed at t={}: {}",
                    self.name(),
                    self.sim_time(),
                    err
                );
                self.print(MsgCategory::Error, &err);
                true
            }
        };
        if fatal {
            let mut st = self.lock_state();
            if st.failure.is_none() {
                st.failure = Some(err);
            }
            st.end_requested = true;
        } else {
            debug!("Non-fatal failure, continuing: {}", err);
        }
    }

    // ---- Running ----

    /// Body of the `simMain` process started at the beginning of the run
    pub fn set_main<F>(&self, body: F)
    where
        F: FnOnce(&ProcessContext) -> SimResult<()> + Send + 'static,
    {
        *lock(&self.kernel.main_body) = Some(Box::new(body));
    }

    /// Run the event loop until no application events remain, `end` is
    /// requested or a fatal failure occurs.
    ///
    /// Calls `init` and `before_run` first if they were not called yet.
    /// Blocks the calling thread for the whole run.
    pub fn run(&self) -> SimResult<()> {
        match self.state() {
            SimState::Initial => {
                self.init()?;
                self.before_run()?;
            }
            SimState::Init => self.before_run()?,
            SimState::BeforeRun => {}
            other => {
                return Err(SimError::illegal_state(format!(
                    "cannot run a simulation in state {:?}",
                    other
                )))
            }
        }

        let root = ExecutionUnit::new(UnitId::ROOT);
        let start_time = {
            let mut st = self.lock_state();
            st.exec = SimState::Running;
            st.root_unit = Some(root.clone());
            st.loop_owner = Some(root.id());
            st.run_started = Some(Instant::now());
            st.sim_time
        };
        info!(
            "Simulation '{}' ({}) started at t={}",
            self.name(),
            self.id(),
            start_time
        );

        let idle_main: ProcessBody = Box::new(|_: &ProcessContext| Ok(()));
        let body = lock(&self.kernel.main_body).take().unwrap_or(idle_main);
        let main = self.create_process("simMain".to_string(), body);
        lock(&main.inner).priority = self.kernel.config.main_priority;
        if let Err(e) = self.schedule_wake(&main, start_time, ProcessState::Passive) {
            self.handle_failure(e);
        }

        match self.drive(&root, None) {
            Drive::HandedOff => match root.park() {
                Signal::Resume => {}
                other => warn!("Root unit woken with {:?}", other),
            },
            Drive::Finished | Drive::SelfResumed => {}
        }

        self.terminate(&root)
    }

    /// Process events on `unit` until the loop has to move to another unit.
    ///
    /// `own` is the process whose body runs on `unit`, if any.
    pub(crate) fn drive(&self, unit: &Arc<ExecutionUnit>, own: Option<ProcessId>) -> Drive {
        while let Some(event) = self.next_event() {
            trace!("{} processing {}", unit.id(), event);
            match event.action() {
                EventAction::Call(action) => {
                    if let Err(e) = catch_failure(|| (**action)(self)) {
                        self.handle_failure(e);
                    }
                }
                EventAction::Periodic { interval, action } => {
                    match catch_failure(|| (**action)(self)) {
                        Ok(true) => {
                            let mut next = event.clone();
                            next.set_time(event.time() + interval);
                            self.lock_state().push(next);
                        }
                        Ok(false) => {}
                        Err(e) => self.handle_failure(e),
                    }
                }
                EventAction::Resume(pid) => {
                    if own == Some(*pid) {
                        if self.mark_running(*pid) {
                            return Drive::SelfResumed;
                        }
                    } else if self.dispatch(*pid) {
                        return Drive::HandedOff;
                    }
                }
                EventAction::Pause => self.wait_while_paused(unit),
                EventAction::End => self.end(),
                EventAction::ResetStats => {
                    if let Err(e) = self.broadcast(LifecycleEvent::ResetStats) {
                        self.handle_failure(e);
                    }
                }
                EventAction::Noop => {}
            }
        }
        Drive::Finished
    }

    /// Pop the next event and advance the clock to it.
    ///
    /// `None` once termination is requested or no application events remain.
    fn next_event(&self) -> Option<Event> {
        self.drain_submissions();
        let (event, old_time) = {
            let mut st = self.lock_state();
            if st.end_requested || st.num_app_events == 0 {
                return None;
            }
            let event = st.queue.extract().ok()?;
            if event.is_app_event() {
                st.num_app_events -= 1;
            }
            let old_time = st.sim_time;
            st.sim_time = event.time();
            st.current_priority = event.priority();
            st.events_processed += 1;
            (event, old_time)
        };
        if event.time() != old_time {
            lock(&self.kernel.printer).time_advanced(old_time, event.time());
        }
        Some(event)
    }

    fn drain_submissions(&self) {
        loop {
            let next = lock(&self.kernel.submissions).pop_front();
            let Some(action) = next else { break };
            if let Err(e) = catch_failure(|| action(self)) {
                self.handle_failure(e);
            }
        }
    }

    /// Give the event loop back to the thread blocked in `run`
    pub(crate) fn hand_back_to_root(&self) {
        let root = {
            let mut st = self.lock_state();
            st.loop_owner = Some(UnitId::ROOT);
            st.current_process = None;
            st.root_unit.clone()
        };
        match root {
            Some(root) => root.post(Signal::Resume),
            None => error!("No root unit to hand the event loop back to"),
        }
    }

    /// Unwind parked processes, broadcast SIM_END and stop the pool
    fn terminate(&self, root: &Arc<ExecutionUnit>) -> SimResult<()> {
        let parked = {
            let mut st = self.lock_state();
            st.exec = SimState::Terminating;
            st.loop_owner = Some(root.id());
            st.current_process = None;
            let mut parked: Vec<Arc<ProcessCore>> = st
                .processes
                .values()
                .filter(|core| lock(&core.inner).unit.is_some())
                .cloned()
                .collect();
            parked.sort_by_key(|core| core.id);
            parked
        };
        debug!(
            "Simulation '{}' terminating at t={}, unwinding {} processes",
            self.name(),
            self.sim_time(),
            parked.len()
        );

        for core in parked {
            let unit = {
                let mut inner = lock(&core.inner);
                inner.unwound = true;
                inner.unit.clone()
            };
            let Some(unit) = unit else { continue };
            unit.post(Signal::Unwind);
            match root.park() {
                Signal::Resume => {}
                other => warn!("Root unit woken with {:?} while unwinding", other),
            }
        }

        // Drop bodies and callbacks of processes that never ran
        {
            let st = self.lock_state();
            for core in st.processes.values() {
                let mut inner = lock(&core.inner);
                inner.body = None;
                inner.callbacks.clear();
            }
        }

        let end_result = self.broadcast(LifecycleEvent::SimEnd);
        self.kernel.pool.shutdown();

        let (failure, time, events) = {
            let mut st = self.lock_state();
            if let Err(e) = &end_result {
                if st.failure.is_none() {
                    st.failure = Some(e.clone());
                }
            }
            st.run_duration = st.run_started.map(|started| started.elapsed());
            st.root_unit = None;
            st.loop_owner = None;
            st.exec = if st.failure.is_some() {
                SimState::Error
            } else {
                SimState::Finished
            };
            (st.failure.clone(), st.sim_time, st.events_processed)
        };

        match failure {
            Some(e) => {
                error!(
                    "Simulation '{}' aborted at t={} after {} events: {}",
                    self.name(),
                    time,
                    events,
                    e
                );
                Err(e)
            }
            None => {
                info!(
                    "Simulation '{}' finished at t={} after {} events",
                    self.name(),
                    time,
                    events
                );
                Ok(())
            }
        }
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}
