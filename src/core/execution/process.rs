//! Processes: simulated activities with their own sequential control flow.
//!
//! A process body runs on an execution unit leased from the pool the first
//! time it is activated. Whenever the body waits, its unit keeps driving the
//! event loop until the next event belongs to another process; control is
//! then handed over and the unit parks until its own wake event comes up.

use log::{debug, trace, warn};
use std::sync::{Arc, Mutex};

use super::simulation_engine::{Drive, Simulation};
use super::unit::{lock, ExecutionUnit, Signal, UnitJob};
use crate::core::error::{catch_failure, SimError, SimResult};
use crate::core::event::{next_event_id, Event, EventAction};
use crate::core::types::{
    ComponentKey, EventId, ProcessId, ProcessState, SimState, SimTime, PRIO_DEFAULT,
};

pub(crate) type ProcessBody = Box<dyn FnOnce(&ProcessContext) -> SimResult<()> + Send>;

/// Called once when a process terminates or fails
pub type CompletionCallback = Box<dyn FnOnce(&Simulation, &ProcessOutcome) + Send>;

/// Per-process failure handler; returns `true` if the failure was handled
pub type ProcessErrorHandler = Arc<dyn Fn(&SimError) -> bool + Send + Sync>;

/// How a process ended
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub id: ProcessId,
    pub name: String,
    pub state: ProcessState,
    pub failure: Option<SimError>,
}

pub(crate) struct ProcessInner {
    pub(crate) state: ProcessState,
    pub(crate) priority: i32,
    pub(crate) owner: Option<ComponentKey>,
    /// Set from the first activation until the body has returned
    pub(crate) unit: Option<Arc<ExecutionUnit>>,
    pub(crate) body: Option<ProcessBody>,
    /// Completion callbacks keyed by registration id
    pub(crate) callbacks: Vec<(u64, CompletionCallback)>,
    next_callback: u64,
    pub(crate) failure: Option<SimError>,
    pub(crate) error_handler: Option<ProcessErrorHandler>,
    /// The body was told to unwind because the simulation is terminating
    pub(crate) unwound: bool,
}

pub(crate) struct ProcessCore {
    pub(crate) id: ProcessId,
    pub(crate) name: String,
    /// Id of the reactivation event, reused across suspensions
    pub(crate) wake_id: EventId,
    pub(crate) inner: Mutex<ProcessInner>,
}

impl ProcessCore {
    fn new(id: ProcessId, name: String, body: ProcessBody) -> Self {
        Self {
            id,
            name,
            wake_id: next_event_id(),
            inner: Mutex::new(ProcessInner {
                state: ProcessState::Passive,
                priority: PRIO_DEFAULT,
                owner: None,
                unit: None,
                body: Some(body),
                callbacks: Vec::new(),
                next_callback: 0,
                failure: None,
                error_handler: None,
                unwound: false,
            }),
        }
    }

    /// Register `callback`, or hand it back if the process is already done
    fn register_callback(&self, callback: CompletionCallback) -> Result<u64, CompletionCallback> {
        let mut inner = lock(&self.inner);
        if inner.state.is_done() {
            return Err(callback);
        }
        let id = inner.next_callback;
        inner.next_callback += 1;
        inner.callbacks.push((id, callback));
        Ok(id)
    }

    fn remove_callback(&self, id: u64) {
        lock(&self.inner).callbacks.retain(|(registered, _)| *registered != id);
    }

    fn outcome(&self, inner: &ProcessInner) -> ProcessOutcome {
        ProcessOutcome {
            id: self.id,
            name: self.name.clone(),
            state: inner.state,
            failure: inner.failure.clone(),
        }
    }
}

/// Handle to a process whose body produces a `T`.
///
/// Handles are cheap to clone; all clones refer to the same process.
pub struct Process<T = ()> {
    core: Arc<ProcessCore>,
    value: Arc<Mutex<Option<T>>>,
    sim: Simulation,
}

impl<T> Clone for Process<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            value: self.value.clone(),
            sim: self.sim.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Process<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.core.id)
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> Process<T> {
    pub fn id(&self) -> ProcessId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> ProcessState {
        lock(&self.core.inner).state
    }

    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    pub fn priority(&self) -> i32 {
        lock(&self.core.inner).priority
    }

    /// Priority of future wake events; a pending one keeps its priority
    pub fn set_priority(&self, priority: i32) {
        lock(&self.core.inner).priority = priority;
    }

    pub fn owner(&self) -> Option<ComponentKey> {
        lock(&self.core.inner).owner
    }

    pub fn set_owner(&self, owner: ComponentKey) {
        lock(&self.core.inner).owner = Some(owner);
    }

    /// Schedule a passive process to run at `time`
    pub fn awake_at(&self, time: SimTime) -> SimResult<()> {
        self.sim
            .schedule_wake(&self.core, time, ProcessState::Passive)
    }

    pub fn awake_in(&self, delta: SimTime) -> SimResult<()> {
        if delta.is_nan() {
            return Err(SimError::InvalidTime(delta));
        }
        self.awake_at(self.sim.sim_time() + delta)
    }

    /// Activate a passive process at the current time
    pub fn resume(&self) -> SimResult<()> {
        self.awake_in(0.0)
    }

    /// Withdraw the pending wake event of a scheduled process, leaving it passive
    pub fn cancel(&self) -> SimResult<()> {
        self.sim.cancel_wake(&self.core)
    }

    /// Register `callback` to run when the process terminates or fails.
    ///
    /// Runs immediately if the process is already done.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Simulation, &ProcessOutcome) + Send + 'static,
    {
        if let Err(callback) = self.core.register_callback(Box::new(callback)) {
            let outcome = self.core.outcome(&lock(&self.core.inner));
            callback(&self.sim, &outcome);
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_callbacks(&self) -> usize {
        lock(&self.core.inner).callbacks.len()
    }

    /// Install a handler consulted before a failure escalates to the simulation
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&SimError) -> bool + Send + Sync + 'static,
    {
        lock(&self.core.inner).error_handler = Some(Arc::new(handler));
    }

    pub fn failure(&self) -> Option<SimError> {
        lock(&self.core.inner).failure.clone()
    }
}

impl<T: Clone> Process<T> {
    /// The value returned by the body.
    ///
    /// Fails with `NotFinished` while the process is alive, re-raises the
    /// failure of a process in ERROR, and fails with `Terminated` if the body
    /// was unwound without producing a value.
    pub fn get(&self) -> SimResult<T> {
        let inner = lock(&self.core.inner);
        match inner.state {
            ProcessState::Terminated => lock(&self.value)
                .clone()
                .ok_or(SimError::Terminated),
            ProcessState::Error => Err(inner
                .failure
                .clone()
                .unwrap_or_else(|| SimError::failure("process failed"))),
            _ => Err(SimError::NotFinished(self.core.name.clone())),
        }
    }
}

/// What a process body sees: blocking waits and access to the simulation
pub struct ProcessContext {
    sim: Simulation,
    core: Arc<ProcessCore>,
    unit: Arc<ExecutionUnit>,
}

impl ProcessContext {
    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    pub fn sim_time(&self) -> SimTime {
        self.sim.sim_time()
    }

    pub fn process_id(&self) -> ProcessId {
        self.core.id
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Block for `delta` units of simulated time
    pub fn wait_for(&self, delta: SimTime) -> SimResult<()> {
        if delta.is_nan() {
            return Err(SimError::InvalidTime(delta));
        }
        self.wait_until(self.sim.sim_time() + delta)
    }

    /// Block until the clock reaches `time`
    pub fn wait_until(&self, time: SimTime) -> SimResult<()> {
        self.ensure_alive()?;
        self.sim
            .schedule_wake(&self.core, time, ProcessState::Running)?;
        self.block()
    }

    /// Become passive until another party calls `awake_at`/`resume`
    pub fn suspend(&self) -> SimResult<()> {
        self.ensure_alive()?;
        self.sim.suspend_process(&self.core)?;
        self.block()
    }

    /// Block until `other` has terminated or failed
    pub fn join<U>(&self, other: &Process<U>) -> SimResult<()> {
        if other.id() == self.core.id {
            return Err(SimError::illegal_state(format!(
                "process '{}' cannot join itself",
                self.core.name
            )));
        }
        if other.is_done() {
            return Ok(());
        }
        let registration = self.wake_on_completion(other);
        let mut result = Ok(());
        while !other.is_done() {
            if let Err(e) = self.suspend() {
                result = Err(e);
                break;
            }
        }
        if let Some(id) = registration {
            other.core.remove_callback(id);
        }
        result
    }

    /// Like `join`, but gives up after `timeout`; returns whether `other` finished
    pub fn join_timeout<U>(&self, other: &Process<U>, timeout: SimTime) -> SimResult<bool> {
        if other.id() == self.core.id {
            return Err(SimError::illegal_state(format!(
                "process '{}' cannot join itself",
                self.core.name
            )));
        }
        if other.is_done() {
            return Ok(true);
        }
        let registration = self.wake_on_completion(other);
        let waited = self.wait_for(timeout);
        if let Some(id) = registration {
            other.core.remove_callback(id);
        }
        waited?;
        Ok(other.is_done())
    }

    /// Reactivate this process as soon as `other` completes.
    ///
    /// Returns the registration to remove once the wait is over; `None` if
    /// `other` is already done.
    fn wake_on_completion<U>(&self, other: &Process<U>) -> Option<u64> {
        let me = self.core.clone();
        other
            .core
            .register_callback(Box::new(move |sim: &Simulation, _: &ProcessOutcome| sim.wake_now(&me)))
            .ok()
    }

    fn ensure_alive(&self) -> SimResult<()> {
        if lock(&self.core.inner).unwound || self.sim.state() == SimState::Terminating {
            return Err(SimError::Terminated);
        }
        Ok(())
    }

    /// Drive the event loop on this unit until this process is woken again
    fn block(&self) -> SimResult<()> {
        match self.sim.drive(&self.unit, Some(self.core.id)) {
            Drive::SelfResumed => Ok(()),
            Drive::HandedOff => self.park(),
            Drive::Finished => {
                self.sim.hand_back_to_root();
                self.park()
            }
        }
    }

    fn park(&self) -> SimResult<()> {
        match self.unit.park() {
            Signal::Resume => Ok(()),
            Signal::Unwind => {
                lock(&self.core.inner).unwound = true;
                trace!("Process '{}' unwinding", self.core.name);
                Err(SimError::Terminated)
            }
            other => Err(SimError::illegal_state(format!(
                "process '{}' woken with {:?}",
                self.core.name, other
            ))),
        }
    }
}

impl Simulation {
    /// Create a passive process; activate it with `resume`/`awake_at`
    pub fn process<T, F>(&self, name: impl Into<String>, body: F) -> Process<T>
    where
        T: Send + 'static,
        F: FnOnce(&ProcessContext) -> SimResult<T> + Send + 'static,
    {
        let value = Arc::new(Mutex::new(None));
        let slot = value.clone();
        let body: ProcessBody = Box::new(move |ctx: &ProcessContext| {
            let produced = body(ctx)?;
            *lock(&slot) = Some(produced);
            Ok(())
        });
        Process {
            core: self.create_process(name.into(), body),
            value,
            sim: self.clone(),
        }
    }

    /// Create a process and activate it at the current time
    pub fn spawn<T, F>(&self, name: impl Into<String>, body: F) -> SimResult<Process<T>>
    where
        T: Send + 'static,
        F: FnOnce(&ProcessContext) -> SimResult<T> + Send + 'static,
    {
        let process = self.process(name, body);
        process.resume()?;
        Ok(process)
    }

    pub(crate) fn create_process(&self, name: String, body: ProcessBody) -> Arc<ProcessCore> {
        let mut st = self.lock_state();
        let id = ProcessId(st.next_process_id);
        st.next_process_id += 1;
        let core = Arc::new(ProcessCore::new(id, name, body));
        st.processes.insert(id, core.clone());
        debug!("Created process '{}' ({})", core.name, id);
        core
    }

    /// Insert the wake event of a process currently in `expected` state
    pub(crate) fn schedule_wake(
        &self,
        core: &Arc<ProcessCore>,
        time: SimTime,
        expected: ProcessState,
    ) -> SimResult<()> {
        let mut st = self.lock_state();
        st.check_schedulable(time)?;
        let mut inner = lock(&core.inner);
        if inner.state != expected {
            return Err(SimError::illegal_state(format!(
                "process '{}' is {:?}, expected {:?}",
                core.name, inner.state, expected
            )));
        }
        // a process rescheduling itself is not an inversion
        let inverted = st.current_process != Some(core.id)
            && st.is_inversion(time, inner.priority, self.kernel.config.inversion_check);
        let current_priority = st.current_priority;
        let mut event = Event::new(time, inner.priority, EventAction::Resume(core.id));
        event.id = core.wake_id;
        let description = if inverted { Some(event.to_string()) } else { None };
        st.push(event);
        inner.state = ProcessState::Scheduled;
        if st.current_process == Some(core.id) {
            st.current_process = None;
        }
        drop(inner);
        drop(st);

        trace!("Process '{}' scheduled at t={}", core.name, time);
        if let Some(description) = description {
            self.report_inversion(&description, current_priority);
        }
        Ok(())
    }

    pub(crate) fn cancel_wake(&self, core: &Arc<ProcessCore>) -> SimResult<()> {
        let mut st = self.lock_state();
        let mut inner = lock(&core.inner);
        if inner.state != ProcessState::Scheduled {
            return Err(SimError::illegal_state(format!(
                "cannot cancel process '{}' in state {:?}",
                core.name, inner.state
            )));
        }
        st.remove(core.wake_id);
        inner.state = ProcessState::Passive;
        debug!("Process '{}' cancelled", core.name);
        Ok(())
    }

    /// Move the wake of a waiting process to the current time
    pub(crate) fn wake_now(&self, core: &Arc<ProcessCore>) {
        let mut st = self.lock_state();
        let mut inner = lock(&core.inner);
        match inner.state {
            ProcessState::Passive => {}
            ProcessState::Scheduled => {
                st.remove(core.wake_id);
            }
            _ => return,
        }
        let mut event = Event::new(st.sim_time, inner.priority, EventAction::Resume(core.id));
        event.id = core.wake_id;
        st.push(event);
        inner.state = ProcessState::Scheduled;
    }

    pub(crate) fn suspend_process(&self, core: &Arc<ProcessCore>) -> SimResult<()> {
        let mut st = self.lock_state();
        let mut inner = lock(&core.inner);
        if inner.state != ProcessState::Running {
            return Err(SimError::illegal_state(format!(
                "process '{}' is {:?} and cannot suspend",
                core.name, inner.state
            )));
        }
        inner.state = ProcessState::Passive;
        if st.current_process == Some(core.id) {
            st.current_process = None;
        }
        Ok(())
    }

    /// The wake event of the process driving the loop came up on its own unit
    pub(crate) fn mark_running(&self, pid: ProcessId) -> bool {
        let mut st = self.lock_state();
        let Some(core) = st.processes.get(&pid).cloned() else {
            return false;
        };
        let mut inner = lock(&core.inner);
        if inner.state != ProcessState::Scheduled {
            return false;
        }
        inner.state = ProcessState::Running;
        st.current_process = Some(pid);
        true
    }

    /// Hand the event loop to process `pid`; `false` if its wake was stale
    pub(crate) fn dispatch(&self, pid: ProcessId) -> bool {
        let Some(core) = self.lock_state().processes.get(&pid).cloned() else {
            warn!("Wake event for unknown {}", pid);
            return false;
        };
        let parked = {
            let mut inner = lock(&core.inner);
            if inner.state != ProcessState::Scheduled {
                debug!("Stale wake of process '{}' ({:?})", core.name, inner.state);
                return false;
            }
            inner.state = ProcessState::Running;
            inner.unit.clone()
        };

        let (unit, signal) = match parked {
            Some(unit) => (unit, Signal::Resume),
            None => match self.kernel.pool.lease() {
                Ok(unit) => {
                    lock(&core.inner).unit = Some(unit.clone());
                    (unit, Signal::Start(self.process_job(core.clone())))
                }
                Err(e) => {
                    {
                        let mut inner = lock(&core.inner);
                        inner.state = ProcessState::Error;
                        inner.failure = Some(e.clone());
                    }
                    self.lock_state().processes.remove(&pid);
                    self.handle_failure(SimError::ProcessFailed {
                        process: core.name.clone(),
                        cause: Box::new(e),
                    });
                    return false;
                }
            },
        };

        {
            let mut st = self.lock_state();
            st.current_process = Some(pid);
            st.loop_owner = Some(unit.id());
        }
        trace!("Event loop handed to '{}' on {}", core.name, unit.id());
        unit.post(signal);
        true
    }

    fn process_job(&self, core: Arc<ProcessCore>) -> UnitJob {
        let sim = self.clone();
        Box::new(move |unit| sim.run_process_body(unit, core))
    }

    fn run_process_body(&self, unit: Arc<ExecutionUnit>, core: Arc<ProcessCore>) {
        let body = lock(&core.inner).body.take();
        debug!("Process '{}' started at t={}", core.name, self.sim_time());
        let ctx = ProcessContext {
            sim: self.clone(),
            core: core.clone(),
            unit: unit.clone(),
        };
        let result = match body {
            Some(body) => catch_failure(|| body(&ctx)),
            None => Err(SimError::illegal_state(format!(
                "process '{}' has no body to run",
                core.name
            ))),
        };
        drop(ctx);
        self.finish_process(&unit, &core, result);
    }

    fn finish_process(&self, unit: &Arc<ExecutionUnit>, core: &Arc<ProcessCore>, result: SimResult<()>) {
        let (outcome, unwound, handler) = {
            let mut inner = lock(&core.inner);
            let unwound = inner.unwound;
            match result {
                Ok(()) => inner.state = ProcessState::Terminated,
                Err(SimError::Terminated) if unwound => inner.state = ProcessState::Terminated,
                Err(e) => {
                    inner.state = ProcessState::Error;
                    inner.failure = Some(e);
                }
            }
            inner.unit = None;
            (core.outcome(&inner), unwound, inner.error_handler.clone())
        };
        let terminating = {
            let mut st = self.lock_state();
            st.processes.remove(&core.id);
            if st.current_process == Some(core.id) {
                st.current_process = None;
            }
            st.exec == SimState::Terminating
        };
        debug!(
            "Process '{}' finished as {:?} at t={}",
            core.name,
            outcome.state,
            self.sim_time()
        );

        if unwound || terminating {
            if let Some(failure) = &outcome.failure {
                warn!("Process '{}' failed while unwinding: {}", core.name, failure);
            }
            // callback failures are only logged here
            for err in self.run_callbacks(core, &outcome) {
                warn!(
                    "Completion callback of process '{}' failed while unwinding: {}",
                    core.name, err
                );
            }
            self.hand_back_to_root();
            return;
        }

        if let Some(failure) = outcome.failure.clone() {
            let handled = handler
                .map(|h| catch_failure(|| Ok(h(&failure))).unwrap_or(false))
                .unwrap_or(false);
            if handled {
                debug!("Failure of process '{}' handled locally", core.name);
            } else {
                self.handle_failure(SimError::ProcessFailed {
                    process: core.name.clone(),
                    cause: Box::new(failure),
                });
            }
        }

        for err in self.run_callbacks(core, &outcome) {
            self.handle_failure(err);
        }

        // The body is gone; this unit keeps driving the loop until it hands off.
        match self.drive(unit, None) {
            Drive::Finished => self.hand_back_to_root(),
            Drive::HandedOff => {}
            Drive::SelfResumed => warn!("{} resumed a finished process", unit.id()),
        }
    }

    /// Run the completion callbacks of a finished process, each exactly once
    fn run_callbacks(&self, core: &Arc<ProcessCore>, outcome: &ProcessOutcome) -> Vec<SimError> {
        let callbacks = std::mem::take(&mut lock(&core.inner).callbacks);
        callbacks
            .into_iter()
            .filter_map(|(_, callback)| {
                catch_failure(|| {
                    callback(self, outcome);
                    Ok(())
                })
                .err()
            })
            .collect()
    }
}
