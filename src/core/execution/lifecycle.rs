//! Lifecycle broadcasts and the component tree as seen from `Simulation`

use log::{debug, info};

use super::simulation_engine::Simulation;
use super::unit::lock;
use crate::core::components::{Component, ComponentContext, TypedValue};
use crate::core::error::{catch_failure, SimError, SimResult};
use crate::core::event::{Event, EventAction};
use crate::core::results::ResultMap;
use crate::core::types::{ComponentKey, LifecycleEvent, SimState, PRIO_HIGHEST, PRIO_LOWEST};

impl Simulation {
    /// Broadcast INIT to the component tree
    pub fn init(&self) -> SimResult<()> {
        let state = self.state();
        if state != SimState::Initial {
            return Err(SimError::illegal_state(format!(
                "init called in state {:?}",
                state
            )));
        }
        self.broadcast(LifecycleEvent::Init)?;
        self.lock_state().exec = SimState::Init;
        Ok(())
    }

    /// Schedule the horizon and stats-reset events and broadcast SIM_START
    pub fn before_run(&self) -> SimResult<()> {
        let state = self.state();
        if state != SimState::Init {
            return Err(SimError::illegal_state(format!(
                "before_run called in state {:?}",
                state
            )));
        }

        let config = self.config();
        if let Some(end) = config.sim_end_time {
            self.schedule(
                Event::new(end, PRIO_LOWEST, EventAction::End)
                    .utility()
                    .with_description("end of horizon"),
            )?;
        }
        if let Some(reset) = config.stats_reset_time {
            self.schedule(
                Event::new(reset, PRIO_HIGHEST, EventAction::ResetStats)
                    .utility()
                    .with_description("stats reset"),
            )?;
        }

        self.broadcast(LifecycleEvent::SimStart)?;
        self.lock_state().exec = SimState::BeforeRun;
        Ok(())
    }

    /// Broadcast DONE after the run has ended
    pub fn done(&self) -> SimResult<()> {
        self.require_ended("done")?;
        self.broadcast(LifecycleEvent::Done)
    }

    /// Collect results from every component, plus the kernel's own entries.
    ///
    /// Entries gathered before a failing hook are kept in `results()`.
    pub fn produce_results(&self) -> SimResult<ResultMap> {
        self.require_ended("produce_results")?;
        let mut results = ResultMap::new();
        let root = self.root_component();
        let outcome = self.deliver(root, LifecycleEvent::ProduceResults, Some(&mut results), false);

        let mut st = self.lock_state();
        let aborted = st.failure.is_some() || outcome.is_err();
        results.add_result("simTime", st.sim_time);
        results.add_result(
            "runTime",
            st.run_duration.map_or(0.0, |d| d.as_secs_f64()),
        );
        results.add_result("eventsProcessed", st.events_processed);
        results.add_result("expAborted", if aborted { 1 } else { 0 });
        results.add_result("runId", self.kernel.id.to_string());
        st.results.merge(&results);
        drop(st);

        outcome?;
        Ok(results)
    }

    /// Results produced so far
    pub fn results(&self) -> ResultMap {
        self.lock_state().results.clone()
    }

    /// init, before_run, run, done and produce_results in one call.
    ///
    /// A run failure is returned after DONE and PRODUCE_RESULTS were broadcast.
    pub fn perform_run(&self) -> SimResult<ResultMap> {
        let run = self.run();
        if let Err(e) = &run {
            if !self.state().is_terminal() {
                return Err(e.clone());
            }
        }
        let done = self.done();
        let results = self.produce_results();
        run?;
        done?;
        let results = results?;
        info!(
            "Simulation '{}' produced {} results",
            self.name(),
            results.len()
        );
        Ok(results)
    }

    fn require_ended(&self, operation: &str) -> SimResult<()> {
        let state = self.state();
        if !state.is_terminal() {
            return Err(SimError::illegal_state(format!(
                "{} called in state {:?}",
                operation, state
            )));
        }
        Ok(())
    }

    // ---- Broadcasts ----

    pub(crate) fn broadcast(&self, event: LifecycleEvent) -> SimResult<()> {
        debug!("Broadcasting {} at t={}", event, self.sim_time());
        self.deliver(self.root_component(), event, None, false)
    }

    /// Run the hook for `event` on `key`, then on its children, depth-first.
    ///
    /// Children are read after the node's own hook ran, so components
    /// attached by that hook receive the same notification. `explicit` marks
    /// the node an activation was requested for.
    fn deliver(
        &self,
        key: ComponentKey,
        event: LifecycleEvent,
        mut results: Option<&mut ResultMap>,
        explicit: bool,
    ) -> SimResult<()> {
        let (name, skip) = {
            let tree = lock(&self.kernel.tree);
            let name = tree.hierarchical_name(key)?;
            let node = tree.node(key)?;
            let skip = match event {
                LifecycleEvent::Init if node.initialized => {
                    if explicit {
                        return Err(SimError::AlreadyInitialized(name));
                    }
                    true
                }
                LifecycleEvent::SimStart => node.started,
                _ => false,
            };
            (name, skip)
        };

        if !skip {
            let mut component = lock(&self.kernel.tree).take(key)?;
            let ctx = ComponentContext::new(self, key, name);
            let outcome = catch_failure(|| match event {
                LifecycleEvent::Init => component.init(&ctx),
                LifecycleEvent::SimStart => component.sim_start(&ctx),
                LifecycleEvent::ResetStats => component.reset_stats(&ctx),
                LifecycleEvent::SimEnd => component.sim_end(&ctx),
                LifecycleEvent::Done => component.done(&ctx),
                LifecycleEvent::ProduceResults => match results.as_deref_mut() {
                    Some(results) => component.produce_results(&ctx, results),
                    None => Ok(()),
                },
            });

            let mut tree = lock(&self.kernel.tree);
            if !tree.restore(key, component) {
                // detached by its own hook
                return outcome;
            }
            if let Ok(node) = tree.node_mut(key) {
                match event {
                    LifecycleEvent::Init => node.initialized = true,
                    LifecycleEvent::SimStart => node.started = true,
                    _ => {}
                }
            }
            drop(tree);
            outcome?;
        }

        let children = match lock(&self.kernel.tree).children(key) {
            Ok(children) => children,
            Err(_) => return Ok(()),
        };
        for child in children {
            if lock(&self.kernel.tree).node(child).is_err() {
                continue;
            }
            self.deliver(child, event, results.as_deref_mut(), false)?;
        }
        Ok(())
    }

    /// Bring a subtree up to the simulation's current lifecycle stage
    fn activate(&self, key: ComponentKey, explicit: bool) -> SimResult<()> {
        match self.state() {
            SimState::Init => self.deliver(key, LifecycleEvent::Init, None, explicit),
            SimState::BeforeRun | SimState::Running | SimState::Paused => {
                self.deliver(key, LifecycleEvent::Init, None, explicit)?;
                self.deliver(key, LifecycleEvent::SimStart, None, false)
            }
            _ => Ok(()),
        }
    }

    // ---- Component tree ----

    /// Key of the root container, named after the simulation
    pub fn root_component(&self) -> ComponentKey {
        lock(&self.kernel.tree).root()
    }

    /// Attach `component` under `parent`.
    ///
    /// Once the simulation is initialized, the new component immediately
    /// receives INIT, and SIM_START too if the run has started.
    pub fn attach<C: Component + 'static>(
        &self,
        parent: ComponentKey,
        name: &str,
        component: C,
    ) -> SimResult<ComponentKey> {
        let key = lock(&self.kernel.tree).insert(parent, name, Box::new(component))?;
        self.activate(key, false)?;
        Ok(key)
    }

    /// Attach `component` directly under the root
    pub fn add_component<C: Component + 'static>(
        &self,
        name: &str,
        component: C,
    ) -> SimResult<ComponentKey> {
        self.attach(self.root_component(), name, component)
    }

    /// Explicitly run INIT (and SIM_START once running) on a subtree.
    ///
    /// Fails with `AlreadyInitialized` if `key` itself was initialized.
    pub fn activate_component(&self, key: ComponentKey) -> SimResult<()> {
        match self.state() {
            SimState::Initial => self.deliver(key, LifecycleEvent::Init, None, true),
            _ => self.activate(key, true),
        }
    }

    /// Remove `key` and its subtree; returns the node's own component
    pub fn detach(&self, key: ComponentKey) -> SimResult<Option<Box<dyn Component>>> {
        let name = self.hierarchical_name(key)?;
        let removed = lock(&self.kernel.tree).remove(key)?;
        debug!("Detached component '{}'", name);
        Ok(removed)
    }

    /// Resolve a hierarchical name (`shop.line.m1`) or a path relative to the root (`line.m1`)
    pub fn component_by_name(&self, path: &str) -> Option<ComponentKey> {
        lock(&self.kernel.tree).find(path)
    }

    pub fn hierarchical_name(&self, key: ComponentKey) -> SimResult<String> {
        lock(&self.kernel.tree).hierarchical_name(key)
    }

    pub fn children(&self, key: ComponentKey) -> SimResult<Vec<ComponentKey>> {
        lock(&self.kernel.tree).children(key)
    }

    pub fn num_components(&self) -> usize {
        lock(&self.kernel.tree).len()
    }

    /// Run `f` on the component at `key`, downcast to `T`.
    ///
    /// The tree stays locked while `f` runs; `f` must not call back into
    /// the component tree.
    pub fn with_component<T: Component + 'static, R>(
        &self,
        key: ComponentKey,
        f: impl FnOnce(&mut T) -> R,
    ) -> SimResult<R> {
        let mut tree = lock(&self.kernel.tree);
        let name = tree.hierarchical_name(key)?;
        let node = tree.node_mut(key)?;
        let component = node
            .component
            .as_mut()
            .ok_or(SimError::ComponentBusy(name))?;
        let typed = (**component)
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or(SimError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                found: "another component type",
            })?;
        Ok(f(typed))
    }

    // ---- Component values ----

    pub fn put_value<T: Send + Sync + Clone + 'static>(
        &self,
        key: ComponentKey,
        name: &str,
        value: T,
    ) -> SimResult<()> {
        lock(&self.kernel.tree).node_mut(key)?.values.put(name, value);
        Ok(())
    }

    pub fn get_value<T: Clone + 'static>(&self, key: ComponentKey, name: &str) -> SimResult<Option<T>> {
        lock(&self.kernel.tree).node(key)?.values.get(name)
    }

    pub fn remove_value(&self, key: ComponentKey, name: &str) -> SimResult<Option<TypedValue>> {
        Ok(lock(&self.kernel.tree).node_mut(key)?.values.remove(name))
    }

    pub fn value_keys(&self, key: ComponentKey) -> SimResult<Vec<String>> {
        Ok(lock(&self.kernel.tree).node(key)?.values.keys())
    }
}
