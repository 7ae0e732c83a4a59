use crate::core::error::SimResult;
use crate::core::execution::Simulation;
use crate::core::observer::MsgCategory;
use crate::core::types::{ComponentKey, SimTime};

/// What a component sees while one of its lifecycle hooks runs
pub struct ComponentContext<'a> {
    sim: &'a Simulation,
    key: ComponentKey,
    name: String,
}

impl<'a> ComponentContext<'a> {
    pub(crate) fn new(sim: &'a Simulation, key: ComponentKey, name: String) -> Self {
        Self { sim, key, name }
    }

    pub fn sim(&self) -> &'a Simulation {
        self.sim
    }

    pub fn key(&self) -> ComponentKey {
        self.key
    }

    /// Dotted path from the root, e.g. `sim.shop.m1`
    pub fn hierarchical_name(&self) -> &str {
        &self.name
    }

    pub fn sim_time(&self) -> SimTime {
        self.sim.sim_time()
    }

    pub fn put_value<T: Send + Sync + Clone + 'static>(&self, name: &str, value: T) -> SimResult<()> {
        self.sim.put_value(self.key, name, value)
    }

    pub fn get_value<T: Clone + 'static>(&self, name: &str) -> SimResult<Option<T>> {
        self.sim.get_value(self.key, name)
    }

    /// Print on the simulation channel, prefixed with this component's name
    pub fn print(&self, category: MsgCategory, message: impl std::fmt::Display) {
        self.sim
            .print_with(category, || format!("{}: {}", self.name, message));
    }
}
