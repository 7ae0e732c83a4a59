use std::any::Any;

use super::context::ComponentContext;
use crate::core::error::SimResult;
use crate::core::results::ResultMap;

/// Access to the concrete type behind a `dyn Component`
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A participant in the component tree.
///
/// Every hook has an empty default, so components only override the
/// lifecycle stages they care about. Hooks run without any kernel lock held:
/// they may schedule events, spawn processes and attach further components.
pub trait Component: AsAny + Send {
    /// Called once when the tree is initialized or when attached to a live tree
    fn init(&mut self, _ctx: &ComponentContext<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Called before the run loop starts; the usual place to schedule first events
    fn sim_start(&mut self, _ctx: &ComponentContext<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Called when statistics should be reset (end of a warm-up period)
    fn reset_stats(&mut self, _ctx: &ComponentContext<'_>) -> SimResult<()> {
        Ok(())
    }

    fn sim_end(&mut self, _ctx: &ComponentContext<'_>) -> SimResult<()> {
        Ok(())
    }

    fn done(&mut self, _ctx: &ComponentContext<'_>) -> SimResult<()> {
        Ok(())
    }

    fn produce_results(&mut self, _ctx: &ComponentContext<'_>, _results: &mut ResultMap) -> SimResult<()> {
        Ok(())
    }

    /// Whether children may be attached below this component
    fn is_container(&self) -> bool {
        false
    }
}

/// A component that only groups children
#[derive(Debug, Default)]
pub struct Container;

impl Component for Container {
    fn is_container(&self) -> bool {
        true
    }
}
