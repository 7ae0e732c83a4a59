// Tests for the component tree and lifecycle broadcasts
#[cfg(test)]
mod tests {
    use crate::core::components::{Component, ComponentContext, Container};
    use crate::core::error::{SimError, SimResult};
    use crate::core::execution::{Simulation, SimulationConfig};
    use crate::core::results::{ResultMap, ResultValue};
    use crate::core::types::{SimState, PRIO_DEFAULT};
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Records every hook it receives as `name:HOOK`
    struct Recorder {
        log: Log,
        container: bool,
        jobs: i64,
    }

    impl Recorder {
        fn leaf(log: &Log) -> Self {
            Self {
                log: log.clone(),
                container: false,
                jobs: 0,
            }
        }

        fn group(log: &Log) -> Self {
            Self {
                container: true,
                ..Self::leaf(log)
            }
        }

        fn note(&self, ctx: &ComponentContext<'_>, hook: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", ctx.hierarchical_name(), hook));
        }
    }

    impl Component for Recorder {
        fn init(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            self.note(ctx, "INIT");
            Ok(())
        }

        fn sim_start(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            self.note(ctx, "SIM_START");
            Ok(())
        }

        fn reset_stats(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            self.jobs = 0;
            self.note(ctx, "RESET_STATS");
            Ok(())
        }

        fn sim_end(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            self.note(ctx, "SIM_END");
            Ok(())
        }

        fn done(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            self.note(ctx, "DONE");
            Ok(())
        }

        fn produce_results(&mut self, ctx: &ComponentContext<'_>, results: &mut ResultMap) -> SimResult<()> {
            results.add_result(format!("{}.jobs", ctx.hierarchical_name()), self.jobs);
            Ok(())
        }

        fn is_container(&self) -> bool {
            self.container
        }
    }

    fn entries(log: &Log, hook: &str) -> Vec<String> {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| e.ends_with(hook))
            .cloned()
            .collect()
    }

    #[test]
    fn test_broadcasts_are_depth_first_in_attach_order() {
        let log = new_log();
        let sim = Simulation::new(SimulationConfig::new().with_name("plant"));
        let shop = sim.add_component("shop", Recorder::group(&log)).unwrap();
        sim.attach(shop, "m1", Recorder::leaf(&log)).unwrap();
        sim.attach(shop, "m2", Recorder::leaf(&log)).unwrap();
        sim.add_component("sink", Recorder::leaf(&log)).unwrap();

        sim.perform_run().unwrap();
        assert_eq!(
            entries(&log, ":INIT"),
            vec!["plant.shop:INIT", "plant.shop.m1:INIT", "plant.shop.m2:INIT", "plant.sink:INIT"]
        );
        let hooks: Vec<String> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with("plant.shop.m1"))
            .cloned()
            .collect();
        assert_eq!(
            hooks,
            vec![
                "plant.shop.m1:INIT",
                "plant.shop.m1:SIM_START",
                "plant.shop.m1:SIM_END",
                "plant.shop.m1:DONE"
            ]
        );
    }

    #[test]
    fn test_lookup_and_names() {
        let log = new_log();
        let sim = Simulation::new(SimulationConfig::new().with_name("plant"));
        let shop = sim.add_component("shop", Recorder::group(&log)).unwrap();
        let m1 = sim.attach(shop, "m1", Recorder::leaf(&log)).unwrap();

        assert_eq!(sim.component_by_name("shop.m1"), Some(m1));
        assert_eq!(sim.component_by_name(""), Some(sim.root_component()));
        assert_eq!(sim.component_by_name("shop.m9"), None);
        assert_eq!(sim.hierarchical_name(m1).unwrap(), "plant.shop.m1");
        assert_eq!(sim.children(shop).unwrap(), vec![m1]);
        assert_eq!(sim.num_components(), 3);
    }

    #[test]
    fn test_hierarchical_names_resolve_back_to_components() {
        let log = new_log();
        let sim = Simulation::new(SimulationConfig::new().with_name("shop"));
        let line = sim.add_component("line", Recorder::group(&log)).unwrap();
        let m1 = sim.attach(line, "m1", Recorder::leaf(&log)).unwrap();
        let root = sim.root_component();

        for key in [root, line, m1] {
            let name = sim.hierarchical_name(key).unwrap();
            assert_eq!(sim.component_by_name(&name), Some(key), "lookup of {}", name);
        }
        assert_eq!(sim.hierarchical_name(m1).unwrap(), "shop.line.m1");
        // relative paths keep working
        assert_eq!(sim.component_by_name("line.m1"), Some(m1));
        assert_eq!(sim.component_by_name("shop.line.m9"), None);
    }

    #[test]
    fn test_attach_errors() {
        let log = new_log();
        let sim = Simulation::default();
        let leaf = sim.add_component("leaf", Recorder::leaf(&log)).unwrap();

        assert!(matches!(
            sim.add_component("leaf", Recorder::leaf(&log)),
            Err(SimError::DuplicateName { .. })
        ));
        assert!(matches!(
            sim.attach(leaf, "child", Recorder::leaf(&log)),
            Err(SimError::NotAContainer(_))
        ));
        assert!(sim.add_component("a.b", Container).is_err());
    }

    #[test]
    fn test_attach_during_run_is_activated() {
        let log = new_log();
        let sim = Simulation::default();
        let l = log.clone();
        sim.schedule_at(5.0, PRIO_DEFAULT, move |sim| {
            sim.add_component("late", Recorder::leaf(&l))?;
            Ok(())
        })
        .unwrap();

        sim.run().unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["sim.late:INIT", "sim.late:SIM_START", "sim.late:SIM_END"]
        );
    }

    #[test]
    fn test_activate_twice_fails() {
        let log = new_log();
        let sim = Simulation::default();
        let key = sim.add_component("m", Recorder::leaf(&log)).unwrap();
        sim.init().unwrap();
        assert_eq!(sim.state(), SimState::Init);
        assert_eq!(
            sim.activate_component(key),
            Err(SimError::AlreadyInitialized("sim.m".to_string()))
        );
        assert!(matches!(sim.init(), Err(SimError::IllegalState(_))));
    }

    /// Attaches a child from its own INIT hook
    struct Spawner {
        log: Log,
    }

    impl Component for Spawner {
        fn init(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            ctx.sim().attach(ctx.key(), "child", Recorder::leaf(&self.log))?;
            Ok(())
        }

        fn is_container(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_children_attached_by_hook_get_same_broadcast() {
        let log = new_log();
        let sim = Simulation::default();
        sim.add_component("parent", Spawner { log: log.clone() }).unwrap();
        sim.init().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["sim.parent.child:INIT"]);

        // attached after init: activated once, not again by the recursion
        let later = new_log();
        sim.add_component("second", Spawner { log: later.clone() }).unwrap();
        assert_eq!(*later.lock().unwrap(), vec!["sim.second.child:INIT"]);
    }

    /// Tries to reach itself through the tree while its hook runs
    struct SelfInspector {
        result: Arc<Mutex<Option<SimError>>>,
    }

    impl Component for SelfInspector {
        fn init(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
            let outcome = ctx.sim().with_component::<SelfInspector, _>(ctx.key(), |_| ());
            *self.result.lock().unwrap() = outcome.err();
            Ok(())
        }
    }

    #[test]
    fn test_component_is_busy_during_its_hook() {
        let result = Arc::new(Mutex::new(None));
        let sim = Simulation::default();
        sim.add_component("me", SelfInspector { result: result.clone() })
            .unwrap();
        sim.init().unwrap();
        assert_eq!(
            *result.lock().unwrap(),
            Some(SimError::ComponentBusy("sim.me".to_string()))
        );
    }

    #[test]
    fn test_with_component_downcasts() {
        let log = new_log();
        let sim = Simulation::default();
        let key = sim.add_component("m", Recorder::leaf(&log)).unwrap();

        sim.with_component::<Recorder, _>(key, |r| r.jobs = 9).unwrap();
        assert_eq!(sim.with_component::<Recorder, _>(key, |r| r.jobs).unwrap(), 9);
        assert!(matches!(
            sim.with_component::<Container, _>(key, |_| ()),
            Err(SimError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_detach_drops_subtree() {
        let log = new_log();
        let sim = Simulation::default();
        let shop = sim.add_component("shop", Recorder::group(&log)).unwrap();
        let m1 = sim.attach(shop, "m1", Recorder::leaf(&log)).unwrap();

        let detached = sim.detach(shop).unwrap();
        assert!(detached.is_some());
        assert_eq!(sim.component_by_name("shop"), None);
        assert!(matches!(sim.hierarchical_name(m1), Err(SimError::ComponentNotFound(_))));
        assert!(sim.detach(sim.root_component()).is_err());
    }

    #[test]
    fn test_component_values() {
        let log = new_log();
        let sim = Simulation::default();
        let key = sim.add_component("m", Recorder::leaf(&log)).unwrap();

        sim.put_value(key, "capacity", 3u32).unwrap();
        sim.put_value(key, "label", "lathe".to_string()).unwrap();
        assert_eq!(sim.get_value::<u32>(key, "capacity").unwrap(), Some(3));
        assert_eq!(sim.get_value::<u32>(key, "missing").unwrap(), None);
        assert!(matches!(
            sim.get_value::<String>(key, "capacity"),
            Err(SimError::TypeMismatch { .. })
        ));
        assert_eq!(sim.value_keys(key).unwrap(), vec!["capacity", "label"]);
        assert!(sim.remove_value(key, "label").unwrap().is_some());
        assert_eq!(sim.value_keys(key).unwrap(), vec!["capacity"]);
    }

    #[test]
    fn test_results_and_stats_reset() {
        let log = new_log();
        let sim = Simulation::new(SimulationConfig::new().with_stats_reset_time(10.0));
        let key = sim.add_component("m", Recorder::leaf(&log)).unwrap();
        sim.schedule_at(5.0, PRIO_DEFAULT, move |sim| {
            sim.with_component::<Recorder, _>(key, |r| r.jobs += 4)
        })
        .unwrap();
        sim.schedule_at(20.0, PRIO_DEFAULT, move |sim| {
            sim.with_component::<Recorder, _>(key, |r| r.jobs += 1)
        })
        .unwrap();

        let results = sim.perform_run().unwrap();
        assert_eq!(entries(&log, "RESET_STATS"), vec!["sim.m:RESET_STATS"]);
        assert_eq!(results.get("sim.m.jobs"), Some(&ResultValue::Int(1)));
        assert_eq!(results.get("simTime"), Some(&ResultValue::Float(20.0)));
        assert_eq!(results.get("expAborted"), Some(&ResultValue::Int(0)));
        assert_eq!(results.get("eventsProcessed").and_then(|v| v.as_f64()), Some(4.0));
        assert_eq!(
            results.get("runId").and_then(|v| v.as_str()),
            Some(sim.id().to_string().as_str())
        );
        assert!(results.contains("runTime"));
        assert_eq!(sim.results(), results);
    }

    /// Fails while producing results
    struct BrokenReporter;

    impl Component for BrokenReporter {
        fn produce_results(&mut self, _ctx: &ComponentContext<'_>, _results: &mut ResultMap) -> SimResult<()> {
            Err(SimError::failure("no data"))
        }
    }

    #[test]
    fn test_partial_results_survive_failures() {
        let log = new_log();
        let sim = Simulation::default();
        sim.add_component("ok", Recorder::leaf(&log)).unwrap();
        sim.add_component("broken", BrokenReporter).unwrap();

        assert_eq!(sim.perform_run().unwrap_err(), SimError::failure("no data"));
        let partial = sim.results();
        assert!(partial.contains("sim.ok.jobs"));
        assert_eq!(partial.get("expAborted"), Some(&ResultValue::Int(1)));
    }

    #[test]
    fn test_lifecycle_calls_need_finished_run() {
        let sim = Simulation::default();
        assert!(matches!(sim.done(), Err(SimError::IllegalState(_))));
        assert!(matches!(sim.produce_results(), Err(SimError::IllegalState(_))));
    }
}
