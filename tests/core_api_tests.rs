use simkern::{
    Component, ComponentContext, Process, ProcessState, ResultMap, ResultValue, SimError,
    SimResult, SimState, Simulation, SimulationConfig, PRIO_DEFAULT,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test component: a machine counting the jobs it finished
struct Machine {
    service_time: f64,
    finished: i64,
}

impl Component for Machine {
    fn sim_start(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
        let key = ctx.key();
        let service = self.service_time;
        // three jobs, each served as its own process
        for job in 0..3 {
            ctx.sim().spawn(format!("job{}", job), move |p| {
                p.wait_for(job as f64 * service)?;
                p.sim()
                    .with_component::<Machine, _>(key, |m| m.finished += 1)
            })?;
        }
        Ok(())
    }

    fn produce_results(&mut self, ctx: &ComponentContext<'_>, results: &mut ResultMap) -> SimResult<()> {
        results.add_result(format!("{}.finished", ctx.hierarchical_name()), self.finished);
        Ok(())
    }
}

#[test]
fn test_fifo_tie_break() {
    init_logging();
    let sim = Simulation::default();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["A", "B"] {
        let order = order.clone();
        sim.schedule_at(5.0, 0, move |_| {
            order.lock().unwrap().push(name);
            Ok(())
        })
        .unwrap();
    }

    sim.run().unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["A", "B"]);
}

#[test]
fn test_waits_resume_at_fifteen_despite_interleaving_events() {
    let sim = Simulation::default();
    for t in 0..30 {
        sim.schedule_at(t as f64 * 0.5, PRIO_DEFAULT, |_| Ok(())).unwrap();
    }
    let p = sim
        .spawn("worker", |ctx| {
            let start = ctx.sim_time();
            ctx.wait_for(10.0)?;
            ctx.wait_for(5.0)?;
            Ok(ctx.sim_time() - start)
        })
        .unwrap();

    sim.run().unwrap();
    assert_eq!(p.get().unwrap(), 15.0);
}

#[test]
fn test_awake_at_observed_running_at_t() {
    let sim = Simulation::default();
    let slot: Arc<Mutex<Option<Process<()>>>> = Arc::new(Mutex::new(None));
    let observed = Arc::new(Mutex::new(Vec::new()));

    let (s, o) = (slot.clone(), observed.clone());
    let p = sim.process("p", move |ctx| {
        let me = s.lock().unwrap().clone().unwrap();
        o.lock().unwrap().push((ctx.sim_time(), me.state()));
        Ok(())
    });
    *slot.lock().unwrap() = Some(p.clone());

    // sample the state before t
    let watched = p.clone();
    let o = observed.clone();
    sim.schedule_at(9.0, PRIO_DEFAULT, move |sim| {
        o.lock().unwrap().push((sim.sim_time(), watched.state()));
        Ok(())
    })
    .unwrap();

    assert_eq!(p.state(), ProcessState::Passive);
    p.awake_at(12.5).unwrap();

    sim.run().unwrap();
    assert_eq!(
        *observed.lock().unwrap(),
        vec![(9.0, ProcessState::Scheduled), (12.5, ProcessState::Running)]
    );
    assert_eq!(p.state(), ProcessState::Terminated);
}

#[test]
fn test_event_in_past_never_clamps() {
    let sim = Simulation::new(SimulationConfig::new().with_initial_time(3.0));
    let err = sim.schedule_in(-0.5, PRIO_DEFAULT, |_| Ok(())).unwrap_err();
    assert_eq!(err, SimError::EventInPast { time: 2.5, now: 3.0 });
    assert!(sim.pending_events().is_empty());
}

#[test]
fn test_cancel_prevents_body() {
    let sim = Simulation::default();
    let ran = Arc::new(Mutex::new(false));
    let r = ran.clone();
    let p = sim.process("cancelled", move |_| {
        *r.lock().unwrap() = true;
        Ok(())
    });
    p.awake_at(10.0).unwrap();
    let handle = p.clone();
    sim.schedule_at(4.0, PRIO_DEFAULT, move |_| handle.cancel()).unwrap();

    sim.run().unwrap();
    assert!(!*ran.lock().unwrap());
    assert_eq!(p.state(), ProcessState::Passive);
}

#[test]
fn test_failed_process_reraises_to_every_caller() {
    let sim = Simulation::default();
    let p: Process<u32> = sim
        .spawn("faulty", |ctx| {
            ctx.wait_for(1.0)?;
            Err(SimError::failure("spindle jammed"))
        })
        .unwrap();

    let err = sim.run().unwrap_err();
    assert_eq!(err.root_cause(), &SimError::failure("spindle jammed"));
    assert_eq!(p.state(), ProcessState::Error);
    assert_eq!(p.get().unwrap_err(), SimError::failure("spindle jammed"));
    assert_eq!(p.get().unwrap_err(), SimError::failure("spindle jammed"));
}

#[test]
fn test_pause_k_times_needs_k_unpauses() {
    let sim = Simulation::default();
    sim.schedule_at(1.0, PRIO_DEFAULT, |_| Ok(())).unwrap();
    let k = 3;
    for _ in 0..k {
        sim.pause();
    }

    let runner = {
        let sim = sim.clone();
        thread::spawn(move || sim.run())
    };
    for _ in 0..500 {
        if sim.state() == SimState::Paused {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    for _ in 0..k - 1 {
        sim.unpause().unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sim.state(), SimState::Paused);
        assert_eq!(sim.sim_time(), 0.0);
    }
    sim.unpause().unwrap();
    runner.join().unwrap().unwrap();
    assert_eq!(sim.sim_time(), 1.0);
}

#[test]
fn test_perform_run_with_components() {
    init_logging();
    let sim = Simulation::new(SimulationConfig::new().with_name("shop"));
    sim.add_component(
        "m1",
        Machine {
            service_time: 4.0,
            finished: 0,
        },
    )
    .unwrap();

    let results = sim.perform_run().unwrap();
    assert_eq!(results.get("shop.m1.finished"), Some(&ResultValue::Int(3)));
    assert_eq!(results.get("simTime"), Some(&ResultValue::Float(8.0)));
    assert_eq!(results.get("expAborted"), Some(&ResultValue::Int(0)));
    assert_eq!(sim.state(), SimState::Finished);

    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json["shop.m1.finished"], 3);
}

#[test]
fn test_time_conversion_for_presentation() {
    let config = SimulationConfig::new().with_time_mapping(
        UNIX_EPOCH + Duration::from_secs(3600),
        Duration::from_secs(60),
    );
    let sim = Simulation::new(config);
    let instant = sim.sim_time_to_instant(90.0);
    assert_eq!(instant, UNIX_EPOCH + Duration::from_secs(3600 + 90 * 60));
    assert_eq!(sim.instant_to_sim_time(instant), 90.0);
}
