//! A single machine fed by random arrivals.
//!
//! Usage: `single_machine [seed] [jobs]`. Set `RUST_LOG=debug` to watch the kernel.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use simkern::{
    Component, ComponentContext, MsgCategory, Process, ProcessState, ResultMap, SimResult,
    SimTime, Simulation, SimulationConfig,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const MEAN_INTER_ARRIVAL: f64 = 5.0;
const MEAN_SERVICE: f64 = 4.0;
const WARM_UP: SimTime = 60.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Stats {
    served: i64,
    total_wait: f64,
    busy: f64,
    since: SimTime,
}

/// State shared between the source, the server process and the machine component
#[derive(Default)]
struct Shop {
    queue: Mutex<VecDeque<SimTime>>,
    server: Mutex<Option<Process<()>>>,
    stats: Mutex<Stats>,
}

impl Shop {
    /// Queue a job arriving now and wake the server if it is idle
    fn arrive(&self, now: SimTime) -> SimResult<()> {
        lock(&self.queue).push_back(now);
        if let Some(server) = lock(&self.server).as_ref() {
            if server.state() == ProcessState::Passive {
                server.resume()?;
            }
        }
        Ok(())
    }
}

struct Machine {
    shop: Arc<Shop>,
    service: Exp<f64>,
    seed: u64,
}

impl Component for Machine {
    fn sim_start(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
        let shop = self.shop.clone();
        let service_time = self.service;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let server = ctx.sim().process("server", move |p| loop {
            let next = lock(&shop.queue).pop_front();
            match next {
                None => p.suspend()?,
                Some(arrived) => {
                    let start = p.sim_time();
                    let service = service_time.sample(&mut rng);
                    p.wait_for(service)?;
                    let mut stats = lock(&shop.stats);
                    stats.served += 1;
                    stats.total_wait += start - arrived;
                    stats.busy += service;
                }
            }
        });
        server.set_owner(ctx.key());
        *lock(&self.shop.server) = Some(server);
        Ok(())
    }

    fn reset_stats(&mut self, ctx: &ComponentContext<'_>) -> SimResult<()> {
        ctx.print(MsgCategory::Info, "warm-up over, statistics reset");
        *lock(&self.shop.stats) = Stats {
            since: ctx.sim_time(),
            ..Stats::default()
        };
        Ok(())
    }

    fn produce_results(&mut self, ctx: &ComponentContext<'_>, results: &mut ResultMap) -> SimResult<()> {
        let stats = lock(&self.shop.stats);
        let name = ctx.hierarchical_name();
        let observed = ctx.sim_time() - stats.since;
        results.add_result(format!("{}.served", name), stats.served);
        if stats.served > 0 {
            results.add_result(format!("{}.meanWait", name), stats.total_wait / stats.served as f64);
        }
        if observed > 0.0 {
            results.add_result(format!("{}.utilization", name), stats.busy / observed);
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env().init();

    let mut args = std::env::args().skip(1);
    let seed: u64 = args.next().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(42);
    let jobs: usize = args.next().map(|s| s.parse::<usize>()).transpose()?.unwrap_or(200);

    println!("Starting single machine simulation (seed {}, {} jobs)", seed, jobs);

    let config = SimulationConfig::new()
        .with_name("shop")
        .with_stats_reset_time(WARM_UP);
    let sim = Simulation::new(config);
    let shop = Arc::new(Shop::default());
    sim.add_component(
        "machine",
        Machine {
            shop: shop.clone(),
            service: Exp::new(1.0 / MEAN_SERVICE)?,
            seed: seed.wrapping_add(1),
        },
    )?;

    let arrivals = Exp::new(1.0 / MEAN_INTER_ARRIVAL)?;
    sim.set_main(move |ctx| {
        let source_shop = shop.clone();
        let source = ctx.sim().spawn("source", move |p| {
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..jobs {
                p.wait_for(arrivals.sample(&mut rng))?;
                source_shop.arrive(p.sim_time())?;
            }
            Ok(p.sim_time())
        })?;

        ctx.join(&source)?;
        let last = source.get()?;
        ctx.sim()
            .print(MsgCategory::Info, format!("last job arrived at {:.2}", last));
        Ok(())
    });

    let results = sim.perform_run()?;

    println!("\nResults:");
    for (name, value) in results.iter() {
        println!("  {:<24} {}", name, value);
    }
    if let Some(machine) = sim.component_by_name("machine") {
        println!("\nComponent: {}", sim.hierarchical_name(machine)?);
    }
    Ok(())
}
