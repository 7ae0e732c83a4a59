use log::{debug, trace, warn};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use super::unit::{lock, ExecutionUnit, Signal, UnitId};
use crate::core::error::{SimError, SimResult};

/// Counters describing the execution unit pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Threads created so far
    pub created: usize,
    /// Threads parked in the pool, ready to be leased
    pub idle: usize,
    /// Threads currently backing a process or driving the run loop
    pub leased: usize,
}

struct PoolInner {
    idle: Vec<Arc<ExecutionUnit>>,
    handles: Vec<JoinHandle<()>>,
    created: usize,
    leased: usize,
    next_id: u64,
}

struct PoolShared {
    inner: Mutex<PoolInner>,
    returned: Condvar,
    name_prefix: String,
    stack_size: Option<usize>,
}

impl PoolShared {
    fn release(&self, unit: Arc<ExecutionUnit>) {
        let mut inner = lock(&self.inner);
        inner.leased = inner.leased.saturating_sub(1);
        inner.idle.push(unit);
        self.returned.notify_all();
    }
}

/// Lazily grown set of reusable threads backing processes
pub(crate) struct ExecutionPool {
    shared: Arc<PoolShared>,
}

impl ExecutionPool {
    pub(crate) fn new(name_prefix: &str, stack_size: Option<usize>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner {
                    idle: Vec::new(),
                    handles: Vec::new(),
                    created: 0,
                    leased: 0,
                    next_id: 1,
                }),
                returned: Condvar::new(),
                name_prefix: name_prefix.to_string(),
                stack_size,
            }),
        }
    }

    /// Take an idle unit, creating a new thread when none is available
    pub(crate) fn lease(&self) -> SimResult<Arc<ExecutionUnit>> {
        let mut inner = lock(&self.shared.inner);
        if let Some(unit) = inner.idle.pop() {
            inner.leased += 1;
            trace!("Leased idle {}", unit.id());
            return Ok(unit);
        }

        let unit = ExecutionUnit::new(UnitId(inner.next_id));
        let mut builder =
            thread::Builder::new().name(format!("{}-{}", self.shared.name_prefix, inner.next_id));
        if let Some(size) = self.shared.stack_size {
            builder = builder.stack_size(size);
        }
        let worker_unit = unit.clone();
        let pool = Arc::downgrade(&self.shared);
        let handle = builder
            .spawn(move || worker_loop(worker_unit, pool))
            .map_err(|e| SimError::ThreadSpawn(e.to_string()))?;

        inner.next_id += 1;
        inner.handles.push(handle);
        inner.created += 1;
        inner.leased += 1;
        debug!("Created {} (pool size {})", unit.id(), inner.created);
        Ok(unit)
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let inner = lock(&self.shared.inner);
        PoolStats {
            created: inner.created,
            idle: inner.idle.len(),
            leased: inner.leased,
        }
    }

    /// Wait until every leased unit is back, then stop and join all threads
    pub(crate) fn shutdown(&self) {
        let handles = {
            let mut inner = lock(&self.shared.inner);
            while inner.leased > 0 {
                inner = self
                    .shared
                    .returned
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            for unit in inner.idle.drain(..) {
                unit.post(Signal::Shutdown);
            }
            std::mem::take(&mut inner.handles)
        };
        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Execution unit thread ended with a panic");
            }
        }
        if count > 0 {
            debug!("Pool shut down, joined {} threads", count);
        }
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        // No join here: the last handle may be dropped on a pool thread.
        let mut inner = lock(&self.shared.inner);
        for unit in inner.idle.drain(..) {
            unit.post(Signal::Shutdown);
        }
    }
}

fn worker_loop(unit: Arc<ExecutionUnit>, pool: Weak<PoolShared>) {
    loop {
        match unit.park() {
            Signal::Start(job) => {
                job(unit.clone());
                match pool.upgrade() {
                    Some(pool) => pool.release(unit.clone()),
                    None => break,
                }
            }
            Signal::Shutdown => break,
            other => warn!("{} woken with {:?} while idle", unit.id(), other),
        }
    }
    trace!("{} exiting", unit.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_units_are_reused() {
        let pool = ExecutionPool::new("test-unit", None);
        let (tx, rx) = mpsc::channel();

        for round in 0..3 {
            let unit = pool.lease().unwrap();
            let tx = tx.clone();
            unit.post(Signal::Start(Box::new(move |u| {
                tx.send((round, u.id())).unwrap();
            })));
            let (got, _) = rx.recv().unwrap();
            assert_eq!(got, round);
            // wait for the unit to come back before leasing again
            pool.shutdown_wait_for_test();
        }

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.leased, 0);
        pool.shutdown();
        assert_eq!(pool.stats().idle, 0);
    }

    impl ExecutionPool {
        fn shutdown_wait_for_test(&self) {
            let mut inner = lock(&self.shared.inner);
            while inner.leased > 0 {
                inner = self.shared.returned.wait(inner).unwrap();
            }
        }
    }
}
