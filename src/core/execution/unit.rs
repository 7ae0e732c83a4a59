use log::warn;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Lock a kernel mutex. Critical sections never run user code, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Identity of an execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub(crate) u64);

impl UnitId {
    /// The unit of the thread that called `Simulation::run`
    pub const ROOT: UnitId = UnitId(0);
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

pub(crate) type UnitJob = Box<dyn FnOnce(Arc<ExecutionUnit>) + Send>;

/// What a parked unit is woken with
pub(crate) enum Signal {
    /// Run a process body from the start
    Start(UnitJob),
    /// You own the event loop now
    Resume,
    /// The simulation is terminating; unwind the process body
    Unwind,
    /// Leave the worker loop
    Shutdown,
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Start(_) => write!(f, "Start"),
            Signal::Resume => write!(f, "Resume"),
            Signal::Unwind => write!(f, "Unwind"),
            Signal::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A native thread able to park until another unit hands it a signal.
///
/// The pending slot doubles as the "signal pending" flag: a signal posted
/// before the unit parks is kept, and a spurious condvar wakeup finds the
/// slot empty and parks again.
pub(crate) struct ExecutionUnit {
    id: UnitId,
    pending: Mutex<Option<Signal>>,
    ready: Condvar,
}

impl ExecutionUnit {
    pub(crate) fn new(id: UnitId) -> Arc<Self> {
        Arc::new(Self {
            id,
            pending: Mutex::new(None),
            ready: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> UnitId {
        self.id
    }

    /// Hand `signal` to this unit, waking it if parked
    pub(crate) fn post(&self, signal: Signal) {
        let mut pending = lock(&self.pending);
        if let Some(previous) = pending.as_ref() {
            warn!(
                "{} already had {:?} pending when {:?} was posted",
                self.id, previous, signal
            );
        }
        *pending = Some(signal);
        self.ready.notify_one();
    }

    /// Block the calling thread until a signal is posted
    pub(crate) fn park(&self) -> Signal {
        let mut pending = lock(&self.pending);
        loop {
            if let Some(signal) = pending.take() {
                return signal;
            }
            pending = self
                .ready
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_signal_posted_before_park_is_kept() {
        let unit = ExecutionUnit::new(UnitId(7));
        unit.post(Signal::Resume);
        assert!(matches!(unit.park(), Signal::Resume));
    }

    #[test]
    fn test_handoff_between_threads() {
        let a = ExecutionUnit::new(UnitId(1));
        let b = ExecutionUnit::new(UnitId(2));
        let (a2, b2) = (a.clone(), b.clone());

        let worker = thread::spawn(move || {
            let mut rounds = 0;
            loop {
                match b2.park() {
                    Signal::Resume => {
                        rounds += 1;
                        a2.post(Signal::Resume);
                    }
                    Signal::Shutdown => return rounds,
                    other => panic!("unexpected {:?}", other),
                }
            }
        });

        for _ in 0..100 {
            b.post(Signal::Resume);
            assert!(matches!(a.park(), Signal::Resume));
        }
        b.post(Signal::Shutdown);
        assert_eq!(worker.join().unwrap(), 100);
    }
}
