//! Bounded executor: a fixed worker pool with a hard cap on outstanding tasks.
//!
//! [`BoundedExecutor::try_submit`] reserves a slot with a compare-and-swap on the outstanding
//! counter and fails with [`ExecutorError::CapacityExceeded`] when all `max_tasks` slots are
//! taken. [`BoundedExecutor::submit`] blocks instead: workers signal a condvar each time a slot
//! is released, and the submitter retries admission when woken, until the admission timeout
//! elapses. Admitted tasks go over a bounded crossbeam channel to `max_tasks` long-lived
//! workers, so the channel never holds more than the cap and a send never blocks.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::utils::config::ExecutorDefaults;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Why a task was not admitted, or the executor did not drain.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// All slots are taken. Transient; `submit` waits for a slot instead of returning this.
    #[error("executor at capacity ({0} tasks outstanding)")]
    CapacityExceeded(usize),

    /// `submit` kept hitting capacity for longer than the admission timeout.
    #[error("no executor slot freed up within {0:?}")]
    AdmissionTimedOut(Duration),

    /// `wait_idle` gave up with tasks still running after the admission timeout.
    #[error("{in_flight} tasks still running after {waited:?}")]
    DrainTimedOut { in_flight: usize, waited: Duration },

    /// The executor has been shut down.
    #[error("executor is shut down")]
    ShutDown,
}

/// Executor sizing and admission timing.
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Hard cap on outstanding (admitted, not yet completed) tasks. Also the worker count.
    pub max_tasks: usize,
    /// Longest single wait for a released slot before admission is re-checked.
    pub admission_backoff: Duration,
    /// Stop retrying admission after this long. `None` retries forever.
    pub admission_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_tasks: ExecutorDefaults::MAX_TASKS,
            admission_backoff: ExecutorDefaults::ADMISSION_BACKOFF,
            admission_timeout: Some(ExecutorDefaults::ADMISSION_TIMEOUT),
        }
    }
}

impl From<&crate::Opts> for ExecutorConfig {
    fn from(opts: &crate::Opts) -> Self {
        Self {
            max_tasks: opts.max_tasks,
            admission_backoff: opts.admission_backoff,
            admission_timeout: opts.admission_timeout,
        }
    }
}

/// Counters shared between the executor handle and its workers.
#[derive(Default)]
struct Counters {
    outstanding: AtomicUsize,
    completed: AtomicUsize,
    panicked: AtomicUsize,
    /// Set when admission or draining timed out; `Drop` then detaches busy workers.
    stuck: AtomicBool,
    /// Held while notifying `slot_freed` and while a waiter re-checks admission.
    slot_lock: Mutex<()>,
    slot_freed: Condvar,
}

impl Counters {
    fn release_slot(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        let _guard = self.slot_lock.lock().unwrap();
        self.slot_freed.notify_all();
    }
}

pub struct BoundedExecutor {
    config: ExecutorConfig,
    counters: Arc<Counters>,
    task_tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

/// Single worker: run tasks until the channel closes. Each task releases its slot on return,
/// including when it panics.
fn worker_loop(task_rx: Receiver<Task>, counters: Arc<Counters>) {
    while let Ok(task) = task_rx.recv() {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Task panicked; slot released");
        }
        counters.completed.fetch_add(1, Ordering::Relaxed);
        counters.release_slot();
    }
}

impl BoundedExecutor {
    /// Spawn `config.max_tasks` workers. A cap of 0 is raised to 1.
    pub fn new(config: ExecutorConfig) -> Self {
        let config = ExecutorConfig {
            max_tasks: config.max_tasks.max(1),
            ..config
        };
        let (task_tx, task_rx) = bounded::<Task>(config.max_tasks);
        let counters = Arc::new(Counters::default());
        let workers = (0..config.max_tasks)
            .map(|_| {
                let task_rx = task_rx.clone();
                let counters = Arc::clone(&counters);
                thread::spawn(move || worker_loop(task_rx, counters))
            })
            .collect();
        debug!("Executor started with {} workers", config.max_tasks);
        Self {
            config,
            counters,
            task_tx: Some(task_tx),
            workers,
        }
    }

    pub fn max_tasks(&self) -> usize {
        self.config.max_tasks
    }

    /// Reserve one slot, or fail with `CapacityExceeded` if none is free.
    fn try_admit(&self) -> Result<(), ExecutorError> {
        let max = self.config.max_tasks;
        self.counters
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(ExecutorError::CapacityExceeded)
    }

    /// Hand an admitted task to the workers. Releases the slot if the executor is gone.
    fn dispatch(&self, task: Task) -> Result<(), ExecutorError> {
        let sent = match &self.task_tx {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            self.counters.release_slot();
            Err(ExecutorError::ShutDown)
        }
    }

    /// Run `task` if a slot is free right now. On `CapacityExceeded` the task is dropped unrun.
    pub fn try_submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.task_tx.is_none() {
            return Err(ExecutorError::ShutDown);
        }
        self.try_admit()?;
        self.dispatch(Box::new(task))
    }

    /// Run `task`, blocking until a slot is free. Woken whenever a task completes (and at least
    /// every `admission_backoff`); returns `AdmissionTimedOut` once `admission_timeout` has
    /// elapsed without a slot.
    pub fn submit<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.task_tx.is_none() {
            return Err(ExecutorError::ShutDown);
        }
        let started = Instant::now();
        let mut waits = 0_u64;
        let mut guard = self.counters.slot_lock.lock().unwrap();
        loop {
            match self.try_admit() {
                Ok(()) => {
                    drop(guard);
                    if waits > 0 {
                        debug!("Admitted after {} waits ({:?})", waits, started.elapsed());
                    }
                    return self.dispatch(Box::new(task));
                }
                Err(ExecutorError::CapacityExceeded(_)) => {}
                Err(e) => return Err(e),
            }
            let mut wait = self.config.admission_backoff;
            if let Some(limit) = self.config.admission_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    self.counters.stuck.store(true, Ordering::Relaxed);
                    return Err(ExecutorError::AdmissionTimedOut(waited));
                }
                wait = wait.min(limit - waited);
            }
            waits += 1;
            guard = self
                .counters
                .slot_freed
                .wait_timeout(guard, wait)
                .unwrap()
                .0;
        }
    }

    /// True while any admitted task has not completed. Snapshot; no lock taken.
    pub fn is_busy(&self) -> bool {
        self.in_flight() > 0
    }

    /// Number of admitted tasks not yet completed.
    pub fn in_flight(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    /// Tasks finished since start (including panicked ones).
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Tasks that panicked since start.
    pub fn panicked(&self) -> usize {
        self.counters.panicked.load(Ordering::Relaxed)
    }

    /// Block until no task is outstanding. Woken on every completion; `poll` caps each wait.
    /// Gives up with `DrainTimedOut` once `admission_timeout` has elapsed.
    pub fn wait_idle(&self, poll: Duration) -> Result<(), ExecutorError> {
        let started = Instant::now();
        let mut guard = self.counters.slot_lock.lock().unwrap();
        while self.is_busy() {
            let mut wait = poll;
            if let Some(limit) = self.config.admission_timeout {
                let waited = started.elapsed();
                if waited >= limit {
                    self.counters.stuck.store(true, Ordering::Relaxed);
                    return Err(ExecutorError::DrainTimedOut {
                        in_flight: self.in_flight(),
                        waited,
                    });
                }
                wait = wait.min(limit - waited);
            }
            guard = self
                .counters
                .slot_freed
                .wait_timeout(guard, wait)
                .unwrap()
                .0;
        }
        Ok(())
    }

    /// True once admission or draining has timed out.
    pub fn is_stuck(&self) -> bool {
        self.counters.stuck.load(Ordering::Relaxed)
    }

    /// Stop accepting work, let queued and running tasks finish, and join the workers.
    pub fn shutdown(mut self) {
        self.close_and_join();
    }

    fn close_and_join(&mut self) {
        // Dropping the last sender closes the channel so workers exit after draining it.
        drop(self.task_tx.take());
        for h in self.workers.drain(..) {
            if h.join().is_err() {
                error!("executor worker thread panicked");
            }
        }
    }
}

impl Drop for BoundedExecutor {
    fn drop(&mut self) {
        if self.is_stuck() && self.is_busy() {
            // Joining would block on the stuck tasks; workers exit once they return.
            warn!(
                "Detaching executor workers with {} tasks still running",
                self.in_flight()
            );
            drop(self.task_tx.take());
            self.workers.clear();
            return;
        }
        self.close_and_join();
    }
}
