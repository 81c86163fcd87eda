//! Periodic task scheduling for protocol timers.
//!
//! The engine emits Sender Reports and other timed work from
//! [`PeriodicModule::process`]. A [`Scheduler`] decides when to call it.
//! [`ThreadScheduler`] runs every registered module on one background thread,
//! polling at a fixed interval and honoring each module's own deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{PacketizerError, Result};

/// Work that must run on a timer.
pub trait PeriodicModule: Send + Sync {
    /// Time until [`process`](Self::process) should next be called.
    fn time_until_next_process(&self) -> Duration;

    fn process(&self);
}

/// Handle returned by [`Scheduler::register_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u64);

impl ModuleId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync {
    fn start(&self) -> Result<()>;

    /// Stop the worker. Idempotent.
    fn stop(&self);

    fn register_module(&self, module: Arc<dyn PeriodicModule>) -> ModuleId;

    /// Remove a module. Returns once no `process()` pass on it is in flight.
    fn deregister_module(&self, id: ModuleId);
}

struct Registered {
    id: ModuleId,
    module: Arc<dyn PeriodicModule>,
    next_run: Instant,
}

/// Default poll interval for [`ThreadScheduler`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs registered modules on a dedicated thread.
///
/// The module list is locked for the duration of each pass, so
/// [`deregister_module`](Scheduler::deregister_module) blocks until the
/// current pass has finished.
pub struct ThreadScheduler {
    modules: Arc<Mutex<Vec<Registered>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
    poll_interval: Duration,
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ThreadScheduler {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            modules: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            next_id: AtomicU64::new(0),
            poll_interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn module_count(&self) -> usize {
        self.modules.lock().len()
    }

    fn run_loop(modules: Arc<Mutex<Vec<Registered>>>, running: Arc<AtomicBool>, poll: Duration) {
        while running.load(Ordering::SeqCst) {
            {
                let mut modules = modules.lock();
                let now = Instant::now();
                for entry in modules.iter_mut().filter(|e| e.next_run <= now) {
                    entry.module.process();
                    entry.next_run = Instant::now() + entry.module.time_until_next_process();
                }
            }
            thread::sleep(poll);
        }
        tracing::debug!("scheduler loop exited");
    }
}

impl Scheduler for ThreadScheduler {
    fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PacketizerError::AlreadyRunning);
        }

        let modules = self.modules.clone();
        let running = self.running.clone();
        let poll = self.poll_interval;
        let handle = thread::Builder::new()
            .name("packetizer-scheduler".into())
            .spawn(move || Self::run_loop(modules, running, poll));

        match handle {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                tracing::info!(poll_ms = poll.as_millis() as u64, "scheduler started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            tracing::warn!("scheduler thread panicked");
        }
        tracing::info!("scheduler stopped");
    }

    fn register_module(&self, module: Arc<dyn PeriodicModule>) -> ModuleId {
        let id = ModuleId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let next_run = Instant::now() + module.time_until_next_process();
        self.modules.lock().push(Registered {
            id,
            module,
            next_run,
        });
        tracing::debug!(module = id.0, "module registered");
        id
    }

    fn deregister_module(&self, id: ModuleId) {
        self.modules.lock().retain(|entry| entry.id != id);
        tracing::debug!(module = id.0, "module deregistered");
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
