//! Phase scheduler.
//!
//! Drives a set of workers through the build steps and the daily phases in
//! strict order: no worker starts a phase before every worker has finished
//! the previous one.
//!
//! ```text
//!   build:  BuildClusters ─► BuildPopulation ─► LinkCities
//!   day:    InitDay ─► Expose ─► Middle(Forward) ─► Middle(BubbleUp) ─► Middle(TrickleDown) ─► Infect ─► FinalizeDay
//! ```
//!
//! With one worker every phase runs on the calling thread. Otherwise each
//! worker owns an OS thread for the whole run, and the dispatcher hands out
//! phases through a latch: it publishes the phase, wakes every worker and
//! sleeps until the last one counts down. Nobody polls.

use crate::city::MiddlePass;
use crate::error::BuildError;
use crate::exposure::Day;

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// One step of the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Build each city's cluster families
    BuildClusters,
    /// Create residents and their memberships
    BuildPopulation,
    /// Neighbor choosers and cross-city exposure parents
    LinkCities,
    /// Reset the day's city accumulators
    InitDay,
    /// Advance the infectious and deposit exposure
    Expose,
    /// Propagate exposure through the cluster trees
    Middle(MiddlePass),
    /// Expose the susceptible to the day's risk
    Infect,
    /// Refresh per-city statistics
    FinalizeDay,
}

impl Phase {
    /// One-off steps, run before day 1.
    pub const BUILD: [Phase; 3] = [Phase::BuildClusters, Phase::BuildPopulation, Phase::LinkCities];

    /// Steps of every day, in order.
    pub const DAY: [Phase; 7] = [
        Phase::InitDay,
        Phase::Expose,
        Phase::Middle(MiddlePass::Forward),
        Phase::Middle(MiddlePass::BubbleUp),
        Phase::Middle(MiddlePass::TrickleDown),
        Phase::Infect,
        Phase::FinalizeDay,
    ];
}

/// Something that does its part of each phase.
pub trait PhaseWorker: Send + 'static {
    fn run_phase(&mut self, phase: Phase, day: Day);
}

// =============================================================================
// SHARED CONTROL BLOCK
// =============================================================================

#[derive(Debug)]
struct Control {
    /// Bumped for every dispatched phase
    step: u64,

    /// What the current step is
    task: (Phase, Day),

    /// Workers still running the current step
    active: usize,

    /// Set once; workers exit on seeing it
    terminating: bool,

    /// A worker panicked inside a phase
    poisoned: bool,
}

#[derive(Debug)]
struct Shared {
    control: Mutex<Control>,
    /// Dispatcher to workers: a new step or termination
    wake: Condvar,
    /// Last worker to dispatcher: step complete
    done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts the worker down when its phase ends, even by panic.
struct Countdown<'a> {
    shared: &'a Shared,
}

impl Drop for Countdown<'_> {
    fn drop(&mut self) {
        let mut control = self.shared.lock();
        if thread::panicking() {
            control.poisoned = true;
        }
        control.active -= 1;
        if control.active == 0 {
            self.shared.done.notify_all();
        }
    }
}

fn worker_loop<W: PhaseWorker>(mut worker: W, shared: Arc<Shared>) {
    let mut seen = 0;
    loop {
        let (phase, day) = {
            let mut control = shared.lock();
            while control.step == seen && !control.terminating {
                control = shared.wake.wait(control).unwrap_or_else(PoisonError::into_inner);
            }
            if control.terminating {
                return;
            }
            seen = control.step;
            control.task
        };
        let countdown = Countdown { shared: &*shared };
        worker.run_phase(phase, day);
        drop(countdown);
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

enum Mode<W> {
    Inline(Vec<W>),
    Threaded {
        shared: Arc<Shared>,
        handles: Vec<JoinHandle<()>>,
    },
}

/// Runs phases across a fixed set of workers.
pub struct Scheduler<W: PhaseWorker> {
    mode: Mode<W>,
    workers: usize,
}

impl<W: PhaseWorker> Scheduler<W> {
    /// One thread per worker, or inline execution for a single worker.
    pub fn new(workers: Vec<W>) -> Result<Self, BuildError> {
        if workers.len() <= 1 {
            return Ok(Self::inline(workers));
        }
        let count = workers.len();
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                step: 0,
                task: (Phase::BuildClusters, 0),
                active: 0,
                terminating: false,
                poisoned: false,
            }),
            wake: Condvar::new(),
            done: Condvar::new(),
        });
        let mut scheduler = Self {
            mode: Mode::Threaded {
                shared: Arc::clone(&shared),
                handles: Vec::with_capacity(count),
            },
            workers: 0,
        };
        for (index, worker) in workers.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("agent-{index}"))
                .spawn(move || worker_loop(worker, shared))?;
            if let Mode::Threaded { handles, .. } = &mut scheduler.mode {
                handles.push(handle);
            }
            scheduler.workers += 1;
        }
        info!(agents = count, "Started agent threads");
        Ok(scheduler)
    }

    /// Runs every phase on the calling thread, worker by worker.
    pub fn inline(workers: Vec<W>) -> Self {
        let count = workers.len();
        Self {
            mode: Mode::Inline(workers),
            workers: count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded { .. })
    }

    /// Runs the one-off build steps.
    pub fn build(&mut self) {
        for phase in Phase::BUILD {
            self.run_phase(phase, 0);
        }
    }

    /// Runs every phase of `day`.
    pub fn run_day(&mut self, day: Day) {
        for phase in Phase::DAY {
            self.run_phase(phase, day);
        }
    }

    /// Runs one phase on every worker and returns once all have finished.
    ///
    /// # Panics
    ///
    /// If a worker panicked during the phase.
    pub fn run_phase(&mut self, phase: Phase, day: Day) {
        match &mut self.mode {
            Mode::Inline(workers) => {
                for worker in workers.iter_mut() {
                    worker.run_phase(phase, day);
                }
            }
            Mode::Threaded { shared, .. } => {
                let mut control = shared.lock();
                if control.terminating {
                    return;
                }
                control.step += 1;
                control.task = (phase, day);
                control.active = self.workers;
                shared.wake.notify_all();
                while control.active > 0 {
                    control = shared.done.wait(control).unwrap_or_else(PoisonError::into_inner);
                }
                if control.poisoned {
                    drop(control);
                    panic!("agent panicked during {phase:?} of day {day}");
                }
            }
        }
    }

    /// Stops and joins every worker thread. Idempotent.
    pub fn terminate(&mut self) {
        if let Mode::Threaded { shared, handles } = &mut self.mode {
            shared.lock().terminating = true;
            shared.wake.notify_all();
            for handle in handles.drain(..) {
                let _ = handle.join();
            }
            debug!("Agent threads joined");
        }
    }
}

impl<W: PhaseWorker> Drop for Scheduler<W> {
    fn drop(&mut self) {
        self.terminate();
    }
}
