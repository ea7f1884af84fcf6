// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Execution contexts. A [Scheduler] takes activation records and runs them later on fibers of its own; consumers only
//! ever see the trait, so new schedulers can be added without touching them.

mod mailbox;
mod pool;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    mailbox::MailboxScheduler,
    pool::{
        FiberPoolScheduler,
        WorkerHooks,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::closure::{
    ActivationRecord,
    Callback,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    fmt,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Thread Local Storage
//======================================================================================================================

thread_local! {
    /// Scheduler whose activation is running on this thread, if any.
    static CURRENT_SCHEDULER: RefCell<Option<SchedulerRef>> = const { RefCell::new(None) };
    /// Pool worker running the current activation, if any.
    static CURRENT_WORKER: Cell<Option<usize>> = const { Cell::new(None) };
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Execution context contract.
pub trait Scheduler: Send + Sync + 'static {
    /// Diagnostic name.
    fn name(&self) -> &str;

    /// Allocates an unbound activation record of `size` bytes of arguments. Pure allocation, nothing is scheduled.
    fn allocate_activation(&self, size: usize) -> ActivationRecord;

    /// Makes `record` eligible to run. Records run in enqueue order per scheduler. Enqueuing an unbound record or
    /// enqueuing after shutdown is a contract violation.
    fn enqueue_activation(&self, record: ActivationRecord);

    /// Stops accepting work once the already-enqueued activations have run, then applies `on_done` exactly once after
    /// the scheduler's fibers are gone. Calling this twice is a contract violation.
    fn shutdown(&self, on_done: Callback<()>);

    /// Activation counters.
    fn stats(&self) -> SchedulerStats {
        SchedulerStats::default()
    }
}

pub type SchedulerRef = Arc<dyn Scheduler>;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Snapshot of a scheduler's activation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub allocated: u64,
    pub enqueued: u64,
    pub executed: u64,
}

#[derive(Default)]
struct SchedulerCounters {
    allocated: AtomicU64,
    enqueued: AtomicU64,
    executed: AtomicU64,
}

/// Installs a scheduler as current for the lifetime of one activation and restores the previous one on drop, so that
/// nested dispatch and unwinding both leave the slot as they found it.
struct CurrentGuard {
    scheduler: Option<SchedulerRef>,
    worker: Option<usize>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Returns the scheduler whose activation is running on this thread.
pub fn current() -> Option<SchedulerRef> {
    CURRENT_SCHEDULER.with(|current| current.borrow().clone())
}

/// Returns the index of the pool worker running the current activation.
pub fn current_worker() -> Option<usize> {
    CURRENT_WORKER.with(|current| current.get())
}

/// Scheduler identity.
pub fn same_scheduler(a: &SchedulerRef, b: &SchedulerRef) -> bool {
    ::std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Runs one activation with `scheduler` installed as the current scheduler.
fn run_activation(scheduler: &SchedulerRef, worker: Option<usize>, record: ActivationRecord) {
    let _guard: CurrentGuard = CurrentGuard::enter(scheduler, worker);
    record.dispatch();
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SchedulerCounters {
    fn on_allocate(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    fn on_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn on_execute(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
        }
    }
}

impl CurrentGuard {
    fn enter(scheduler: &SchedulerRef, worker: Option<usize>) -> Self {
        Self {
            scheduler: CURRENT_SCHEDULER.with(|current| current.replace(Some(scheduler.clone()))),
            worker: CURRENT_WORKER.with(|current| current.replace(worker)),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let scheduler: Option<SchedulerRef> = self.scheduler.take();
        let _running: Option<SchedulerRef> = CURRENT_SCHEDULER.with(|current| current.replace(scheduler));
        CURRENT_WORKER.with(|current| current.set(self.worker));
    }
}

impl fmt::Debug for dyn Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}
