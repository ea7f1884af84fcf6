// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::async_queue::SharedAsyncQueue,
    runtime::{
        closure::{
            ActivationRecord,
            Callback,
        },
        fiber::FiberRuntime,
        scheduler::{
            run_activation,
            Scheduler,
            SchedulerCounters,
            SchedulerRef,
            SchedulerStats,
        },
    },
};
use ::std::{
    rc::Rc,
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

enum Job {
    Run(ActivationRecord),
    Exit,
}

/// Per-worker hooks of a [FiberPoolScheduler]. `setup` produces every worker's data before any worker starts; `start`
/// runs inside the worker fiber before it takes its first job; `free` receives the data back when the worker exits.
pub struct WorkerHooks<S> {
    setup: Box<dyn FnMut(usize) -> S>,
    start: Option<Box<dyn Fn(usize, &mut S)>>,
    free: Option<Box<dyn Fn(usize, S)>>,
}

/// Scheduler backed by one shared queue drained by N worker fibers. Jobs become available in enqueue order, but two
/// jobs taken by different workers are not ordered with respect to each other.
pub struct FiberPoolScheduler {
    name: String,
    workers: usize,
    /// Closed by shutdown, with one exit sentinel per worker as its last jobs.
    queue: SharedAsyncQueue<Job>,
    live_workers: AtomicUsize,
    on_done: Mutex<Option<Callback<()>>>,
    counters: SchedulerCounters,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<S> WorkerHooks<S> {
    pub fn new<F: FnMut(usize) -> S + 'static>(setup: F) -> Self {
        Self {
            setup: Box::new(setup),
            start: None,
            free: None,
        }
    }

    pub fn on_start<F: Fn(usize, &mut S) + 'static>(mut self, start: F) -> Self {
        self.start = Some(Box::new(start));
        self
    }

    pub fn on_free<F: Fn(usize, S) + 'static>(mut self, free: F) -> Self {
        self.free = Some(Box::new(free));
        self
    }
}

impl WorkerHooks<()> {
    /// Workers without per-worker data.
    pub fn none() -> Self {
        Self::new(|_| ())
    }
}

impl FiberPoolScheduler {
    /// Creates a pool of `workers` fibers on `runtime`. A pool without workers is a contract violation.
    pub fn spawn<S: 'static>(
        runtime: &FiberRuntime,
        name: &str,
        workers: usize,
        mut hooks: WorkerHooks<S>,
    ) -> SchedulerRef {
        if workers == 0 {
            fatal!("spawn(): fiber pool needs at least one worker (name={:?})", name);
        }

        // All worker data exists before the first worker runs.
        let data: Vec<S> = (0..workers).map(|index| (hooks.setup)(index)).collect();

        let pool: Arc<FiberPoolScheduler> = Arc::new(Self {
            name: name.to_string(),
            workers,
            queue: SharedAsyncQueue::new(),
            live_workers: AtomicUsize::new(workers),
            on_done: Mutex::new(None),
            counters: SchedulerCounters::default(),
        });
        let hooks: Rc<WorkerHooks<S>> = Rc::new(hooks);
        for (index, data) in data.into_iter().enumerate() {
            let fiber_name: String = format!("{}/{}", name, index);
            runtime.spawn(&fiber_name, Self::work(pool.clone(), hooks.clone(), index, data));
        }
        debug!("spawn(): fiber pool started (name={:?}, workers={:?})", name, workers);
        pool
    }

    /// Worker fiber.
    async fn work<S: 'static>(pool: Arc<Self>, hooks: Rc<WorkerHooks<S>>, index: usize, mut data: S) {
        let this: SchedulerRef = pool.clone();
        if let Some(start) = &hooks.start {
            start(index, &mut data);
        }

        while let Job::Run(record) = pool.queue.pop().await {
            run_activation(&this, Some(index), record);
            pool.counters.on_execute();
        }

        if let Some(free) = &hooks.free {
            free(index, data);
        }
        trace!("work(): worker exited (pool={:?}, index={:?})", pool.name, index);

        if pool.live_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!(
                "work(): fiber pool stopped (name={:?}, executed={:?})",
                pool.name,
                pool.counters.snapshot().executed
            );
            let on_done: Option<Callback<()>> = pool.on_done.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(on_done) = on_done.filter(|cb| !cb.is_null()) {
                on_done.apply(());
            }
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Scheduler for FiberPoolScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn allocate_activation(&self, size: usize) -> ActivationRecord {
        self.counters.on_allocate();
        ActivationRecord::new(size)
    }

    fn enqueue_activation(&self, record: ActivationRecord) {
        if !record.is_bound() {
            fatal!("enqueue_activation(): unbound record (scheduler={:?})", self.name);
        }
        match self.queue.push(Job::Run(record)) {
            Ok(()) => self.counters.on_enqueue(),
            Err(Job::Run(record)) => fatal!(
                "enqueue_activation(): scheduler is shut down (scheduler={:?}, site={})",
                self.name,
                record.site()
            ),
            Err(Job::Exit) => unreachable!("only activations are pushed"),
        }
    }

    fn shutdown(&self, on_done: Callback<()>) {
        // Held until the callback is in place, so that the last worker cannot exit without it.
        let mut slot: MutexGuard<Option<Callback<()>>> = self.on_done.lock().unwrap_or_else(PoisonError::into_inner);
        let pending: usize = self.queue.len();
        if !self.queue.close((0..self.workers).map(|_| Job::Exit)) {
            fatal!("shutdown(): scheduler shut down twice (scheduler={:?})", self.name);
        }
        *slot = Some(on_done);
        debug!("shutdown(): draining (name={:?}, pending={:?})", self.name, pending);
    }

    fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
