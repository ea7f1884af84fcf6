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
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

enum Message {
    Run(ActivationRecord),
    /// Sentinel: the worker exits and applies the callback.
    Shutdown(Callback<()>),
}

/// Scheduler backed by one queue drained by exactly one fiber. Activations run in exact enqueue order.
pub struct MailboxScheduler {
    name: String,
    /// Closed by shutdown, with the shutdown sentinel as its last message.
    queue: SharedAsyncQueue<Message>,
    counters: SchedulerCounters,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MailboxScheduler {
    /// Creates a mailbox scheduler and spawns its fiber on `runtime`.
    pub fn spawn(runtime: &FiberRuntime, name: &str) -> SchedulerRef {
        let scheduler: Arc<MailboxScheduler> = Arc::new(Self {
            name: name.to_string(),
            queue: SharedAsyncQueue::new(),
            counters: SchedulerCounters::default(),
        });
        runtime.spawn(name, Self::run(scheduler.clone()));
        debug!("spawn(): mailbox scheduler started (name={:?})", name);
        scheduler
    }

    /// Worker fiber.
    async fn run(scheduler: Arc<Self>) {
        let this: SchedulerRef = scheduler.clone();
        loop {
            match scheduler.queue.pop().await {
                Message::Run(record) => {
                    run_activation(&this, None, record);
                    scheduler.counters.on_execute();
                },
                Message::Shutdown(on_done) => {
                    debug!(
                        "run(): mailbox scheduler stopped (name={:?}, executed={:?})",
                        scheduler.name,
                        scheduler.counters.snapshot().executed
                    );
                    if !on_done.is_null() {
                        on_done.apply(());
                    }
                    return;
                },
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Scheduler for MailboxScheduler {
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
        match self.queue.push(Message::Run(record)) {
            Ok(()) => self.counters.on_enqueue(),
            Err(Message::Run(record)) => fatal!(
                "enqueue_activation(): scheduler is shut down (scheduler={:?}, site={})",
                self.name,
                record.site()
            ),
            Err(Message::Shutdown(_)) => unreachable!("only activations are pushed"),
        }
    }

    fn shutdown(&self, on_done: Callback<()>) {
        let pending: usize = self.queue.len();
        if !self.queue.close([Message::Shutdown(on_done)]) {
            fatal!("shutdown(): scheduler shut down twice (scheduler={:?})", self.name);
        }
        debug!("shutdown(): draining (name={:?}, pending={:?})", self.name, pending);
    }

    fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
