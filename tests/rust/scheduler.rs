// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    entries,
    poll_until,
    record,
    setup,
    strings,
    Trace,
};
use ::anyhow::Result;
use ::fabric_substrate::{
    ensure_eq,
    runtime::scheduler,
    Callback,
    Context,
    FiberPoolScheduler,
    FiberRuntime,
    MailboxScheduler,
    SchedulerRef,
    SchedulerStats,
    WorkerHooks,
};
use ::std::{
    panic::{
        self,
        AssertUnwindSafe,
    },
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
    },
    thread,
    time::Duration,
};

//======================================================================================================================
// Tests
//======================================================================================================================

/// Applying a callback bound to a scheduler never runs it before the scheduler's own drain loop does.
#[test]
fn apply_defers_execution() -> Result<()> {
    let runtime: FiberRuntime = setup();
    let mailbox: SchedulerRef = MailboxScheduler::spawn(&runtime, "deferred-mailbox");
    let pool: SchedulerRef = FiberPoolScheduler::spawn(&runtime, "deferred-pool", 2, WorkerHooks::none());

    for target in [&mailbox, &pool] {
        let ran: Arc<AtomicBool> = Arc::new(AtomicBool::new(false));
        let ran2: Arc<AtomicBool> = ran.clone();
        let callback: Callback<()> = Callback::new(Context::scheduler(target), move |()| {
            ran2.store(true, Ordering::SeqCst);
        });

        callback.apply(());
        ensure_eq!(ran.load(Ordering::SeqCst), false);
        runtime.run_until_stalled();
        ensure_eq!(ran.load(Ordering::SeqCst), true);
    }
    Ok(())
}

/// Synchronous contexts run the callback before apply returns.
#[test]
fn synchronous_apply_is_immediate() -> Result<()> {
    let _runtime: FiberRuntime = setup();
    for context in [Context::Synchronous, Context::AnyOrSynchronous] {
        let ran: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let ran2: Arc<AtomicUsize> = ran.clone();
        let callback: Callback<(usize, usize)> = Callback::new(context, move |(a, b)| {
            ran2.fetch_add(a + b, Ordering::SeqCst);
        });

        callback.apply((1, 2));
        ensure_eq!(ran.load(Ordering::SeqCst), 3);
    }
    Ok(())
}

/// Every activation enqueued before shutdown runs exactly once, in order, before the shutdown callback.
#[test]
fn shutdown_drains_mailbox_in_order() -> Result<()> {
    const ACTIVATIONS: usize = 100;

    let runtime: FiberRuntime = setup();
    let mailbox: SchedulerRef = MailboxScheduler::spawn(&runtime, "drain");
    let trace: Trace = Trace::default();

    let trace2: Trace = trace.clone();
    let work: Callback<usize> = Callback::new(Context::scheduler(&mailbox), move |i: usize| record(&trace2, &i.to_string()));
    for i in 0..ACTIVATIONS {
        work.apply(i);
    }
    let trace2: Trace = trace.clone();
    mailbox.shutdown(Callback::new(Context::Synchronous, move |()| record(&trace2, "done")));
    runtime.run_until_stalled();

    let mut expected: Vec<String> = (0..ACTIVATIONS).map(|i| i.to_string()).collect();
    expected.push("done".to_string());
    ensure_eq!(entries(&trace), expected);
    ensure_eq!(
        mailbox.stats(),
        SchedulerStats {
            allocated: ACTIVATIONS as u64,
            enqueued: ACTIVATIONS as u64,
            executed: ACTIVATIONS as u64,
        }
    );
    ensure_eq!(runtime.num_fibers(), 0);
    Ok(())
}

/// The pool's shutdown callback runs after every job and every worker exit, on the scheduler it is bound to.
#[test]
fn pool_shutdown_waits_for_every_worker() -> Result<()> {
    const WORKERS: usize = 4;
    const JOBS: usize = 32;

    let runtime: FiberRuntime = setup();
    let mailbox: SchedulerRef = MailboxScheduler::spawn(&runtime, "observer");
    let exited: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let exited2: Arc<AtomicUsize> = exited.clone();
    let hooks: WorkerHooks<usize> = WorkerHooks::new(|index| index).on_free(move |_, _| {
        exited2.fetch_add(1, Ordering::SeqCst);
    });
    let pool: SchedulerRef = FiberPoolScheduler::spawn(&runtime, "pool", WORKERS, hooks);

    let jobs: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let jobs2: Arc<AtomicUsize> = jobs.clone();
    let job: Callback<()> = Callback::new(Context::scheduler(&pool), move |()| {
        jobs2.fetch_add(1, Ordering::SeqCst);
    });
    for _ in 0..JOBS {
        job.apply(());
    }

    let seen: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(usize::MAX));
    let (seen2, jobs3, mailbox2) = (seen.clone(), jobs.clone(), mailbox.clone());
    pool.shutdown(Callback::new(Context::scheduler(&mailbox), move |()| {
        let on_mailbox: bool = scheduler::current()
            .map(|current| scheduler::same_scheduler(&current, &mailbox2))
            .unwrap_or(false);
        if on_mailbox {
            seen2.store(jobs3.load(Ordering::SeqCst), Ordering::SeqCst);
        }
    }));
    runtime.run_until_stalled();

    ensure_eq!(jobs.load(Ordering::SeqCst), JOBS);
    ensure_eq!(exited.load(Ordering::SeqCst), WORKERS);
    ensure_eq!(seen.load(Ordering::SeqCst), JOBS);
    ensure_eq!(pool.stats().executed, JOBS as u64);
    // Only the mailbox fiber is left.
    ensure_eq!(runtime.num_fibers(), 1);
    Ok(())
}

/// Activations may be enqueued from other threads; the runtime's thread wakes up and drains them.
#[test]
fn enqueue_from_other_threads() -> Result<()> {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;

    let runtime: FiberRuntime = setup();
    let mailbox: SchedulerRef = MailboxScheduler::spawn(&runtime, "remote");
    runtime.run_until_stalled();

    let count: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let count2: Arc<AtomicUsize> = count.clone();
    let work: Callback<usize> = Callback::new(Context::scheduler(&mailbox), move |n| {
        count2.fetch_add(n, Ordering::SeqCst);
    });

    let producers: Vec<thread::JoinHandle<()>> = (0..THREADS)
        .map(|_| {
            let work: Callback<usize> = work.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    work.apply(1);
                }
            })
        })
        .collect();

    let drained: bool = poll_until(&runtime, || count.load(Ordering::SeqCst) == THREADS * PER_THREAD);
    for producer in producers {
        if producer.join().is_err() {
            anyhow::bail!("producer thread panicked");
        }
    }
    ensure_eq!(drained, true);
    Ok(())
}

/// The current scheduler is visible only while one of its activations runs, and nested schedulers restore it.
#[test]
fn current_scheduler_is_scoped_to_activation() -> Result<()> {
    let runtime: FiberRuntime = setup();
    let first: SchedulerRef = MailboxScheduler::spawn(&runtime, "first");
    let second: SchedulerRef = MailboxScheduler::spawn(&runtime, "second");
    let trace: Trace = Trace::default();

    let (trace2, second2) = (trace.clone(), second.clone());
    let inner: Callback<()> = Callback::new(Context::scheduler(&second), move |()| {
        let name: String = scheduler::current().map(|s| s.name().to_string()).unwrap_or_default();
        record(&trace2, &format!("inner on {}", name));
    });
    let trace3: Trace = trace.clone();
    let outer: Callback<()> = Callback::new(Context::scheduler(&first), move |()| {
        inner.apply(());
        let kept: bool = scheduler::current()
            .map(|s| !scheduler::same_scheduler(&s, &second2))
            .unwrap_or(false);
        record(&trace3, &format!("outer kept first={}", kept));
    });

    ensure_eq!(scheduler::current().is_none(), true);
    outer.apply(());
    runtime.run_until_stalled();
    ensure_eq!(scheduler::current().is_none(), true);
    ensure_eq!(entries(&trace), strings(&["outer kept first=true", "inner on second"]));
    Ok(())
}

/// Enqueues racing with shutdown from other threads either run before the shutdown callback or are rejected; none is
/// accepted and then dropped.
#[test]
fn enqueue_racing_shutdown_is_never_lost() -> Result<()> {
    const THREADS: usize = 4;
    const MAX_PER_THREAD: usize = 100_000;

    let runtime: FiberRuntime = setup();
    for target in [
        MailboxScheduler::spawn(&runtime, "race-mailbox"),
        FiberPoolScheduler::spawn(&runtime, "race-pool", 3, WorkerHooks::none()),
    ] {
        let executed: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let executed2: Arc<AtomicUsize> = executed.clone();
        let work: Callback<()> = Callback::new(Context::scheduler(&target), move |()| {
            executed2.fetch_add(1, Ordering::SeqCst);
        });

        let producers: Vec<thread::JoinHandle<usize>> = (0..THREADS)
            .map(|_| {
                let work: Callback<()> = work.clone();
                thread::spawn(move || {
                    let mut accepted: usize = 0;
                    while accepted < MAX_PER_THREAD {
                        if panic::catch_unwind(AssertUnwindSafe(|| work.apply(()))).is_err() {
                            break;
                        }
                        accepted += 1;
                    }
                    accepted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(1));
        let done: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(usize::MAX));
        let (done2, executed3) = (done.clone(), executed.clone());
        target.shutdown(Callback::new(Context::Synchronous, move |()| {
            done2.store(executed3.load(Ordering::SeqCst), Ordering::SeqCst);
        }));

        let mut accepted: usize = 0;
        for producer in producers {
            match producer.join() {
                Ok(count) => accepted += count,
                Err(_) => anyhow::bail!("producer thread panicked outside of apply"),
            }
        }
        runtime.run_until_stalled();

        ensure_eq!(executed.load(Ordering::SeqCst), accepted);
        ensure_eq!(done.load(Ordering::SeqCst), accepted);
        ensure_eq!(target.stats().enqueued, accepted as u64);
    }
    ensure_eq!(runtime.num_fibers(), 0);
    Ok(())
}
