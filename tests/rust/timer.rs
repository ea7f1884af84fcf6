// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    entries,
    record,
    setup,
    strings,
    Trace,
};
use ::anyhow::Result;
use ::fabric_substrate::{
    ensure_eq,
    Callback,
    Context,
    Deadline,
    EventState,
    FiberRuntime,
    MailboxScheduler,
    SchedulerRef,
    TimeBase,
    Timer,
    TimerDispatcher,
    TimerSpec,
    VirtualClock,
    VirtualTimeLoop,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// State shared by the handlers of the virtual-clock scenario.
struct Scenario {
    timers: TimerDispatcher,
    clock: VirtualClock,
    mailbox: SchedulerRef,
    trace: Trace,
    quiet: Mutex<Option<Timer>>,
    doomed: Mutex<Option<Timer>>,
}

type Handler = fn(&Arc<Scenario>);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scenario {
    fn new(runtime: &FiberRuntime) -> Arc<Self> {
        let clock: VirtualClock = VirtualClock::new();
        Arc::new(Self {
            timers: TimerDispatcher::alloc("scenario", clock.get_time()),
            clock,
            mailbox: MailboxScheduler::spawn(runtime, "scenario"),
            trace: Trace::default(),
            quiet: Mutex::new(None),
            doomed: Mutex::new(None),
        })
    }

    /// Schedules a timer whose handler runs on the mailbox, records `name`, runs `handler` and frees the timer.
    fn schedule(self: &Arc<Self>, name: &'static str, at: u64, handler: Handler) -> Timer {
        let this: Arc<Scenario> = self.clone();
        let fired: Callback<Timer> = Callback::new(Context::scheduler(&self.mailbox), move |timer: Timer| {
            record(&this.trace, name);
            handler(&this);
            timer.free(Callback::null());
        });
        let (timer, _) = self
            .timers
            .timer_alloc(TimerSpec::new(name, Deadline::At(secs(at))).log_category("scenario").fired(fired));
        timer
    }

    fn first(self: &Arc<Self>) {
        self.schedule("t1", 1, |this: &Arc<Scenario>| {
            let (quiet, _) = this.timers.timer_alloc(TimerSpec::new("t2-quiet", Deadline::At(secs(2))));
            *this.quiet.lock().unwrap_or_else(PoisonError::into_inner) = Some(quiet);
            this.schedule("t2", 2, |this: &Arc<Scenario>| {
                this.schedule("t1-late", 1, |_| ());
                let doomed: Timer = this.schedule("t5", 5, |_| panic!("canceled timer fired"));
                *this.doomed.lock().unwrap_or_else(PoisonError::into_inner) = Some(doomed);
                this.schedule("t3", 3, |_| ());
                this.schedule("t4", 4, |this: &Arc<Scenario>| {
                    if let Some(doomed) = this.doomed.lock().unwrap_or_else(PoisonError::into_inner).take() {
                        doomed.free(Callback::null());
                    }
                    this.clock.set(secs(7));
                });
                this.schedule("t6", 6, |_| ());
            });
        });
    }

    fn quiet(&self) -> Option<Timer> {
        self.quiet.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

//======================================================================================================================
// Tests
//======================================================================================================================

/// After the clock passes every deadline, timers fire in deadline order with ties in insertion order.
#[test]
fn timers_fire_in_deadline_order() -> Result<()> {
    const TIMERS: usize = 64;

    let _runtime: FiberRuntime = setup();
    let clock: VirtualClock = VirtualClock::new();
    let timers: TimerDispatcher = TimerDispatcher::alloc("order", clock.get_time());
    let fired: Arc<Mutex<Vec<(u64, usize)>>> = Arc::new(Mutex::new(vec![]));
    let mut rng: SmallRng = SmallRng::seed_from_u64(42);

    let mut inserted: Vec<(u64, usize)> = Vec::with_capacity(TIMERS);
    for index in 0..TIMERS {
        // Narrow range, so that ties are frequent.
        let deadline: u64 = rng.gen_range(1..16);
        inserted.push((deadline, index));
        let fired2: Arc<Mutex<Vec<(u64, usize)>>> = fired.clone();
        let callback: Callback<Timer> = Callback::new(Context::Synchronous, move |timer: Timer| {
            if let Ok(mut fired) = fired2.lock() {
                fired.push((deadline, index));
            }
            timer.free(Callback::null());
        });
        timers.timer_alloc(TimerSpec::new("shuffled", Deadline::At(secs(deadline))).fired(callback));
    }

    let max: u64 = inserted.iter().map(|(deadline, _)| *deadline).max().unwrap_or(0);
    clock.set(secs(max + 1));
    ensure_eq!(timers.fire(), TIMERS);

    inserted.sort();
    ensure_eq!(fired.lock().map(|f| f.clone()).unwrap_or_default(), inserted);
    ensure_eq!(timers.is_empty(), true);
    Ok(())
}

/// Stepping the virtual clock by hand through the cancel scenario.
#[test]
fn virtual_clock_scenario_by_steps() -> Result<()> {
    let runtime: FiberRuntime = setup();
    let scenario: Arc<Scenario> = Scenario::new(&runtime);
    scenario.first();

    scenario.clock.set(secs(1));
    ensure_eq!(scenario.timers.fire(), 1);
    runtime.run_until_stalled();
    ensure_eq!(entries(&scenario.trace), strings(&["t1"]));

    scenario.clock.set(secs(2));
    ensure_eq!(scenario.timers.fire(), 2);
    runtime.run_until_stalled();
    ensure_eq!(entries(&scenario.trace), strings(&["t1", "t2"]));
    ensure_eq!(scenario.quiet().map(|quiet| quiet.fire_count_delivered()), Some(1));
    // t1-late, t5, t3, t4 and t6 are pending.
    ensure_eq!(scenario.timers.len(), 5);
    ensure_eq!(scenario.timers.get_next(TimeBase::Relative), Some(Duration::ZERO));

    scenario.clock.set(secs(4));
    ensure_eq!(scenario.timers.fire(), 3);
    runtime.run_until_stalled();
    ensure_eq!(entries(&scenario.trace), strings(&["t1", "t2", "t1-late", "t3", "t4"]));
    ensure_eq!(scenario.clock.now(), secs(7));
    ensure_eq!(scenario.timers.len(), 1);

    ensure_eq!(scenario.timers.fire(), 1);
    runtime.run_until_stalled();
    ensure_eq!(scenario.timers.fire(), 0);
    ensure_eq!(
        entries(&scenario.trace),
        strings(&["t1", "t2", "t1-late", "t3", "t4", "t6"])
    );

    let quiet: Option<Timer> = scenario.quiet();
    if let Some(quiet) = quiet {
        quiet.free(Callback::null());
        ensure_eq!(quiet.state(), EventState::FreeClosures);
    }
    ensure_eq!(scenario.timers.is_empty(), true);
    Ok(())
}

/// The same scenario driven by the virtual-time host loop.
#[test]
fn virtual_clock_scenario_on_host_loop() -> Result<()> {
    let runtime: FiberRuntime = setup();
    let scenario: Arc<Scenario> = Scenario::new(&runtime);
    scenario.first();

    let host: VirtualTimeLoop = VirtualTimeLoop::new(runtime, scenario.clock.clone(), scenario.timers.clone());
    ensure_eq!(host.run_until_idle(1000), 7);
    ensure_eq!(
        entries(&scenario.trace),
        strings(&["t1", "t2", "t1-late", "t3", "t4", "t6"])
    );
    ensure_eq!(scenario.clock.now(), secs(7));
    ensure_eq!(scenario.timers.get_next(TimeBase::Absolute), None);
    Ok(())
}
