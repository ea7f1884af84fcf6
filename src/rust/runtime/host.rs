// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    closure::{
        Callback,
        Context,
    },
    config::{
        ClockKind,
        Config,
    },
    fail::Fail,
    fiber::FiberRuntime,
    logging,
    scheduler::{
        FiberPoolScheduler,
        MailboxScheduler,
        SchedulerRef,
        WorkerHooks,
    },
    sim::VirtualTimeLoop,
    timer::{
        GetTime,
        SystemClock,
        TimeBase,
        TimerDispatcher,
        VirtualClock,
    },
};
use ::std::time::Duration;

//==============================================================================
// Structures
//==============================================================================

/// Time source of a [Host].
#[derive(Clone, Debug)]
pub enum HostClock {
    System(SystemClock),
    Virtual(VirtualClock),
}

/// A fiber runtime with one mailbox scheduler, one fiber pool and one timer dispatcher, set up from a [Config].
pub struct Host {
    runtime: FiberRuntime,
    mailbox: SchedulerRef,
    pool: SchedulerRef,
    clock: HostClock,
    timers: TimerDispatcher,
    max_idle_steps: usize,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl HostClock {
    pub fn get_time(&self) -> GetTime {
        match self {
            HostClock::System(clock) => clock.get_time(),
            HostClock::Virtual(clock) => clock.get_time(),
        }
    }
}

impl Host {
    pub fn new(config: &Config) -> Result<Self, Fail> {
        logging::initialize();

        let mailbox_name: String = config.mailbox_name()?;
        let workers: usize = config.pool_workers()?;
        let max_idle_steps: usize = config.max_idle_steps()?;
        let clock: HostClock = match config.clock()? {
            ClockKind::System => HostClock::System(SystemClock::new()),
            ClockKind::Virtual => HostClock::Virtual(VirtualClock::new()),
        };

        let runtime: FiberRuntime = FiberRuntime::new();
        let timers: TimerDispatcher = TimerDispatcher::alloc(&format!("{}/timers", mailbox_name), clock.get_time());
        let mailbox: SchedulerRef = MailboxScheduler::spawn(&runtime, &mailbox_name);
        let pool: SchedulerRef =
            FiberPoolScheduler::spawn(&runtime, &format!("{}/pool", mailbox_name), workers, WorkerHooks::none());
        info!(
            "new(): host ready (mailbox={:?}, workers={:?}, clock={:?})",
            mailbox_name, workers, clock
        );

        Ok(Self {
            runtime,
            mailbox,
            pool,
            clock,
            timers,
            max_idle_steps,
        })
    }

    pub fn runtime(&self) -> &FiberRuntime {
        &self.runtime
    }

    pub fn mailbox(&self) -> &SchedulerRef {
        &self.mailbox
    }

    pub fn pool(&self) -> &SchedulerRef {
        &self.pool
    }

    pub fn clock(&self) -> &HostClock {
        &self.clock
    }

    pub fn timers(&self) -> &TimerDispatcher {
        &self.timers
    }

    /// Runs fibers and timers until there is nothing left to do or the configured step limit is hit. On the system
    /// clock the thread parks until the next deadline or the next wake. Returns how many timers fired.
    pub fn run(&self) -> usize {
        match &self.clock {
            HostClock::Virtual(clock) => {
                VirtualTimeLoop::new(self.runtime.clone(), clock.clone(), self.timers.clone())
                    .run_until_idle(self.max_idle_steps)
            },
            HostClock::System(_) => self.run_on_system_clock(),
        }
    }

    fn run_on_system_clock(&self) -> usize {
        let mut fired: usize = 0;
        for _ in 0..self.max_idle_steps {
            self.runtime.run_until_stalled();
            fired += self.timers.fire();
            if self.runtime.has_ready() {
                continue;
            }
            match self.timers.get_next(TimeBase::Relative) {
                Some(wait) if wait > Duration::ZERO => {
                    self.runtime.park(wait);
                },
                Some(_) => (),
                None => return fired,
            }
        }
        warn!("run(): step limit reached (max_idle_steps={:?})", self.max_idle_steps);
        fired
    }

    /// Shuts both schedulers down and drives their fibers until they exit. Returns how many fibers are left.
    pub fn shutdown(self) -> usize {
        for scheduler in [&self.mailbox, &self.pool] {
            let name: String = scheduler.name().to_string();
            scheduler.shutdown(Callback::new(Context::Synchronous, move |()| {
                debug!("shutdown(): scheduler drained (name={:?})", name);
            }));
        }
        self.runtime.run_until_stalled();
        let left: usize = self.runtime.num_fibers();
        if left > 0 {
            warn!("shutdown(): fibers still alive (count={:?})", left);
        }
        left
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
