// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host loop on virtual time: the clock only moves once every fiber has stalled and no timer is due, and then jumps
//! straight to the next deadline.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fiber::FiberRuntime,
    timer::{
        TimeBase,
        TimerDispatcher,
        Timestamp,
        VirtualClock,
    },
};

//==============================================================================
// Structures
//==============================================================================

pub struct VirtualTimeLoop {
    runtime: FiberRuntime,
    clock: VirtualClock,
    timers: TimerDispatcher,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl VirtualTimeLoop {
    /// `timers` is expected to read its time from `clock`.
    pub fn new(runtime: FiberRuntime, clock: VirtualClock, timers: TimerDispatcher) -> Self {
        Self { runtime, clock, timers }
    }

    pub fn runtime(&self) -> &FiberRuntime {
        &self.runtime
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn timers(&self) -> &TimerDispatcher {
        &self.timers
    }

    /// Runs fibers and fires timers until no fiber is ready and no timer is pending, or until `max_steps` iterations
    /// have gone by. Returns how many timers fired.
    pub fn run_until_idle(&self, max_steps: usize) -> usize {
        let mut fired: usize = 0;
        for _ in 0..max_steps {
            let polled: usize = self.runtime.run_until_stalled();
            let due: usize = self.timers.fire();
            fired += due;
            if polled > 0 || due > 0 {
                continue;
            }
            match self.timers.get_next(TimeBase::Absolute) {
                Some(deadline) => {
                    let now: Timestamp = self.clock.now();
                    if deadline > now {
                        trace!("run_until_idle(): advancing virtual time (from={:?}, to={:?})", now, deadline);
                        self.clock.set(deadline);
                    }
                },
                None => return fired,
            }
        }
        warn!("run_until_idle(): step limit reached (max_steps={:?}, fired={:?})", max_steps, fired);
        fired
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
