// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::closure::{
    Callback,
    Context,
};
use ::std::{
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
    time::{
        Duration,
        Instant,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Time elapsed since the epoch of the time source it was read from.
pub type Timestamp = Duration;

/// Injected time source. Must be bound to a synchronous context.
pub type GetTime = Callback<(), Timestamp>;

/// Simulated clock that only moves when told to. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct VirtualClock(Arc<AtomicU64>);

/// Monotonic wall clock whose epoch is its creation.
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    start: Instant,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Timestamp {
        Duration::from_nanos(self.0.load(Ordering::Acquire))
    }

    /// Moves the clock to `now`. Moving it backwards is a contract violation.
    #[track_caller]
    pub fn set(&self, now: Timestamp) {
        let nanos: u64 = Self::to_nanos(now);
        let previous: u64 = self.0.fetch_max(nanos, Ordering::AcqRel);
        if previous > nanos {
            fatal!(
                "set(): virtual clock moved backwards (from={:?}, to={:?})",
                Duration::from_nanos(previous),
                now
            );
        }
        trace!("set(): now={:?}", now);
    }

    /// Moves the clock forward by `by`, stopping at the largest representable timestamp.
    pub fn advance(&self, by: Duration) {
        let nanos: u64 = Self::to_nanos(by);
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| Some(now.saturating_add(nanos)));
    }

    pub fn get_time(&self) -> GetTime {
        let clock: VirtualClock = self.clone();
        Callback::new(Context::Synchronous, move |()| clock.now())
    }

    fn to_nanos(duration: Duration) -> u64 {
        u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now(&self) -> Timestamp {
        self.start.elapsed()
    }

    pub fn get_time(&self) -> GetTime {
        let clock: SystemClock = *self;
        Callback::new(Context::Synchronous, move |()| clock.now())
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
