// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Timer multiplexing. A [TimerDispatcher] keeps pending timers ordered by deadline and turns them into a single
//! "what is due, what is next" poll interface for a host loop. Every timer is a single-shot [Event] whose
//! implementation data records where it sits in the dispatcher, so freeing a timer before it fires cancels it.

mod clock;

//==============================================================================
// Exports
//==============================================================================

pub use self::clock::{
    GetTime,
    SystemClock,
    Timestamp,
    VirtualClock,
};

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    closure::{
        Callback,
        Context,
    },
    event::{
        Event,
        EventBuilder,
        Policy,
    },
};
use ::std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        Weak,
    },
    time::Duration,
};

//==============================================================================
// Structures
//==============================================================================

/// Deadline of a new timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Deadline {
    /// Absolute timestamp of the dispatcher's time source.
    At(Timestamp),
    /// Offset from the time source's current reading.
    After(Duration),
}

/// How [TimerDispatcher::get_next] reports the next deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeBase {
    Absolute,
    Relative,
}

/// Position in the dispatcher. Equal deadlines are ordered by insertion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    deadline: Timestamp,
    seq: u64,
}

/// Implementation data of a timer event.
pub struct TimerSlot {
    key: TimerKey,
    dispatcher: Weak<DispatcherInner>,
}

/// Single-shot timer event.
pub type Timer = Event<TimerSlot>;

/// Parameters of [TimerDispatcher::timer_alloc].
pub struct TimerSpec {
    name: String,
    log_category: String,
    fired: Callback<Timer>,
    owners: usize,
    deadline: Deadline,
}

struct DispatcherInner {
    name: String,
    gettime: GetTime,
    next_seq: AtomicU64,
    entries: Mutex<BTreeMap<TimerKey, Timer>>,
}

/// Deadline-ordered set of timers driven by an injected time source.
#[derive(Clone)]
pub struct TimerDispatcher(Arc<DispatcherInner>);

//==============================================================================
// Associate Functions
//==============================================================================

impl TimerSlot {
    /// Absolute deadline.
    pub fn deadline(&self) -> Timestamp {
        self.key.deadline
    }
}

impl TimerSpec {
    /// A timer with one owner and no fired callback.
    pub fn new(name: &str, deadline: Deadline) -> Self {
        Self {
            name: name.to_string(),
            log_category: String::new(),
            fired: Callback::null(),
            owners: 1,
            deadline,
        }
    }

    pub fn log_category(mut self, log_category: &str) -> Self {
        self.log_category = log_category.to_string();
        self
    }

    pub fn fired(mut self, fired: Callback<Timer>) -> Self {
        self.fired = fired;
        self
    }

    pub fn owners(mut self, owners: usize) -> Self {
        self.owners = owners;
        self
    }
}

impl TimerDispatcher {
    /// Creates a dispatcher reading the current time through `gettime`, which must be a synchronous callback.
    #[track_caller]
    pub fn alloc(name: &str, gettime: GetTime) -> Self {
        if gettime.is_null() || !gettime.context().is_synchronous() {
            fatal!("alloc(): time source must be a synchronous callback (dispatcher={:?})", name);
        }
        debug!("alloc(): timer dispatcher created (name={:?})", name);
        Self(Arc::new(DispatcherInner {
            name: name.to_string(),
            gettime,
            next_seq: AtomicU64::new(0),
            entries: Mutex::new(BTreeMap::new()),
        }))
    }

    /// Allocates a timer and inserts it. Also returns how many pending timers are due before it, so that a caller
    /// blocked on [Self::get_next] can tell a rank of zero means it has to wake earlier.
    #[track_caller]
    pub fn timer_alloc(&self, spec: TimerSpec) -> (Timer, usize) {
        let deadline: Timestamp = match spec.deadline {
            Deadline::At(deadline) => deadline,
            Deadline::After(offset) => self.now().saturating_add(offset),
        };
        let key: TimerKey = TimerKey {
            deadline,
            seq: self.0.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        let slot: TimerSlot = TimerSlot {
            key,
            dispatcher: Arc::downgrade(&self.0),
        };

        let timer: Timer = EventBuilder::with_data(&spec.name, Policy::Once, slot)
            .log_category(&spec.log_category)
            .owners(spec.owners)
            .fired(spec.fired)
            .free_hook(Callback::new(Context::Synchronous, |timer: Timer| Self::cancel(&timer)))
            .alloc();
        // Held by the dispatcher while the timer is pending.
        timer.acquire();

        let rank: usize = {
            let mut entries: MutexGuard<BTreeMap<TimerKey, Timer>> = self.entries();
            let rank: usize = entries.range(..key).count();
            entries.insert(key, timer.clone());
            rank
        };
        trace!(
            "timer_alloc(): dispatcher={:?}, timer={:?}, deadline={:?}, rank={:?}",
            self.0.name,
            spec.name,
            deadline,
            rank
        );
        (timer, rank)
    }

    /// Fires every pending timer whose deadline has passed and returns how many fired. The time source is read once;
    /// timers inserted by synchronous handlers during this call fire in the same pass if they are already due.
    pub fn fire(&self) -> usize {
        let now: Timestamp = self.now();
        let mut fired: usize = 0;
        loop {
            let due: Option<Timer> = {
                let mut entries: MutexGuard<BTreeMap<TimerKey, Timer>> = self.entries();
                match entries.first_key_value() {
                    Some((key, _)) if key.deadline <= now => entries.pop_first().map(|(_, timer)| timer),
                    _ => None,
                }
            };
            match due {
                Some(timer) => {
                    trace!("fire(): dispatcher={:?}, timer={:?}, now={:?}", self.0.name, timer.name(), now);
                    timer.fire();
                    timer.release();
                    fired += 1;
                },
                None => break,
            }
        }
        fired
    }

    /// Earliest pending deadline, either as a timestamp or as the time left until it. `None` if nothing is pending.
    pub fn get_next(&self, base: TimeBase) -> Option<Duration> {
        let next: Timestamp = self.entries().keys().next().map(|key| key.deadline)?;
        match base {
            TimeBase::Absolute => Some(next),
            TimeBase::Relative => Some(next.saturating_sub(self.now())),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.0.gettime.call(())
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Free hook of every timer: drops the pending entry, if the timer has not fired yet.
    fn cancel(timer: &Timer) {
        let slot: &TimerSlot = timer.impl_data();
        let dispatcher: Arc<DispatcherInner> = match slot.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher,
            None => return,
        };
        let removed: Option<Timer> = dispatcher
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&slot.key);
        if let Some(pending) = removed {
            trace!("cancel(): dispatcher={:?}, timer={:?}", dispatcher.name, timer.name());
            pending.release();
        }
    }

    fn entries(&self) -> MutexGuard<BTreeMap<TimerKey, Timer>> {
        self.0.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Debug for TimerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerDispatcher")
            .field("name", &self.0.name)
            .field("pending", &self.len())
            .finish()
    }
}

impl fmt::Debug for TimerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerSlot")
            .field("deadline", &self.key.deadline)
            .field("seq", &self.key.seq)
            .finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
