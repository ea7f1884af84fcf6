// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Reference-counted notifications.
//!
//! An [Event] is created with the number of owners that must each call [Event::free] before it may be torn down. Fires
//! are delivered through a pipeline of callbacks (fire hook, user callback, fired-done hook), each running in its own
//! execution context, and every in-flight delivery holds a reference of its own. When the reference count crosses
//! zero the event steps through its teardown states, ending in [EventState::FreeClosures] where the free-completion
//! callbacks are delivered and every callback the event holds is released.
//!
//! The five implementation hooks and the implementation data `D` are the extension point other primitives (the timer
//! dispatcher, for instance) build on.

mod state;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::state::{
    EventState,
    Policy,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::closure::{
    Callback,
    Context,
};
use ::std::{
    fmt,
    mem,
    panic::Location,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU64,
            AtomicU8,
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

type Hook<D> = Callback<Event<D>>;

/// Delivery and teardown pipelines, generated once when the event is allocated.
struct Stages<D> {
    /// Entry of the delivery pipeline.
    fire: Hook<D>,
    reset: Option<Hook<D>>,
    free: Option<Hook<D>>,
    free_done: Option<Hook<D>>,
}

struct EventInner<D> {
    name: String,
    log_category: String,
    policy: Policy,
    owner_count: usize,
    site: &'static Location<'static>,
    state: AtomicU8,
    fire_count: AtomicU64,
    fire_count_delivered: AtomicU64,
    /// Fire count observed when the current Once/Reset delivery started.
    delivery_target: AtomicU64,
    delivering: AtomicBool,
    armed: AtomicBool,
    ref_count: AtomicUsize,
    free_called_count: AtomicUsize,
    free_slots: Mutex<Vec<Option<Callback<()>>>>,
    // Dropped when the event enters FreeClosures, which breaks cycles through callbacks that capture the event.
    stages: Mutex<Option<Arc<Stages<D>>>>,
    impl_data: D,
}

/// Handle to a reference-counted notification. Cloning the handle does not take a reference in the event's own
/// count: that count tracks owners and in-flight deliveries only.
pub struct Event<D = ()>(Arc<EventInner<D>>);

/// Parameters of [Event::alloc].
pub struct EventBuilder<D = ()> {
    name: String,
    log_category: String,
    policy: Policy,
    owners: usize,
    fired: Hook<D>,
    fire_hook: Hook<D>,
    fired_done_hook: Hook<D>,
    reset_hook: Hook<D>,
    free_hook: Hook<D>,
    free_done_hook: Hook<D>,
    impl_data: D,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl EventBuilder<()> {
    pub fn new(name: &str, policy: Policy) -> Self {
        Self::with_data(name, policy, ())
    }
}

impl<D: Send + Sync + 'static> EventBuilder<D> {
    /// Starts an event carrying implementation data. One owner and no callbacks by default.
    pub fn with_data(name: &str, policy: Policy, impl_data: D) -> Self {
        Self {
            name: name.to_string(),
            log_category: String::new(),
            policy,
            owners: 1,
            fired: Callback::null(),
            fire_hook: Callback::null(),
            fired_done_hook: Callback::null(),
            reset_hook: Callback::null(),
            free_hook: Callback::null(),
            free_done_hook: Callback::null(),
            impl_data,
        }
    }

    pub fn log_category(mut self, log_category: &str) -> Self {
        self.log_category = log_category.to_string();
        self
    }

    /// Number of owners, each of which must call [Event::free] exactly once.
    pub fn owners(mut self, owners: usize) -> Self {
        self.owners = owners;
        self
    }

    /// User callback, run once per delivery.
    pub fn fired(mut self, fired: Callback<Event<D>>) -> Self {
        self.fired = fired;
        self
    }

    /// Runs before the user callback. Absent means pass-through.
    pub fn fire_hook(mut self, hook: Callback<Event<D>>) -> Self {
        self.fire_hook = hook;
        self
    }

    /// Runs after the user callback. Absent means pass-through.
    pub fn fired_done_hook(mut self, hook: Callback<Event<D>>) -> Self {
        self.fired_done_hook = hook;
        self
    }

    /// Runs on every [Event::reset]. Absent means no-op.
    pub fn reset_hook(mut self, hook: Callback<Event<D>>) -> Self {
        self.reset_hook = hook;
        self
    }

    /// Runs on the first [Event::free]. The event is kept alive until it returns.
    pub fn free_hook(mut self, hook: Callback<Event<D>>) -> Self {
        self.free_hook = hook;
        self
    }

    /// Runs once no references are left, before the free-completion callbacks are delivered.
    pub fn free_done_hook(mut self, hook: Callback<Event<D>>) -> Self {
        self.free_done_hook = hook;
        self
    }

    #[track_caller]
    pub fn alloc(self) -> Event<D> {
        Event::alloc(self)
    }
}

impl<D: Send + Sync + 'static> Event<D> {
    /// Allocates an event. An event without owners is a contract violation.
    #[track_caller]
    pub fn alloc(builder: EventBuilder<D>) -> Self {
        let site: &'static Location<'static> = Location::caller();
        if builder.owners == 0 {
            fatal!("alloc(): event needs at least one owner (name={:?}, site={})", builder.name, site);
        }

        let finish: Hook<D> = Callback::new(Context::Synchronous, |event: Event<D>| event.finish_delivery());
        let release: Hook<D> = Callback::new(Context::Synchronous, |event: Event<D>| event.release());
        let fired_done: Hook<D> = Self::stage(builder.fired_done_hook, finish);
        let fired: Hook<D> = Self::stage(builder.fired, fired_done);
        let stages: Stages<D> = Stages {
            fire: Self::entry_stage(Self::stage(builder.fire_hook, fired)),
            reset: Self::release_stage(builder.reset_hook, &release),
            free: Self::release_stage(builder.free_hook, &release),
            free_done: Self::release_stage(builder.free_done_hook, &release),
        };

        trace!(
            "alloc(): name={:?}, category={:?}, policy={:?}, owners={:?}",
            builder.name,
            builder.log_category,
            builder.policy,
            builder.owners
        );
        Self(Arc::new(EventInner {
            name: builder.name,
            log_category: builder.log_category,
            policy: builder.policy,
            owner_count: builder.owners,
            site,
            state: AtomicU8::new(EventState::Initial as u8),
            fire_count: AtomicU64::new(0),
            fire_count_delivered: AtomicU64::new(0),
            delivery_target: AtomicU64::new(0),
            delivering: AtomicBool::new(false),
            armed: AtomicBool::new(true),
            ref_count: AtomicUsize::new(builder.owners),
            free_called_count: AtomicUsize::new(0),
            free_slots: Mutex::new((0..builder.owners).map(|_| None).collect()),
            stages: Mutex::new(Some(Arc::new(stages))),
            impl_data: builder.impl_data,
        }))
    }

    /// Wraps `hook` so that it runs in its own context and then passes control to `next`.
    fn stage(hook: Hook<D>, next: Hook<D>) -> Hook<D> {
        if hook.is_null() {
            return next;
        }
        let context: Context = hook.context().clone();
        Callback::new(context, move |event: Event<D>| {
            hook.invoke(event.clone());
            next.chain(event);
        })
    }

    /// Records where the delivery starts before running `pipeline` in its own context.
    fn entry_stage(pipeline: Hook<D>) -> Hook<D> {
        let context: Context = pipeline.context().clone();
        Callback::new(context, move |event: Event<D>| {
            event.begin_delivery();
            pipeline.invoke(event);
        })
    }

    fn release_stage(hook: Hook<D>, release: &Hook<D>) -> Option<Hook<D>> {
        if hook.is_null() {
            None
        } else {
            Some(Self::stage(hook, release.clone()))
        }
    }

    /// Signals the event. Firing an event that has been torn down is a contract violation.
    #[track_caller]
    pub fn fire(&self) {
        let site: &'static Location<'static> = Location::caller();
        if self.state() != EventState::Initial {
            fatal!("fire(): event fired after teardown (name={:?}, site={})", self.0.name, site);
        }
        let fire_count: u64 = self.0.fire_count.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(
            "fire(): name={:?}, category={:?}, fire_count={:?}",
            self.0.name,
            self.0.log_category,
            fire_count
        );
        match self.0.policy {
            Policy::Multi => self.schedule_delivery(),
            Policy::Once | Policy::Reset => self.try_schedule(),
        }
    }

    /// Re-arms a Reset-policy event, runs the reset hook and delivers fires that arrived while disarmed.
    #[track_caller]
    pub fn reset(&self) {
        let site: &'static Location<'static> = Location::caller();
        if self.0.policy != Policy::Reset {
            fatal!(
                "reset(): event does not have the reset policy (name={:?}, policy={:?}, site={})",
                self.0.name,
                self.0.policy,
                site
            );
        }
        if self.state() != EventState::Initial {
            fatal!("reset(): event reset after teardown (name={:?}, site={})", self.0.name, site);
        }
        trace!("reset(): name={:?}, category={:?}", self.0.name, self.0.log_category);

        self.0.armed.store(true, Ordering::Release);
        if let Some(reset) = &self.stages().reset {
            self.acquire();
            reset.apply(self.clone());
        }
        self.try_schedule();
    }

    /// Gives up one owner's reference. `on_done` is applied once the event has been torn down; a null callback fills
    /// its slot without being applied. Freeing more times than there are owners is a contract violation.
    #[track_caller]
    pub fn free(&self, on_done: Callback<()>) {
        let site: &'static Location<'static> = Location::caller();
        let called: usize = self.0.free_called_count.fetch_add(1, Ordering::AcqRel) + 1;
        if called > self.0.owner_count {
            fatal!(
                "free(): event freed more times than it has owners (name={:?}, owners={:?}, site={})",
                self.0.name,
                self.0.owner_count,
                site
            );
        }
        trace!(
            "free(): name={:?}, category={:?}, free_called={:?}/{:?}",
            self.0.name,
            self.0.log_category,
            called,
            self.0.owner_count
        );

        if let Some(slot) = self.slots().get_mut(called - 1) {
            *slot = Some(on_done);
        }
        if called == 1 {
            if let Some(free) = &self.stages().free {
                self.acquire();
                free.apply(self.clone());
            }
        }
        self.release();
    }

    /// Takes a reference on behalf of the caller. Taking a reference on an event that has none left is a contract
    /// violation.
    pub(crate) fn acquire(&self) {
        let previous: usize = self.0.ref_count.fetch_add(1, Ordering::AcqRel);
        if previous == 0 {
            fatal!("acquire(): event has no references left (name={:?})", self.0.name);
        }
    }

    /// Drops a reference taken with [Self::acquire], running the current state's zero-reference action on the last one.
    pub(crate) fn release(&self) {
        match self.0.ref_count.fetch_sub(1, Ordering::AcqRel) {
            0 => fatal!("release(): reference count underflow (name={:?})", self.0.name),
            1 => self.on_zero(),
            _ => (),
        }
    }

    fn schedule_delivery(&self) {
        let stages: Arc<Stages<D>> = self.stages();
        self.acquire();
        stages.fire.apply(self.clone());
    }

    /// Schedules a Once/Reset delivery if there are undelivered fires and no delivery is in flight.
    fn try_schedule(&self) {
        loop {
            if !self.has_pending_fires() {
                return;
            }
            if self
                .0
                .delivering
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // The in-flight delivery picks these fires up when it finishes.
                return;
            }
            if self.has_pending_fires() {
                self.schedule_delivery();
                return;
            }
            self.0.delivering.store(false, Ordering::Release);
        }
    }

    fn has_pending_fires(&self) -> bool {
        let armed: bool = self.0.policy != Policy::Reset || self.0.armed.load(Ordering::Acquire);
        armed && self.0.fire_count.load(Ordering::Acquire) > self.0.fire_count_delivered.load(Ordering::Acquire)
    }

    /// Fires up to here are covered by the delivery that is starting. A Reset event is disarmed here, so that a
    /// [Self::reset] issued while the delivery runs re-arms it for the next one.
    fn begin_delivery(&self) {
        if self.0.policy == Policy::Reset {
            self.0.armed.store(false, Ordering::Release);
        }
        if self.0.policy != Policy::Multi {
            let target: u64 = self.0.fire_count.load(Ordering::Acquire);
            self.0.delivery_target.store(target, Ordering::Release);
        }
    }

    /// Last stage of the delivery pipeline.
    fn finish_delivery(&self) {
        match self.0.policy {
            Policy::Multi => {
                self.0.fire_count_delivered.fetch_add(1, Ordering::AcqRel);
            },
            Policy::Once | Policy::Reset => {
                let target: u64 = self.0.delivery_target.load(Ordering::Acquire);
                self.0.fire_count_delivered.fetch_max(target, Ordering::AcqRel);
                self.0.delivering.store(false, Ordering::Release);
                // Fires that crept in during this delivery get a delivery of their own, scheduled before this one
                // drops its reference.
                self.try_schedule();
            },
        }
        trace!(
            "finish_delivery(): name={:?}, category={:?}, delivered={:?}",
            self.0.name,
            self.0.log_category,
            self.fire_count_delivered()
        );
        self.release();
    }

    fn on_zero(&self) {
        match self.state() {
            EventState::Initial => {
                let stages: Arc<Stages<D>> = self.stages();
                match &stages.free_done {
                    Some(free_done) => {
                        self.set_state(EventState::ImplFreeDone);
                        self.0.ref_count.store(1, Ordering::Release);
                        free_done.apply(self.clone());
                    },
                    None => self.free_closures(),
                }
            },
            EventState::ImplFreeDone => self.free_closures(),
            EventState::FreeClosures => {
                fatal!("on_zero(): event released after teardown (name={:?})", self.0.name)
            },
        }
    }

    fn free_closures(&self) {
        self.set_state(EventState::FreeClosures);
        let stages: Option<Arc<Stages<D>>> = self.0.stages.lock().unwrap_or_else(PoisonError::into_inner).take();
        let slots: Vec<Option<Callback<()>>> = mem::take(&mut *self.slots());
        for on_done in slots.into_iter().flatten() {
            if !on_done.is_null() {
                on_done.apply(());
            }
        }
        drop(stages);
    }

    fn stages(&self) -> Arc<Stages<D>> {
        match self.0.stages.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            Some(stages) => stages.clone(),
            None => fatal!("stages(): event used after teardown (name={:?})", self.0.name),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Callback<()>>>> {
        self.0.free_slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: EventState) {
        trace!(
            "set_state(): name={:?}, category={:?}, state={:?}",
            self.0.name,
            self.0.log_category,
            state
        );
        self.0.state.store(state as u8, Ordering::Release);
    }
}

impl<D> Event<D> {
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn log_category(&self) -> &str {
        &self.0.log_category
    }

    pub fn policy(&self) -> Policy {
        self.0.policy
    }

    pub fn owner_count(&self) -> usize {
        self.0.owner_count
    }

    pub fn state(&self) -> EventState {
        EventState::from(self.0.state.load(Ordering::Acquire))
    }

    pub fn fire_count(&self) -> u64 {
        self.0.fire_count.load(Ordering::Acquire)
    }

    pub fn fire_count_delivered(&self) -> u64 {
        self.0.fire_count_delivered.load(Ordering::Acquire)
    }

    pub fn ref_count(&self) -> usize {
        self.0.ref_count.load(Ordering::Acquire)
    }

    pub fn free_called_count(&self) -> usize {
        self.0.free_called_count.load(Ordering::Acquire)
    }

    /// Implementation data attached at allocation.
    pub fn impl_data(&self) -> &D {
        &self.0.impl_data
    }

    /// Event identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<D> Clone for Event<D> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<D> fmt::Debug for Event<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.0.name)
            .field("log_category", &self.0.log_category)
            .field("policy", &self.0.policy)
            .field("state", &self.state())
            .field("fire_count", &self.fire_count())
            .field("fire_count_delivered", &self.fire_count_delivered())
            .field("ref_count", &self.ref_count())
            .field("site", &format_args!("{}", self.0.site))
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
