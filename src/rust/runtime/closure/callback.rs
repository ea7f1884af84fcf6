// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    closure::ActivationRecord,
    scheduler::{
        self,
        SchedulerRef,
    },
};
use ::std::{
    fmt,
    mem,
    panic::Location,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Execution context a callback is bound to.
#[derive(Clone)]
pub enum Context {
    /// Run on the caller's stack before `apply` returns.
    Synchronous,
    /// Resolved once, when the callback is created, to the scheduler that is current at that moment.
    AtCreation,
    /// Resolved at every apply to the scheduler that is current at that moment.
    Any,
    /// Run on the caller's stack; matches any context when chaining.
    AnyOrSynchronous,
    /// A concrete scheduler.
    Scheduler(SchedulerRef),
}

type Function<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// Deferred work: a function, with its captured environment, bound to an execution context. `A` is the argument tuple
/// (any arity) and `R` the return type, which is only observable through synchronous [Callback::call].
///
/// A callback owns whatever its closure captured by move. Arguments handed to a non-synchronous apply are moved into
/// the activation record and owned by the scheduler until the function runs.
pub struct Callback<A, R = ()> {
    context: Context,
    function: Option<Function<A, R>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Context {
    /// Binds to `scheduler`.
    pub fn scheduler(scheduler: &SchedulerRef) -> Self {
        Self::Scheduler(scheduler.clone())
    }

    /// Returns true if applying in this context runs the function on the caller's stack.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, Self::Synchronous | Self::AnyOrSynchronous)
    }

    /// Returns true if code running in the current context may run a callback bound to `self` in place.
    fn matches_current(&self) -> bool {
        match self {
            Self::Synchronous | Self::AnyOrSynchronous => true,
            Self::Any => scheduler::current().is_some(),
            Self::Scheduler(target) => match scheduler::current() {
                Some(current) => scheduler::same_scheduler(target, &current),
                None => false,
            },
            Self::AtCreation => false,
        }
    }
}

impl<A, R> Callback<A, R> {
    /// Creates a callback. [Context::AtCreation] is resolved here, and creating such a callback while no scheduler is
    /// current is a contract violation.
    #[track_caller]
    pub fn new<F>(context: Context, function: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let context: Context = match context {
            Context::AtCreation => match scheduler::current() {
                Some(current) => Context::Scheduler(current),
                None => fatal!(
                    "new(): callback bound to the creating scheduler outside of any scheduler (site={})",
                    Location::caller()
                ),
            },
            context => context,
        };
        Self {
            context,
            function: Some(Arc::new(function)),
        }
    }

    /// Creates the null callback, the sentinel for "no callback installed".
    pub fn null() -> Self {
        Self {
            context: Context::Synchronous,
            function: None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.function.is_none()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Calls a synchronous callback and returns its result.
    #[track_caller]
    pub fn call(&self, args: A) -> R {
        if !self.context.is_synchronous() {
            fatal!(
                "call(): callback bound to {:?} cannot return a value (site={})",
                self.context,
                Location::caller()
            );
        }
        self.invoke(args)
    }

    /// Runs the function in place, whatever the context.
    #[track_caller]
    pub(crate) fn invoke(&self, args: A) -> R {
        match &self.function {
            Some(function) => function(args),
            None => fatal!("invoke(): null callback applied (site={})", Location::caller()),
        }
    }
}

impl<A: Send + 'static> Callback<A> {
    /// Applies the callback. Synchronous contexts run the function before returning. Any other context hands an
    /// activation record to its scheduler and returns without running user code.
    #[track_caller]
    pub fn apply(&self, args: A) {
        let site: &'static Location<'static> = Location::caller();
        let function: Function<A, ()> = match &self.function {
            Some(function) => function.clone(),
            None => fatal!("apply(): null callback applied (site={})", site),
        };

        match &self.context {
            Context::Synchronous | Context::AnyOrSynchronous => function(args),
            Context::Any => match scheduler::current() {
                Some(current) => Self::enqueue(&current, function, args, site),
                None => fatal!("apply(): callback bound to any scheduler applied outside of one (site={})", site),
            },
            Context::Scheduler(target) => Self::enqueue(target, function, args, site),
            Context::AtCreation => unreachable!("creation context is resolved in Callback::new()"),
        }
    }

    /// Passes control to this callback: runs it in place when the current context already matches its context, and
    /// applies it otherwise.
    #[track_caller]
    pub fn chain(&self, args: A) {
        if self.context.matches_current() {
            self.invoke(args)
        } else {
            self.apply(args)
        }
    }

    fn enqueue(target: &SchedulerRef, function: Function<A, ()>, args: A, site: &'static Location<'static>) {
        let size: usize = mem::size_of::<A>() + mem::size_of::<Function<A, ()>>();
        let mut record: ActivationRecord = target.allocate_activation(size);
        record.bind(site, Box::new(move || function(args)));
        target.enqueue_activation(record);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            function: self.function.clone(),
        }
    }
}

impl<A, R> Default for Callback<A, R> {
    fn default() -> Self {
        Self::null()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synchronous => write!(f, "Synchronous"),
            Self::AtCreation => write!(f, "AtCreation"),
            Self::Any => write!(f, "Any"),
            Self::AnyOrSynchronous => write!(f, "AnyOrSynchronous"),
            Self::Scheduler(scheduler) => write!(f, "Scheduler({:?})", scheduler.name()),
        }
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("context", &self.context)
            .field("null", &self.is_null())
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
