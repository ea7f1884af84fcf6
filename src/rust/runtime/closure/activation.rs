// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    fmt,
    panic::Location,
};

//======================================================================================================================
// Structures
//======================================================================================================================

type Dispatch = Box<dyn FnOnce() + Send>;

/// Scheduler-owned materialization of one callback application. A record is allocated unbound by
/// [crate::runtime::scheduler::Scheduler::allocate_activation], bound to its function and argument snapshot by the
/// apply path, and consumed by [ActivationRecord::dispatch].
pub struct ActivationRecord {
    /// Bytes of argument snapshot plus function handle.
    size: usize,
    /// Where the callback was applied from.
    site: &'static Location<'static>,
    /// Trampoline invoking the function with the bound arguments.
    dispatch: Option<Dispatch>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ActivationRecord {
    /// Allocates an unbound record.
    #[track_caller]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            site: Location::caller(),
            dispatch: None,
        }
    }

    /// Binds the trampoline and the call site. Binding a record twice is a contract violation.
    pub fn bind(&mut self, site: &'static Location<'static>, dispatch: Dispatch) {
        if self.dispatch.is_some() {
            fatal!("bind(): activation record already bound (site={})", self.site);
        }
        self.site = site;
        self.dispatch = Some(dispatch);
    }

    pub fn is_bound(&self) -> bool {
        self.dispatch.is_some()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn site(&self) -> &'static Location<'static> {
        self.site
    }

    /// Runs the bound function and frees the record.
    pub fn dispatch(mut self) {
        match self.dispatch.take() {
            Some(dispatch) => dispatch(),
            None => fatal!("dispatch(): unbound activation record (site={})", self.site),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Debug for ActivationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivationRecord")
            .field("size", &self.size)
            .field("site", &format_args!("{}", self.site))
            .field("bound", &self.is_bound())
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
