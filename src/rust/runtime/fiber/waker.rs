// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::crossbeam_channel::Sender;
use ::futures::task::ArcWake;
use ::std::{
    sync::Arc,
    task::Waker,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Slab index and generation of a fiber. The generation tells a recycled slab slot apart from the fiber that used it
/// before.
pub type ReadyToken = (usize, u64);

/// Wakes a fiber by pushing its token onto the runtime's ready channel. Channel senders may be used from any thread,
/// so a fiber may be woken from outside the runtime that polls it.
pub struct FiberWaker {
    token: ReadyToken,
    ready: Sender<ReadyToken>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FiberWaker {
    pub fn new_waker(token: ReadyToken, ready: Sender<ReadyToken>) -> Waker {
        ::futures::task::waker(Arc::new(Self { token, ready }))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl ArcWake for FiberWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        // The receiver only goes away with the runtime, in which case there is nothing left to wake.
        if arc_self.ready.send(arc_self.token).is_err() {
            trace!("wake_by_ref(): runtime is gone (index={:?})", arc_self.token.0);
        }
    }
}
