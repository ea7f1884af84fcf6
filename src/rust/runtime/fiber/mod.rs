// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cooperative fibers. A fiber is a future polled by a [FiberRuntime]; it only gives up the thread at an `.await` that
//! returns pending, so no fiber is ever interrupted mid-function.

mod runtime;
mod waker;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::runtime::{
    FiberId,
    FiberRuntime,
};
