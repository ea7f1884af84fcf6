// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![allow(dead_code)]

//==============================================================================
// Imports
//==============================================================================

use ::fabric_substrate::{
    runtime::logging,
    Callback,
    Context,
    FiberRuntime,
};
use ::std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

//==============================================================================
// Constants
//==============================================================================

/// Upper bound on park/poll rounds when waiting for wakes from other threads.
pub const MAX_ROUNDS: usize = 1000;

pub const ROUND_TIMEOUT: Duration = Duration::from_millis(10);

//==============================================================================
// Structures
//==============================================================================

/// Ordered log of what ran, shareable across threads and schedulers.
pub type Trace = Arc<Mutex<Vec<String>>>;

//==============================================================================
// Standalone Functions
//==============================================================================

pub fn setup() -> FiberRuntime {
    logging::initialize();
    FiberRuntime::new()
}

pub fn record(trace: &Trace, entry: &str) {
    if let Ok(mut trace) = trace.lock() {
        trace.push(entry.to_string());
    }
}

pub fn entries(trace: &Trace) -> Vec<String> {
    trace.lock().map(|t| t.clone()).unwrap_or_default()
}

pub fn strings(entries: &[&str]) -> Vec<String> {
    entries.iter().map(|e| e.to_string()).collect()
}

/// Synchronous callback that records `entry` and ignores its arguments.
pub fn recorder<A: 'static>(trace: &Trace, entry: &str) -> Callback<A> {
    let trace: Trace = trace.clone();
    let entry: String = entry.to_string();
    Callback::new(Context::Synchronous, move |_| record(&trace, &entry))
}

/// Parks and polls `runtime` until `done` holds or the round limit is hit. Returns the final value of `done`.
pub fn poll_until<F: Fn() -> bool>(runtime: &FiberRuntime, done: F) -> bool {
    for _ in 0..MAX_ROUNDS {
        runtime.run_until_stalled();
        if done() {
            return true;
        }
        runtime.park(ROUND_TIMEOUT);
    }
    done()
}
