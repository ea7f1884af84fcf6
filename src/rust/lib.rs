// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Asynchronous execution substrate: typed callbacks bound to execution contexts, pluggable schedulers running on
//! cooperative fibers, reference-counted events with an explicit teardown state machine, and a timer dispatcher
//! driven by an injectable time source.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

/// Reports a contract violation: logs the cause and panics. Contract violations are programming errors that would
/// otherwise corrupt reference counts or scheduler state, so they are never turned into recoverable errors.
macro_rules! fatal {
    ($($arg:tt)*) => ({
        let cause: String = format!($($arg)*);
        error!("{}", cause);
        panic!("{}", cause)
    });
}

pub mod collections;
pub mod runtime;

pub use crate::runtime::{
    closure::{
        ActivationRecord,
        Callback,
        Context,
    },
    config::{
        ClockKind,
        Config,
    },
    event::{
        Event,
        EventBuilder,
        EventState,
        Policy,
    },
    fail::Fail,
    fiber::FiberRuntime,
    host::{
        Host,
        HostClock,
    },
    scheduler::{
        FiberPoolScheduler,
        MailboxScheduler,
        Scheduler,
        SchedulerRef,
        SchedulerStats,
        WorkerHooks,
    },
    sim::VirtualTimeLoop,
    timer::{
        Deadline,
        GetTime,
        SystemClock,
        TimeBase,
        Timer,
        TimerDispatcher,
        TimerSpec,
        Timestamp,
        VirtualClock,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the enclosing function with an [anyhow::Error] otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    ::anyhow::bail!(r#"ensure failed: `(left == right)`
  left: `{:?}`,
 right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
    ($left:expr, $right:expr,) => ({
        $crate::ensure_eq!($left, $right)
    });
}

/// Ensures that two expressions are not equal, bailing out of the enclosing function with an [anyhow::Error]
/// otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    ::anyhow::bail!(r#"ensure failed: `(left != right)`
  left: `{:?}`,
 right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
    ($left:expr, $right:expr,) => ({
        $crate::ensure_neq!($left, $right)
    });
}
