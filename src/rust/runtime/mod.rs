// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod closure;
pub mod config;
pub mod event;
pub mod fail;
pub mod fiber;
pub mod host;
pub mod logging;
pub mod scheduler;
pub mod sim;
pub mod timer;
