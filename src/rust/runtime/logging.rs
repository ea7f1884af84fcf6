// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::OnceLock;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function. Holds the handle so that the logger outlives the caller.
static LOGGER: OnceLock<Option<LoggerHandle>> = OnceLock::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The log specification is read from `RUST_LOG` and logging is off otherwise. Safe to
/// call any number of times, from any thread.
pub fn initialize() {
    LOGGER.get_or_init(|| match Logger::try_with_env_or_str("off").and_then(|logger| logger.start()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("initialize(): failed to start logger ({:?})", e);
            None
        },
    });
}
