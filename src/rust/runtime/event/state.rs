// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Structures
//======================================================================================================================

/// Delivery policy of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Fires that arrive while a delivery is pending are coalesced into it or into one follow-up delivery.
    Once,
    /// Every fire is delivered.
    Multi,
    /// Like [Policy::Once], but each delivery disarms the event until it is reset.
    Reset,
}

/// Teardown state of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventState {
    /// Owners or in-flight deliveries still hold references.
    Initial = 0,
    /// The free-done hook is running.
    ImplFreeDone = 1,
    /// Terminal: completion callbacks delivered, callbacks and hooks released.
    FreeClosures = 2,
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<u8> for EventState {
    fn from(value: u8) -> Self {
        match value {
            0 => EventState::Initial,
            1 => EventState::ImplFreeDone,
            _ => EventState::FreeClosures,
        }
    }
}
