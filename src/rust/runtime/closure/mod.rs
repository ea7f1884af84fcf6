// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod activation;
mod callback;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    activation::ActivationRecord,
    callback::{
        Callback,
        Context,
    },
};
