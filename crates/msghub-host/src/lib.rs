// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-host
//!
//! The plugin surface of the message hub:
//!
//! - [`controller`] — the abstracted controller-runtime capability
//!   (objects, states, subscriptions, files, `send_to`) plus id helpers
//!   and the storage-backend adapter over the controller file namespace
//! - [`api`] — the capability facades handed to plugins, shaped by role
//! - [`hosts`] — the ingest/notify/engage/bridge registries with
//!   fault-isolated dispatch
//! - [`log`] — the prefix-bound plugin logger

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Capability facades and plugin context.
pub mod api;
/// Controller-runtime capability surface.
pub mod controller;
/// Typed host errors.
pub mod error;
/// Plugin registries.
pub mod hosts;
/// Plugin logging facade.
pub mod log;

pub use api::{
    ActionApi, FactoryApi, MsgHostApi, PluginApi, PluginCtx, StoreFacade, StoreReadApi,
    StoreWriteApi, Translate,
};
pub use controller::{
    ControllerApi, ControllerError, ControllerFileBackend, ControllerRuntime, IdNamespace,
    MockController,
};
pub use error::HostError;
pub use hosts::{MsgBridge, MsgEngage, MsgIngest, MsgNotify, Plugin, PluginHandler};
pub use log::PluginLog;
