// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub — message-hub engine for a home-automation controller.
//!
//! This root crate re-exports the workspace members so embedders can depend
//! on a single crate:
//!
//! - [`core`] — message model, codec, patches, factory
//! - [`config`] — typed configuration for every subsystem
//! - [`storage`] — storage backends, serial op queue, document persistence
//! - [`archive`] — per-ref append-only weekly-segmented event log
//! - [`policy`] — quiet-hours notification policy
//! - [`stats`] — counters and the persistent daily rollup
//! - [`store`] — the authoritative message store and scheduler
//! - [`host`] — plugin registries and capability facades
//! - [`telemetry`] — tracing subscriber setup

#![deny(unsafe_code)]

pub use msghub_archive as archive;
pub use msghub_config as config;
pub use msghub_core as core;
pub use msghub_host as host;
pub use msghub_policy as policy;
pub use msghub_stats as stats;
pub use msghub_storage as storage;
pub use msghub_store as store;
pub use msghub_telemetry as telemetry;
