// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-store
//!
//! The authoritative message store. Holds the full in-memory list and the
//! ref index, serializes every mutation behind one async mutex, schedules
//! persistence through the coalescing document storage, records archive
//! events, dispatches lifecycle notifications, and owns the single timer
//! driving `due` and `expired` handling.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Whitelisted query surface.
pub mod query;
/// The store itself.
pub mod store;

pub use query::{
    InClause, MessageQuery, Page, QueryMeta, QueryResult, SortDir, SortField, SortKey, WhereClause,
};
pub use store::{ExecuteActionRequest, MsgStore, StoreConfig, StoreError};
