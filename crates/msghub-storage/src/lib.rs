// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-storage
//!
//! Persistence plumbing under the message hub:
//!
//! - [`backend`] — the byte-level [`StorageBackend`](backend::StorageBackend)
//!   abstraction with native-filesystem and in-memory implementations
//! - [`queue`] — the serial [`OpQueue`](queue::OpQueue) ordering every write
//! - [`document`] — coalescing whole-document JSON persistence

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Byte-level storage backends.
pub mod backend;
/// Coalescing whole-document persistence.
pub mod document;
/// Serial async operation queue.
pub mod queue;

pub use backend::{FsBackend, MemoryBackend, StorageBackend, StorageError};
pub use document::{DocStatus, DocumentStorage, DocumentStorageConfig, PersistMode};
pub use queue::OpQueue;
