// SPDX-License-Identifier: MIT OR Apache-2.0
//! msghub-core
//!
//! The message model and the pure logic around it:
//!
//! - [`model`] — the canonical [`Message`](model::Message) entity and its
//!   nested value types
//! - [`codec`] — JSON encoding that preserves `Map` values via a reserved
//!   type marker
//! - [`patch`] — the null-as-remove patch algebra
//! - [`factory`] — validation and normalization for creation and patching
//! - [`clock`] — injectable time source
//! - [`events`] — lifecycle event vocabulary and the notification sink
//! - [`constants`] — enumeration surface for the controller boundary

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Injectable wall-clock abstraction.
pub mod clock;
/// Map-preserving JSON codec.
pub mod codec;
/// Enumeration surface for the controller boundary.
pub mod constants;
/// Typed validation errors.
pub mod error;
/// Lifecycle event vocabulary and notification sink trait.
pub mod events;
/// Message creation and patch application.
pub mod factory;
/// The canonical message entity.
pub mod model;
/// Null-as-remove patch types.
pub mod patch;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ValidationError;
pub use events::{LifecycleEvent, NotificationSink};
pub use factory::{MessageFactory, PatchOutcome};
pub use model::{
    Attachment, AttachmentType, Audience, Details, Lifecycle, LifecycleState, ListItem, Message,
    MessageAction, MetricSample, MetricsMap, MsgKind, NotifiedAt, Origin, OriginType, Progress,
    Severity, Timing,
};
pub use patch::{ArrayPatch, MessagePatch, PatchField};
