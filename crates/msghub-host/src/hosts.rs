// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plugin registries with fault-isolated dispatch.
//!
//! One registry per role. Registration replaces an existing plugin under
//! the same id (stopping the old one best-effort) and starts the new one
//! immediately when the host is running. Every call across the plugin
//! boundary is isolated: errors and panics are logged with the plugin id
//! and event, and never reach other plugins or the caller that triggered
//! the dispatch.

use crate::api::{MsgHostApi, PluginCtx};
use crate::error::HostError;
use msghub_core::events::{LifecycleEvent, NotificationSink};
use msghub_core::model::Message;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Handler model
// ---------------------------------------------------------------------------

/// A plugin with lifecycle callbacks.
///
/// Callbacks are synchronous; plugins clone the [`PluginCtx`] into spawned
/// tasks for async work. All methods default to no-ops so implementors
/// only override what they care about.
pub trait Plugin: Send + Sync {
    /// Called for every dispatched lifecycle event.
    ///
    /// # Errors
    ///
    /// Errors are logged by the host and never propagated.
    fn on_notifications(
        &self,
        _event: LifecycleEvent,
        _messages: &[Message],
        _ctx: &PluginCtx,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the plugin is registered on a running host (or when
    /// the host starts).
    ///
    /// # Errors
    ///
    /// A start error fails the registration.
    fn start(&self, _ctx: &PluginCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called on unregister and host shutdown. Best-effort.
    ///
    /// # Errors
    ///
    /// Errors are logged by the host and never propagated.
    fn stop(&self, _ctx: &PluginCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Bare-function handler shape.
pub type HandlerFn =
    dyn Fn(LifecycleEvent, &[Message], &PluginCtx) -> anyhow::Result<()> + Send + Sync;

/// A registered handler: either a bare function or a full [`Plugin`].
pub enum PluginHandler {
    /// Stateless event callback; no lifecycle.
    Fn(Box<HandlerFn>),
    /// Full plugin object.
    Plugin(Box<dyn Plugin>),
}

impl PluginHandler {
    /// Wrap a bare closure.
    #[must_use]
    pub fn from_fn(
        handler: impl Fn(LifecycleEvent, &[Message], &PluginCtx) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::Fn(Box::new(handler))
    }

    /// Wrap a plugin object.
    #[must_use]
    pub fn from_plugin(plugin: impl Plugin + 'static) -> Self {
        Self::Plugin(Box::new(plugin))
    }

    fn on_notifications(
        &self,
        event: LifecycleEvent,
        messages: &[Message],
        ctx: &PluginCtx,
    ) -> anyhow::Result<()> {
        match self {
            Self::Fn(handler) => handler(event, messages, ctx),
            Self::Plugin(plugin) => plugin.on_notifications(event, messages, ctx),
        }
    }

    fn start(&self, ctx: &PluginCtx) -> anyhow::Result<()> {
        match self {
            Self::Fn(_) => Ok(()),
            Self::Plugin(plugin) => plugin.start(ctx),
        }
    }

    fn stop(&self, ctx: &PluginCtx) -> anyhow::Result<()> {
        match self {
            Self::Fn(_) => Ok(()),
            Self::Plugin(plugin) => plugin.stop(ctx),
        }
    }
}

// ---------------------------------------------------------------------------
// Core registry
// ---------------------------------------------------------------------------

struct Registered {
    handler: PluginHandler,
    ctx: PluginCtx,
}

struct HostCore {
    role: &'static str,
    plugins: Mutex<BTreeMap<String, Arc<Registered>>>,
    running: AtomicBool,
}

/// Run a plugin callback isolated from the host: catches both errors and
/// panics, reducing them to a logged message.
fn isolated(role: &str, id: &str, what: &str, call: impl FnOnce() -> anyhow::Result<()>) -> Option<String> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            warn!(host = role, plugin = id, event = what, error = %err, "plugin call failed");
            Some(err.to_string())
        }
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            warn!(host = role, plugin = id, event = what, error = %msg, "plugin panicked");
            Some(msg)
        }
    }
}

impl HostCore {
    fn new(role: &'static str) -> Self {
        Self {
            role,
            plugins: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
        }
    }

    fn register(
        &self,
        id: &str,
        handler: PluginHandler,
        ctx: PluginCtx,
    ) -> Result<(), HostError> {
        let registered = Arc::new(Registered { handler, ctx });
        let previous = {
            let mut plugins = self.plugins.lock().expect("host plugins lock");
            plugins.insert(id.to_string(), Arc::clone(&registered))
        };
        if let Some(previous) = previous {
            isolated(self.role, id, "stop", || previous.handler.stop(&previous.ctx));
        }
        if self.running.load(Ordering::SeqCst) {
            if let Some(message) =
                isolated(self.role, id, "start", || registered.handler.start(&registered.ctx))
            {
                let mut plugins = self.plugins.lock().expect("host plugins lock");
                if plugins
                    .get(id)
                    .is_some_and(|current| Arc::ptr_eq(current, &registered))
                {
                    plugins.remove(id);
                }
                return Err(HostError::StartFailed {
                    id: id.to_string(),
                    message,
                });
            }
        }
        debug!(host = self.role, plugin = id, "plugin registered");
        Ok(())
    }

    fn unregister(&self, id: &str) -> bool {
        let removed = self.plugins.lock().expect("host plugins lock").remove(id);
        match removed {
            Some(registered) => {
                isolated(self.role, id, "stop", || {
                    registered.handler.stop(&registered.ctx)
                });
                debug!(host = self.role, plugin = id, "plugin unregistered");
                true
            }
            None => false,
        }
    }

    fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for (id, registered) in self.snapshot() {
            isolated(self.role, &id, "start", || {
                registered.handler.start(&registered.ctx)
            });
        }
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for (id, registered) in self.snapshot() {
            isolated(self.role, &id, "stop", || {
                registered.handler.stop(&registered.ctx)
            });
        }
    }

    fn dispatch(&self, event: LifecycleEvent, messages: &[Message]) {
        for (id, registered) in self.snapshot() {
            isolated(self.role, &id, event.as_str(), || {
                registered.handler.on_notifications(event, messages, &registered.ctx)
            });
        }
    }

    fn snapshot(&self) -> Vec<(String, Arc<Registered>)> {
        self.plugins
            .lock()
            .expect("host plugins lock")
            .iter()
            .map(|(id, registered)| (id.clone(), Arc::clone(registered)))
            .collect()
    }

    fn ids(&self) -> Vec<String> {
        self.plugins
            .lock()
            .expect("host plugins lock")
            .keys()
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Role hosts
// ---------------------------------------------------------------------------

/// Notifier plugin host. Implements [`NotificationSink`], so it plugs
/// directly into the store as the dispatch target.
///
/// Created before the store exists (the store needs it as its sink);
/// [`connect`](Self::connect) wires the API builder in afterwards.
#[derive(Clone)]
pub struct MsgNotify {
    core: Arc<HostCore>,
    api: Arc<OnceLock<MsgHostApi>>,
}

impl Default for MsgNotify {
    fn default() -> Self {
        Self::new()
    }
}

impl MsgNotify {
    /// An empty, unconnected notifier host.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: Arc::new(HostCore::new("notify")),
            api: Arc::new(OnceLock::new()),
        }
    }

    /// Wire in the API builder. The first call wins; later calls are
    /// ignored.
    pub fn connect(&self, api: MsgHostApi) {
        let _ = self.api.set(api);
    }

    /// Register a notifier plugin under `id`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`HostError::NotConnected`] before [`connect`](Self::connect), or
    /// [`HostError::StartFailed`] when the host runs and `start` fails.
    pub fn register(&self, id: &str, handler: PluginHandler) -> Result<(), HostError> {
        let api = self.api.get().ok_or(HostError::NotConnected)?;
        self.core.register(id, handler, api.notify_ctx(id))
    }

    /// Unregister a plugin; idempotent.
    pub fn unregister(&self, id: &str) -> bool {
        self.core.unregister(id)
    }

    /// Start the host and every registered plugin.
    pub fn start(&self) {
        self.core.start();
    }

    /// Stop every plugin best-effort and mark the host stopped.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Dispatch an event named on the control surface.
    ///
    /// # Errors
    ///
    /// [`HostError::UnknownEvent`] when the name is not in the enumerated
    /// set.
    pub fn dispatch_named(&self, name: &str, messages: &[Message]) -> Result<(), HostError> {
        let event: LifecycleEvent = name.parse().map_err(|_| HostError::UnknownEvent {
            name: name.to_string(),
        })?;
        self.core.dispatch(event, messages);
        Ok(())
    }

    /// Registered plugin ids, sorted.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        self.core.ids()
    }
}

impl NotificationSink for MsgNotify {
    fn dispatch(&self, event: LifecycleEvent, messages: &[Message]) {
        self.core.dispatch(event, messages);
    }
}

/// Ingest plugin host: plugins that feed messages into the hub.
#[derive(Clone)]
pub struct MsgIngest {
    core: Arc<HostCore>,
    api: MsgHostApi,
}

impl MsgIngest {
    /// An ingest host minting read-write contexts from `api`.
    #[must_use]
    pub fn new(api: MsgHostApi) -> Self {
        Self {
            core: Arc::new(HostCore::new("ingest")),
            api,
        }
    }

    /// Register an ingest plugin under `id`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// [`HostError::StartFailed`] when the host runs and `start` fails.
    pub fn register(&self, id: &str, handler: PluginHandler) -> Result<(), HostError> {
        self.core.register(id, handler, self.api.ingest_ctx(id))
    }

    /// Unregister a plugin; idempotent.
    pub fn unregister(&self, id: &str) -> bool {
        self.core.unregister(id)
    }

    /// Start the host and every registered plugin.
    pub fn start(&self) {
        self.core.start();
    }

    /// Stop every plugin best-effort and mark the host stopped.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Registered plugin ids, sorted.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        self.core.ids()
    }
}

/// Engagement plugin host: plugins that surface messages to people and
/// execute the actions they pick.
#[derive(Clone)]
pub struct MsgEngage {
    core: Arc<HostCore>,
    api: MsgHostApi,
}

impl MsgEngage {
    /// An engagement host minting action-capable contexts from `api`.
    #[must_use]
    pub fn new(api: MsgHostApi) -> Self {
        Self {
            core: Arc::new(HostCore::new("engage")),
            api,
        }
    }

    /// Register an engagement plugin under `id`, replacing any previous
    /// one.
    ///
    /// # Errors
    ///
    /// [`HostError::StartFailed`] when the host runs and `start` fails.
    pub fn register(&self, id: &str, handler: PluginHandler) -> Result<(), HostError> {
        self.core.register(id, handler, self.api.engage_ctx(id))
    }

    /// Unregister a plugin; idempotent.
    pub fn unregister(&self, id: &str) -> bool {
        self.core.unregister(id)
    }

    /// Start the host and every registered plugin.
    pub fn start(&self) {
        self.core.start();
    }

    /// Stop every plugin best-effort and mark the host stopped.
    pub fn stop(&self) {
        self.core.stop();
    }

    /// Dispatch an event to engagement plugins (e.g. so surfaces refresh).
    pub fn dispatch(&self, event: LifecycleEvent, messages: &[Message]) {
        self.core.dispatch(event, messages);
    }

    /// Registered plugin ids, sorted.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        self.core.ids()
    }
}

/// Pairs one ingest handler with one notify handler under a common id,
/// rolling back the first registration when the second fails.
#[derive(Clone)]
pub struct MsgBridge {
    ingest: MsgIngest,
    notify: MsgNotify,
}

impl MsgBridge {
    /// A bridge over the two hosts.
    #[must_use]
    pub fn new(ingest: MsgIngest, notify: MsgNotify) -> Self {
        Self { ingest, notify }
    }

    /// Register both halves under `id`. When the notify half fails, the
    /// ingest half is unregistered again.
    ///
    /// # Errors
    ///
    /// Whatever either host's registration returns.
    pub fn register(
        &self,
        id: &str,
        ingest_handler: PluginHandler,
        notify_handler: PluginHandler,
    ) -> Result<(), HostError> {
        self.ingest.register(id, ingest_handler)?;
        if let Err(err) = self.notify.register(id, notify_handler) {
            self.ingest.unregister(id);
            return Err(err);
        }
        Ok(())
    }

    /// Unregister both halves; idempotent.
    pub fn unregister(&self, id: &str) -> bool {
        let ingest = self.ingest.unregister(id);
        let notify = self.notify.unregister(id);
        ingest || notify
    }
}
