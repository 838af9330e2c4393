// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability facades handed to plugins.
//!
//! [`MsgHostApi`] builds one [`PluginCtx`] per plugin, shaped by the
//! plugin's role: notifiers read, ingesters read and write (and get the
//! factory), engagement plugins read and execute actions. The facades
//! intentionally omit internal concepts — there is no stealth parameter
//! anywhere on this surface.

use crate::controller::{ControllerApi, ControllerRuntime, IdNamespace};
use crate::log::PluginLog;
use msghub_core::factory::{MessageFactory, NewMessage};
use msghub_core::model::Message;
use msghub_core::ValidationError;
use msghub_store::{ExecuteActionRequest, MessageQuery, MsgStore, QueryResult, StoreError};
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Store facades
// ---------------------------------------------------------------------------

/// Read-only store operations, available to every role.
#[derive(Debug, Clone)]
pub struct StoreReadApi {
    store: MsgStore,
}

impl StoreReadApi {
    /// Look up a message by ref.
    pub async fn get_message(&self, ref_key: &str) -> Option<Message> {
        self.store.get_message(ref_key).await
    }

    /// The full message list (defensive copy).
    pub async fn get_messages(&self) -> Vec<Message> {
        self.store.get_messages().await
    }

    /// Run a whitelisted query.
    pub async fn query_messages(&self, query: &MessageQuery) -> QueryResult {
        self.store.query_messages(query).await
    }
}

/// Read-write store operations, available to ingest plugins.
#[derive(Debug, Clone)]
pub struct StoreWriteApi {
    read: StoreReadApi,
}

impl StoreWriteApi {
    /// The read half of this facade.
    #[must_use]
    pub fn reader(&self) -> &StoreReadApi {
        &self.read
    }

    /// Look up a message by ref.
    pub async fn get_message(&self, ref_key: &str) -> Option<Message> {
        self.read.get_message(ref_key).await
    }

    /// The full message list (defensive copy).
    pub async fn get_messages(&self) -> Vec<Message> {
        self.read.get_messages().await
    }

    /// Run a whitelisted query.
    pub async fn query_messages(&self, query: &MessageQuery) -> QueryResult {
        self.read.query_messages(query).await
    }

    /// Create a message.
    ///
    /// # Errors
    ///
    /// See [`MsgStore::add_message`].
    pub async fn add_message(&self, input: NewMessage) -> Result<Message, StoreError> {
        self.read.store.add_message(input).await
    }

    /// Patch a message.
    ///
    /// # Errors
    ///
    /// See [`MsgStore::update_message`].
    pub async fn update_message(
        &self,
        ref_key: &str,
        patch: msghub_core::MessagePatch,
    ) -> Result<Message, StoreError> {
        self.read.store.update_message(ref_key, patch).await
    }

    /// Create or patch, routed by ref existence.
    ///
    /// # Errors
    ///
    /// See [`MsgStore::add_or_update_message`].
    pub async fn add_or_update_message(&self, input: NewMessage) -> Result<Message, StoreError> {
        self.read.store.add_or_update_message(input).await
    }

    /// Remove a message. Returns `false` for an unknown ref.
    pub async fn remove_message(&self, ref_key: &str) -> bool {
        self.read.store.remove_message(ref_key).await
    }

    /// Close a task (or delete a status) whose cause has gone away.
    ///
    /// # Errors
    ///
    /// See [`MsgStore::complete_after_cause_eliminated`].
    pub async fn complete_after_cause_eliminated(
        &self,
        ref_key: &str,
        actor: &str,
    ) -> Result<bool, StoreError> {
        self.read
            .store
            .complete_after_cause_eliminated(ref_key, actor)
            .await
    }
}

/// The store capability as granted to one plugin role.
#[derive(Debug, Clone)]
pub enum StoreFacade {
    /// Read-only access (notifiers, engagement plugins).
    ReadOnly(StoreReadApi),
    /// Read-write access (ingest plugins).
    ReadWrite(StoreWriteApi),
}

impl StoreFacade {
    /// Look up a message by ref.
    pub async fn get_message(&self, ref_key: &str) -> Option<Message> {
        match self {
            Self::ReadOnly(api) => api.get_message(ref_key).await,
            Self::ReadWrite(api) => api.get_message(ref_key).await,
        }
    }

    /// The full message list (defensive copy).
    pub async fn get_messages(&self) -> Vec<Message> {
        match self {
            Self::ReadOnly(api) => api.get_messages().await,
            Self::ReadWrite(api) => api.get_messages().await,
        }
    }

    /// Run a whitelisted query.
    pub async fn query_messages(&self, query: &MessageQuery) -> QueryResult {
        match self {
            Self::ReadOnly(api) => api.query_messages(query).await,
            Self::ReadWrite(api) => api.query_messages(query).await,
        }
    }

    /// The write half, when this role has one.
    #[must_use]
    pub fn writer(&self) -> Option<&StoreWriteApi> {
        match self {
            Self::ReadOnly(_) => None,
            Self::ReadWrite(api) => Some(api),
        }
    }
}

// ---------------------------------------------------------------------------
// Action & factory facades
// ---------------------------------------------------------------------------

/// Action execution, available to engagement plugins only.
#[derive(Debug, Clone)]
pub struct ActionApi {
    store: MsgStore,
}

impl ActionApi {
    /// Execute one of a message's offered actions on behalf of an actor.
    ///
    /// # Errors
    ///
    /// See [`MsgStore::execute_action`].
    pub async fn execute(&self, request: ExecuteActionRequest) -> Result<Message, StoreError> {
        self.store.execute_action(request).await
    }
}

/// Message creation, available to ingest plugins only.
///
/// Only the creation path is exposed; `created_at` is always the current
/// clock instant.
#[derive(Debug, Clone)]
pub struct FactoryApi {
    factory: MessageFactory,
}

impl FactoryApi {
    /// Validate and normalize creation input.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] on hard-invalid input.
    pub fn create_message(&self, input: NewMessage) -> Result<Message, ValidationError> {
        self.factory.create(input)
    }
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Optional translation capability.
pub trait Translate: Send + Sync {
    /// Translate a key; `None` falls back to the key itself.
    fn translate(&self, key: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// PluginApi & PluginCtx
// ---------------------------------------------------------------------------

/// The capability record handed to one plugin.
#[derive(Clone)]
pub struct PluginApi {
    /// Prefix-bound logger.
    pub log: PluginLog,
    /// Store access, shaped by role.
    pub store: StoreFacade,
    /// Action execution; engagement plugins only.
    pub action: Option<ActionApi>,
    /// Message creation; ingest plugins only.
    pub factory: Option<FactoryApi>,
    /// The controller-runtime capability.
    pub controller: ControllerApi,
    /// Id helpers for the hub's namespace.
    pub ids: IdNamespace,
    /// Optional translation capability.
    pub i18n: Option<Arc<dyn Translate>>,
}

impl fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginApi")
            .field("log", &self.log)
            .field("has_action", &self.action.is_some())
            .field("has_factory", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

/// The context a plugin receives with every callback.
#[derive(Debug, Clone)]
pub struct PluginCtx {
    /// The plugin's registered id.
    pub id: String,
    /// The plugin's capabilities.
    pub api: PluginApi,
}

/// Builder of role-shaped plugin contexts.
#[derive(Clone)]
pub struct MsgHostApi {
    store: MsgStore,
    factory: MessageFactory,
    controller: Arc<dyn ControllerRuntime>,
    send_to_timeout_ms: u64,
    i18n: Option<Arc<dyn Translate>>,
}

impl fmt::Debug for MsgHostApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgHostApi")
            .field("namespace", &self.controller.own_namespace())
            .finish_non_exhaustive()
    }
}

impl MsgHostApi {
    /// Create the context builder.
    #[must_use]
    pub fn new(
        store: MsgStore,
        factory: MessageFactory,
        controller: Arc<dyn ControllerRuntime>,
        send_to_timeout_ms: u64,
    ) -> Self {
        Self {
            store,
            factory,
            controller,
            send_to_timeout_ms,
            i18n: None,
        }
    }

    /// Attach a translation capability.
    #[must_use]
    pub fn with_i18n(mut self, i18n: Arc<dyn Translate>) -> Self {
        self.i18n = Some(i18n);
        self
    }

    fn base(&self, plugin_id: &str, store: StoreFacade) -> PluginApi {
        PluginApi {
            log: PluginLog::new(plugin_id),
            store,
            action: None,
            factory: None,
            controller: ControllerApi::new(Arc::clone(&self.controller), self.send_to_timeout_ms),
            ids: IdNamespace::new(self.controller.own_namespace()),
            i18n: self.i18n.clone(),
        }
    }

    fn read_facade(&self) -> StoreFacade {
        StoreFacade::ReadOnly(StoreReadApi {
            store: self.store.clone(),
        })
    }

    fn write_facade(&self) -> StoreFacade {
        StoreFacade::ReadWrite(StoreWriteApi {
            read: StoreReadApi {
                store: self.store.clone(),
            },
        })
    }

    /// Context for a notifier plugin: read-only store.
    #[must_use]
    pub fn notify_ctx(&self, plugin_id: &str) -> PluginCtx {
        PluginCtx {
            id: plugin_id.to_string(),
            api: self.base(plugin_id, self.read_facade()),
        }
    }

    /// Context for an ingest plugin: read-write store plus the factory.
    #[must_use]
    pub fn ingest_ctx(&self, plugin_id: &str) -> PluginCtx {
        let mut api = self.base(plugin_id, self.write_facade());
        api.factory = Some(FactoryApi {
            factory: self.factory.clone(),
        });
        PluginCtx {
            id: plugin_id.to_string(),
            api,
        }
    }

    /// Context for an engagement plugin: read-only store plus actions.
    #[must_use]
    pub fn engage_ctx(&self, plugin_id: &str) -> PluginCtx {
        let mut api = self.base(plugin_id, self.read_facade());
        api.action = Some(ActionApi {
            store: self.store.clone(),
        });
        PluginCtx {
            id: plugin_id.to_string(),
            api,
        }
    }
}
