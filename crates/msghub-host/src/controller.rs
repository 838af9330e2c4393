// SPDX-License-Identifier: MIT OR Apache-2.0
//! The abstracted controller-runtime capability.
//!
//! The hub never talks to the home-automation controller directly; it
//! consumes this trait. Plugins receive a [`ControllerApi`] facade that
//! groups the surface the way plugins think about it (objects, states,
//! subscriptions, files, messaging) and enforces the `send_to` rules:
//! non-empty target and command, no self-addressing, and a deadline.

use async_trait::async_trait;
use msghub_storage::{StorageBackend, StorageError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors produced by controller calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// `send_to` requires a target instance.
    #[error("send_to target must not be empty")]
    EmptyTarget,

    /// `send_to` requires a command.
    #[error("send_to command must not be empty")]
    EmptyCommand,

    /// `send_to` must not address the hub's own instance.
    #[error("refusing to send_to own instance '{instance}'")]
    SelfAddressed {
        /// The rejected instance id.
        instance: String,
    },

    /// No response arrived within the deadline.
    #[error("send_to '{instance}' timed out after {timeout_ms} ms")]
    Timeout {
        /// The addressed instance.
        instance: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// The controller reported a failure.
    #[error("controller call failed: {message}")]
    Backend {
        /// Stringified cause.
        message: String,
    },
}

impl ControllerError {
    /// Wrap an arbitrary failure message.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// The capability surface the hub consumes from its host runtime.
///
/// Implementations adapt a concrete controller; [`MockController`] is the
/// in-memory implementation used by tests.
#[async_trait]
pub trait ControllerRuntime: Send + Sync + fmt::Debug {
    /// The hub's own instance namespace (e.g. `msghub.0`).
    fn own_namespace(&self) -> &str;

    // -- objects -------------------------------------------------------------

    /// Read an object from the hub's namespace.
    async fn get_object(&self, id: &str) -> Result<Option<Value>, ControllerError>;
    /// Create or replace an object in the hub's namespace.
    async fn set_object(&self, id: &str, value: Value) -> Result<(), ControllerError>;
    /// Delete an object from the hub's namespace.
    async fn delete_object(&self, id: &str) -> Result<(), ControllerError>;
    /// Merge a partial object into the hub's namespace.
    async fn extend_object(&self, id: &str, patch: Value) -> Result<(), ControllerError>;
    /// Query an object view (design document query).
    async fn get_object_view(
        &self,
        design: &str,
        view: &str,
        params: Value,
    ) -> Result<Value, ControllerError>;
    /// Read objects outside the hub's namespace by pattern.
    async fn get_foreign_objects(&self, pattern: &str)
    -> Result<BTreeMap<String, Value>, ControllerError>;
    /// Read one object outside the hub's namespace.
    async fn get_foreign_object(&self, id: &str) -> Result<Option<Value>, ControllerError>;
    /// Merge a partial object outside the hub's namespace.
    async fn extend_foreign_object(&self, id: &str, patch: Value) -> Result<(), ControllerError>;

    // -- states --------------------------------------------------------------

    /// Set a state in the hub's namespace.
    async fn set_state(&self, id: &str, value: Value, ack: bool) -> Result<(), ControllerError>;
    /// Set a state outside the hub's namespace.
    async fn set_foreign_state(
        &self,
        id: &str,
        value: Value,
        ack: bool,
    ) -> Result<(), ControllerError>;
    /// Read a state outside the hub's namespace.
    async fn get_foreign_state(&self, id: &str) -> Result<Option<Value>, ControllerError>;

    // -- subscriptions -------------------------------------------------------

    /// Subscribe to state changes in the hub's namespace.
    async fn subscribe_states(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Undo [`subscribe_states`](Self::subscribe_states).
    async fn unsubscribe_states(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Subscribe to object changes in the hub's namespace.
    async fn subscribe_objects(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Undo [`subscribe_objects`](Self::subscribe_objects).
    async fn unsubscribe_objects(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Subscribe to foreign state changes.
    async fn subscribe_foreign_states(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Undo [`subscribe_foreign_states`](Self::subscribe_foreign_states).
    async fn unsubscribe_foreign_states(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Subscribe to foreign object changes.
    async fn subscribe_foreign_objects(&self, pattern: &str) -> Result<(), ControllerError>;
    /// Undo [`subscribe_foreign_objects`](Self::subscribe_foreign_objects).
    async fn unsubscribe_foreign_objects(&self, pattern: &str) -> Result<(), ControllerError>;

    // -- files ---------------------------------------------------------------

    /// Read a file from the controller file namespace.
    async fn read_file(&self, dir: &str, path: &str) -> Result<Option<Vec<u8>>, ControllerError>;
    /// Write a file into the controller file namespace.
    async fn write_file(&self, dir: &str, path: &str, bytes: &[u8])
    -> Result<(), ControllerError>;
    /// Create a directory in the controller file namespace.
    async fn mkdir(&self, dir: &str, path: &str) -> Result<(), ControllerError>;
    /// Rename a file within the controller file namespace.
    async fn rename_file(&self, dir: &str, from: &str, to: &str) -> Result<(), ControllerError>;
    /// Delete a file from the controller file namespace.
    async fn delete_file(&self, dir: &str, path: &str) -> Result<(), ControllerError>;
    /// List the names directly under a directory of the file namespace.
    async fn read_dir(&self, dir: &str, path: &str) -> Result<Vec<String>, ControllerError>;

    // -- messaging -----------------------------------------------------------

    /// Send a command to another instance and await its response.
    async fn send_to(
        &self,
        instance: &str,
        command: &str,
        message: Value,
    ) -> Result<Value, ControllerError>;
}

// ---------------------------------------------------------------------------
// Id helpers
// ---------------------------------------------------------------------------

/// Helpers translating between namespaced and relative ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdNamespace {
    namespace: String,
}

impl IdNamespace {
    /// Helpers for the given namespace (e.g. `msghub.0`).
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// The bound namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Strip the namespace prefix: `msghub.0.list.x` becomes `list.x`.
    /// Ids outside the namespace pass through unchanged.
    #[must_use]
    pub fn to_own_id(&self, id: &str) -> String {
        let id = id.trim();
        id.strip_prefix(&format!("{}.", self.namespace))
            .unwrap_or(id)
            .to_string()
    }

    /// Prepend the namespace: `list.x` becomes `msghub.0.list.x`. Already
    /// namespaced ids pass through unchanged.
    #[must_use]
    pub fn to_full_id(&self, id: &str) -> String {
        let id = id.trim();
        if id.starts_with(&format!("{}.", self.namespace)) || id == self.namespace {
            id.to_string()
        } else {
            format!("{}.{id}", self.namespace)
        }
    }
}

// ---------------------------------------------------------------------------
// ControllerApi facade
// ---------------------------------------------------------------------------

/// The controller capability as handed to plugins.
///
/// Thin grouped accessors over the runtime, plus the `send_to` contract:
/// typed errors for an empty target/command or self-addressing, and a
/// deadline (default from host config) after which the call rejects.
#[derive(Clone)]
pub struct ControllerApi {
    runtime: Arc<dyn ControllerRuntime>,
    default_timeout_ms: u64,
}

impl fmt::Debug for ControllerApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerApi")
            .field("namespace", &self.runtime.own_namespace())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .finish()
    }
}

impl ControllerApi {
    /// Facade over `runtime` with the given default `send_to` deadline.
    #[must_use]
    pub fn new(runtime: Arc<dyn ControllerRuntime>, default_timeout_ms: u64) -> Self {
        Self {
            runtime,
            default_timeout_ms,
        }
    }

    /// The underlying runtime (for adapters such as
    /// [`ControllerFileBackend`]).
    #[must_use]
    pub fn runtime(&self) -> Arc<dyn ControllerRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Object operations.
    #[must_use]
    pub fn objects(&self) -> ObjectsApi<'_> {
        ObjectsApi { api: self }
    }

    /// State operations.
    #[must_use]
    pub fn states(&self) -> StatesApi<'_> {
        StatesApi { api: self }
    }

    /// Subscription operations.
    #[must_use]
    pub fn subscriptions(&self) -> SubscriptionsApi<'_> {
        SubscriptionsApi { api: self }
    }

    /// File operations.
    #[must_use]
    pub fn files(&self) -> FilesApi<'_> {
        FilesApi { api: self }
    }

    /// Send `command` to `instance` and await the response, enforcing the
    /// messaging contract.
    ///
    /// # Errors
    ///
    /// [`ControllerError::EmptyTarget`], [`ControllerError::EmptyCommand`],
    /// [`ControllerError::SelfAddressed`], [`ControllerError::Timeout`],
    /// or whatever the runtime reports.
    pub async fn send_to(
        &self,
        instance: &str,
        command: &str,
        message: Value,
        timeout_ms: Option<u64>,
    ) -> Result<Value, ControllerError> {
        let instance = instance.trim();
        if instance.is_empty() {
            return Err(ControllerError::EmptyTarget);
        }
        if command.trim().is_empty() {
            return Err(ControllerError::EmptyCommand);
        }
        if instance == self.runtime.own_namespace() {
            return Err(ControllerError::SelfAddressed {
                instance: instance.to_string(),
            });
        }
        let timeout_ms = timeout_ms.unwrap_or(self.default_timeout_ms);
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.runtime.send_to(instance, command, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ControllerError::Timeout {
                instance: instance.to_string(),
                timeout_ms,
            }),
        }
    }
}

/// Object operations of a [`ControllerApi`].
pub struct ObjectsApi<'a> {
    api: &'a ControllerApi,
}

impl ObjectsApi<'_> {
    /// Read an object from the hub's namespace.
    pub async fn get(&self, id: &str) -> Result<Option<Value>, ControllerError> {
        self.api.runtime.get_object(id).await
    }

    /// Create or replace an object.
    pub async fn set(&self, id: &str, value: Value) -> Result<(), ControllerError> {
        self.api.runtime.set_object(id, value).await
    }

    /// Delete an object.
    pub async fn delete(&self, id: &str) -> Result<(), ControllerError> {
        self.api.runtime.delete_object(id).await
    }

    /// Merge a partial object.
    pub async fn extend(&self, id: &str, patch: Value) -> Result<(), ControllerError> {
        self.api.runtime.extend_object(id, patch).await
    }

    /// Query an object view.
    pub async fn get_view(
        &self,
        design: &str,
        view: &str,
        params: Value,
    ) -> Result<Value, ControllerError> {
        self.api.runtime.get_object_view(design, view, params).await
    }

    /// Read foreign objects by pattern.
    pub async fn get_foreign(
        &self,
        pattern: &str,
    ) -> Result<BTreeMap<String, Value>, ControllerError> {
        self.api.runtime.get_foreign_objects(pattern).await
    }

    /// Read one foreign object.
    pub async fn get_foreign_one(&self, id: &str) -> Result<Option<Value>, ControllerError> {
        self.api.runtime.get_foreign_object(id).await
    }

    /// Merge a partial foreign object.
    pub async fn extend_foreign(&self, id: &str, patch: Value) -> Result<(), ControllerError> {
        self.api.runtime.extend_foreign_object(id, patch).await
    }
}

/// State operations of a [`ControllerApi`].
pub struct StatesApi<'a> {
    api: &'a ControllerApi,
}

impl StatesApi<'_> {
    /// Set a state in the hub's namespace.
    pub async fn set(&self, id: &str, value: Value, ack: bool) -> Result<(), ControllerError> {
        self.api.runtime.set_state(id, value, ack).await
    }

    /// Set a foreign state.
    pub async fn set_foreign(
        &self,
        id: &str,
        value: Value,
        ack: bool,
    ) -> Result<(), ControllerError> {
        self.api.runtime.set_foreign_state(id, value, ack).await
    }

    /// Read a foreign state.
    pub async fn get_foreign(&self, id: &str) -> Result<Option<Value>, ControllerError> {
        self.api.runtime.get_foreign_state(id).await
    }
}

/// Subscription operations of a [`ControllerApi`].
pub struct SubscriptionsApi<'a> {
    api: &'a ControllerApi,
}

impl SubscriptionsApi<'_> {
    /// Subscribe to state changes in the hub's namespace.
    pub async fn states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.subscribe_states(pattern).await
    }

    /// Undo [`states`](Self::states).
    pub async fn unsubscribe_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.unsubscribe_states(pattern).await
    }

    /// Subscribe to object changes in the hub's namespace.
    pub async fn objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.subscribe_objects(pattern).await
    }

    /// Undo [`objects`](Self::objects).
    pub async fn unsubscribe_objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.unsubscribe_objects(pattern).await
    }

    /// Subscribe to foreign state changes.
    pub async fn foreign_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.subscribe_foreign_states(pattern).await
    }

    /// Undo [`foreign_states`](Self::foreign_states).
    pub async fn unsubscribe_foreign_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.unsubscribe_foreign_states(pattern).await
    }

    /// Subscribe to foreign object changes.
    pub async fn foreign_objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.api.runtime.subscribe_foreign_objects(pattern).await
    }

    /// Undo [`foreign_objects`](Self::foreign_objects).
    pub async fn unsubscribe_foreign_objects(
        &self,
        pattern: &str,
    ) -> Result<(), ControllerError> {
        self.api.runtime.unsubscribe_foreign_objects(pattern).await
    }
}

/// File operations of a [`ControllerApi`].
pub struct FilesApi<'a> {
    api: &'a ControllerApi,
}

impl FilesApi<'_> {
    /// Read a file.
    pub async fn read(&self, dir: &str, path: &str) -> Result<Option<Vec<u8>>, ControllerError> {
        self.api.runtime.read_file(dir, path).await
    }

    /// Write a file.
    pub async fn write(
        &self,
        dir: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), ControllerError> {
        self.api.runtime.write_file(dir, path, bytes).await
    }

    /// Create a directory.
    pub async fn mkdir(&self, dir: &str, path: &str) -> Result<(), ControllerError> {
        self.api.runtime.mkdir(dir, path).await
    }

    /// Rename a file.
    pub async fn rename(&self, dir: &str, from: &str, to: &str) -> Result<(), ControllerError> {
        self.api.runtime.rename_file(dir, from, to).await
    }

    /// Delete a file.
    pub async fn delete(&self, dir: &str, path: &str) -> Result<(), ControllerError> {
        self.api.runtime.delete_file(dir, path).await
    }
}

// ---------------------------------------------------------------------------
// Storage backend over the controller file namespace
// ---------------------------------------------------------------------------

/// [`StorageBackend`] adapter over the controller file namespace. This is
/// the production "host-file" storage the archive and document storage
/// fall back to when native filesystem access is unavailable.
pub struct ControllerFileBackend {
    runtime: Arc<dyn ControllerRuntime>,
    dir: String,
}

impl fmt::Debug for ControllerFileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerFileBackend")
            .field("dir", &self.dir)
            .finish()
    }
}

impl ControllerFileBackend {
    /// Backend rooted at `dir` of the controller file namespace.
    #[must_use]
    pub fn new(runtime: Arc<dyn ControllerRuntime>, dir: impl Into<String>) -> Self {
        Self {
            runtime,
            dir: dir.into(),
        }
    }
}

fn to_storage_err(path: &str, err: ControllerError) -> StorageError {
    StorageError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl StorageBackend for ControllerFileBackend {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.runtime
            .read_file(&self.dir, path)
            .await
            .map_err(|err| to_storage_err(path, err))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.runtime
            .write_file(&self.dir, path, bytes)
            .await
            .map_err(|err| to_storage_err(path, err))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.runtime
            .delete_file(&self.dir, path)
            .await
            .map_err(|err| to_storage_err(path, err))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        self.runtime
            .read_dir(&self.dir, dir)
            .await
            .map_err(|err| to_storage_err(dir, err))
    }

    async fn ensure_dir(&self, dir: &str) -> Result<(), StorageError> {
        self.runtime
            .mkdir(&self.dir, dir)
            .await
            .map_err(|err| to_storage_err(dir, err))
    }

    fn describe(&self) -> String {
        format!("controller-files:{}", self.dir)
    }
}

// ---------------------------------------------------------------------------
// MockController
// ---------------------------------------------------------------------------

type SendToResponder =
    Box<dyn Fn(&str, &str, &Value) -> Result<Value, ControllerError> + Send + Sync>;

#[derive(Default)]
struct MockState {
    objects: BTreeMap<String, Value>,
    states: BTreeMap<String, Value>,
    files: BTreeMap<String, Vec<u8>>,
    subscriptions: Vec<String>,
    sent: Vec<(String, String, Value)>,
}

/// In-memory [`ControllerRuntime`] for tests and headless development.
pub struct MockController {
    namespace: String,
    state: Mutex<MockState>,
    responder: Mutex<Option<SendToResponder>>,
}

impl fmt::Debug for MockController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockController")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl MockController {
    /// A mock controller with the given own namespace.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(MockState::default()),
            responder: Mutex::new(None),
        }
    }

    /// Install the `send_to` responder.
    pub fn respond_to_send(
        &self,
        responder: impl Fn(&str, &str, &Value) -> Result<Value, ControllerError>
        + Send
        + Sync
        + 'static,
    ) {
        *self.responder.lock().expect("mock lock") = Some(Box::new(responder));
    }

    /// Messages sent through `send_to`, in order.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<(String, String, Value)> {
        self.state.lock().expect("mock lock").sent.clone()
    }

    /// Patterns subscribed to (states and objects alike), in order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().expect("mock lock").subscriptions.clone()
    }

    fn file_key(dir: &str, path: &str) -> String {
        format!("{dir}/{path}")
    }
}

#[async_trait]
impl ControllerRuntime for MockController {
    fn own_namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_object(&self, id: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self.state.lock().expect("mock lock").objects.get(id).cloned())
    }

    async fn set_object(&self, id: &str, value: Value) -> Result<(), ControllerError> {
        self.state
            .lock()
            .expect("mock lock")
            .objects
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn delete_object(&self, id: &str) -> Result<(), ControllerError> {
        self.state.lock().expect("mock lock").objects.remove(id);
        Ok(())
    }

    async fn extend_object(&self, id: &str, patch: Value) -> Result<(), ControllerError> {
        let mut state = self.state.lock().expect("mock lock");
        let slot = state.objects.entry(id.to_string()).or_insert(Value::Null);
        if let (Value::Object(base), Value::Object(overlay)) = (&mut *slot, &patch) {
            for (key, value) in overlay {
                base.insert(key.clone(), value.clone());
            }
        } else {
            *slot = patch;
        }
        Ok(())
    }

    async fn get_object_view(
        &self,
        _design: &str,
        _view: &str,
        _params: Value,
    ) -> Result<Value, ControllerError> {
        Ok(Value::Array(Vec::new()))
    }

    async fn get_foreign_objects(
        &self,
        pattern: &str,
    ) -> Result<BTreeMap<String, Value>, ControllerError> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .state
            .lock()
            .expect("mock lock")
            .objects
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect())
    }

    async fn get_foreign_object(&self, id: &str) -> Result<Option<Value>, ControllerError> {
        self.get_object(id).await
    }

    async fn extend_foreign_object(&self, id: &str, patch: Value) -> Result<(), ControllerError> {
        self.extend_object(id, patch).await
    }

    async fn set_state(&self, id: &str, value: Value, _ack: bool) -> Result<(), ControllerError> {
        self.state
            .lock()
            .expect("mock lock")
            .states
            .insert(id.to_string(), value);
        Ok(())
    }

    async fn set_foreign_state(
        &self,
        id: &str,
        value: Value,
        ack: bool,
    ) -> Result<(), ControllerError> {
        self.set_state(id, value, ack).await
    }

    async fn get_foreign_state(&self, id: &str) -> Result<Option<Value>, ControllerError> {
        Ok(self.state.lock().expect("mock lock").states.get(id).cloned())
    }

    async fn subscribe_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.state
            .lock()
            .expect("mock lock")
            .subscriptions
            .push(pattern.to_string());
        Ok(())
    }

    async fn unsubscribe_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.state
            .lock()
            .expect("mock lock")
            .subscriptions
            .retain(|p| p != pattern);
        Ok(())
    }

    async fn subscribe_objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.subscribe_states(pattern).await
    }

    async fn unsubscribe_objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.unsubscribe_states(pattern).await
    }

    async fn subscribe_foreign_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.subscribe_states(pattern).await
    }

    async fn unsubscribe_foreign_states(&self, pattern: &str) -> Result<(), ControllerError> {
        self.unsubscribe_states(pattern).await
    }

    async fn subscribe_foreign_objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.subscribe_states(pattern).await
    }

    async fn unsubscribe_foreign_objects(&self, pattern: &str) -> Result<(), ControllerError> {
        self.unsubscribe_states(pattern).await
    }

    async fn read_file(&self, dir: &str, path: &str) -> Result<Option<Vec<u8>>, ControllerError> {
        Ok(self
            .state
            .lock()
            .expect("mock lock")
            .files
            .get(&Self::file_key(dir, path))
            .cloned())
    }

    async fn write_file(
        &self,
        dir: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), ControllerError> {
        self.state
            .lock()
            .expect("mock lock")
            .files
            .insert(Self::file_key(dir, path), bytes.to_vec());
        Ok(())
    }

    async fn mkdir(&self, _dir: &str, _path: &str) -> Result<(), ControllerError> {
        Ok(())
    }

    async fn rename_file(&self, dir: &str, from: &str, to: &str) -> Result<(), ControllerError> {
        let mut state = self.state.lock().expect("mock lock");
        match state.files.remove(&Self::file_key(dir, from)) {
            Some(bytes) => {
                state.files.insert(Self::file_key(dir, to), bytes);
                Ok(())
            }
            None => Err(ControllerError::backend(format!("no such file: {from}"))),
        }
    }

    async fn delete_file(&self, dir: &str, path: &str) -> Result<(), ControllerError> {
        self.state
            .lock()
            .expect("mock lock")
            .files
            .remove(&Self::file_key(dir, path));
        Ok(())
    }

    async fn read_dir(&self, dir: &str, path: &str) -> Result<Vec<String>, ControllerError> {
        let prefix = if path.is_empty() {
            format!("{dir}/")
        } else {
            format!("{dir}/{}/", path.trim_end_matches('/'))
        };
        let state = self.state.lock().expect("mock lock");
        let mut names: Vec<String> = state
            .files
            .keys()
            .filter_map(|key| {
                let rest = key.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn send_to(
        &self,
        instance: &str,
        command: &str,
        message: Value,
    ) -> Result<Value, ControllerError> {
        self.state.lock().expect("mock lock").sent.push((
            instance.to_string(),
            command.to_string(),
            message.clone(),
        ));
        {
            let responder = self.responder.lock().expect("mock lock");
            if let Some(responder) = responder.as_ref() {
                return responder(instance, command, &message);
            }
        }
        // No responder installed: never answer, so timeout paths trigger.
        std::future::pending().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_namespace_roundtrips() {
        let ids = IdNamespace::new("msghub.0");
        assert_eq!(ids.to_full_id("list.a"), "msghub.0.list.a");
        assert_eq!(ids.to_full_id("msghub.0.list.a"), "msghub.0.list.a");
        assert_eq!(ids.to_own_id("msghub.0.list.a"), "list.a");
        assert_eq!(ids.to_own_id("other.0.x"), "other.0.x");
    }

    #[tokio::test]
    async fn send_to_validates_target_and_command() {
        let runtime = Arc::new(MockController::new("msghub.0"));
        let api = ControllerApi::new(runtime, 1_000);

        assert_eq!(
            api.send_to("", "cmd", json!({}), None).await.unwrap_err(),
            ControllerError::EmptyTarget
        );
        assert_eq!(
            api.send_to("other.0", " ", json!({}), None).await.unwrap_err(),
            ControllerError::EmptyCommand
        );
        assert_eq!(
            api.send_to("msghub.0", "cmd", json!({}), None)
                .await
                .unwrap_err(),
            ControllerError::SelfAddressed {
                instance: "msghub.0".to_string()
            }
        );
    }

    #[tokio::test]
    async fn send_to_returns_the_response() {
        let runtime = Arc::new(MockController::new("msghub.0"));
        runtime.respond_to_send(|_, command, _| Ok(json!({"ack": command})));
        let api = ControllerApi::new(runtime.clone(), 1_000);

        let response = api
            .send_to("alexa.0", "getList", json!({"list": "shopping"}), None)
            .await
            .unwrap();
        assert_eq!(response, json!({"ack": "getList"}));
        assert_eq!(runtime.sent_messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_to_times_out_without_response() {
        let runtime = Arc::new(MockController::new("msghub.0"));
        let api = ControllerApi::new(runtime, 10_000);

        let err = api
            .send_to("alexa.0", "getList", json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ControllerError::Timeout {
                instance: "alexa.0".to_string(),
                timeout_ms: 10_000
            }
        );
    }

    #[tokio::test]
    async fn file_backend_adapts_the_namespace() {
        let runtime = Arc::new(MockController::new("msghub.0"));
        let backend = ControllerFileBackend::new(runtime, "msghub.0");
        backend.write("archive/a.jsonl", b"line\n").await.unwrap();
        assert_eq!(
            backend.read("archive/a.jsonl").await.unwrap(),
            Some(b"line\n".to_vec())
        );
        assert_eq!(
            backend.list("archive").await.unwrap(),
            vec!["a.jsonl".to_string()]
        );
        assert!(!backend.supports_rename());
        assert!(!backend.supports_append());
        backend.delete("archive/a.jsonl").await.unwrap();
        assert_eq!(backend.read("archive/a.jsonl").await.unwrap(), None);
    }
}
