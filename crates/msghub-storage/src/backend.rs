// SPDX-License-Identifier: MIT OR Apache-2.0
//! Byte-level storage backends.
//!
//! A backend reads, writes, and deletes byte blobs at slash-separated
//! relative paths under a logical root. Capabilities differ per backend:
//! the native filesystem supports atomic rename and true append, while the
//! host-file namespace (modeled by [`MemoryBackend`]) supports neither and
//! callers fall back to read-modify-write.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors produced by storage backends.
///
/// Error details are carried as strings so results can be fanned out to
/// every waiter of a coalesced write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// An I/O operation failed.
    #[error("storage i/o failed at '{path}': {message}")]
    Io {
        /// Relative path of the failed operation.
        path: String,
        /// Stringified cause.
        message: String,
    },

    /// The backend does not support the requested operation.
    #[error("storage backend does not support {op}")]
    Unsupported {
        /// Name of the unsupported operation.
        op: &'static str,
    },

    /// A value could not be encoded for persistence.
    #[error("encode failed: {message}")]
    Encode {
        /// Stringified cause.
        message: String,
    },

    /// A value could not be decoded from persisted bytes.
    #[error("decode failed at '{path}': {message}")]
    Decode {
        /// Relative path of the offending document.
        path: String,
        /// Stringified cause.
        message: String,
    },

    /// The serial queue behind this storage has shut down.
    #[error("storage queue closed")]
    QueueClosed,
}

impl StorageError {
    /// Wrap an I/O error for the given relative path.
    #[must_use]
    pub fn io(path: &str, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

/// Byte storage under a logical root.
///
/// Paths are relative, slash-separated, and never start with `/`.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Read the file at `path`. `Ok(None)` when it does not exist.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write (create or replace) the file at `path`.
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Append to the file at `path`, creating it when missing.
    ///
    /// The default implementation emulates append via read-modify-write;
    /// backends with a native append override it and report
    /// [`supports_append`](Self::supports_append).
    async fn append(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut existing = self.read(path).await?.unwrap_or_default();
        existing.extend_from_slice(bytes);
        self.write(path, &existing).await
    }

    /// Delete the file at `path`. Deleting a missing file is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Atomically rename `from` to `to`, replacing `to` when present.
    async fn rename(&self, _from: &str, _to: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported { op: "rename" })
    }

    /// List the file names (not paths) directly under `dir`.
    ///
    /// A missing directory lists as empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError>;

    /// Ensure `dir` (and its parents) exist.
    async fn ensure_dir(&self, dir: &str) -> Result<(), StorageError>;

    /// Recursively list every file path under `dir` (relative to the root).
    async fn walk_files(&self, _dir: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported { op: "walk_files" })
    }

    /// Size in bytes of the file at `path`, or `None` when missing.
    async fn file_len(&self, path: &str) -> Result<Option<u64>, StorageError> {
        Ok(self.read(path).await?.map(|bytes| bytes.len() as u64))
    }

    /// Whether [`rename`](Self::rename) is atomic and supported.
    fn supports_rename(&self) -> bool {
        false
    }

    /// Whether [`append`](Self::append) is native rather than emulated.
    fn supports_append(&self) -> bool {
        false
    }

    /// Human-readable location of the logical root, for logs and status.
    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// FsBackend
// ---------------------------------------------------------------------------

/// Native-filesystem backend rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Create a backend rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The backend's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(path, &err)),
        }
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(path, &err))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|err| StorageError::io(path, &err))
    }

    async fn append(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        use tokio::io::AsyncWriteExt;

        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(path, &err))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .map_err(|err| StorageError::io(path, &err))?;
        file.write_all(bytes)
            .await
            .map_err(|err| StorageError::io(path, &err))?;
        file.flush()
            .await
            .map_err(|err| StorageError::io(path, &err))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(path, &err)),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        tokio::fs::rename(self.resolve(from), self.resolve(to))
            .await
            .map_err(|err| StorageError::io(from, &err))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let full = self.resolve(dir);
        let mut entries = match tokio::fs::read_dir(&full).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(dir, &err)),
        };
        let mut names = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    if let Some(name) = entry.file_name().to_str() {
                        names.push(name.to_string());
                    }
                }
                Ok(None) => break,
                Err(err) => return Err(StorageError::io(dir, &err)),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn ensure_dir(&self, dir: &str) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(self.resolve(dir))
            .await
            .map_err(|err| StorageError::io(dir, &err))
    }

    async fn walk_files(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        let mut stack = vec![dir.to_string()];
        while let Some(current) = stack.pop() {
            let full = self.resolve(&current);
            let mut entries = match tokio::fs::read_dir(&full).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::io(&current, &err)),
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                            continue;
                        };
                        let rel = if current.is_empty() {
                            name
                        } else {
                            format!("{current}/{name}")
                        };
                        match entry.file_type().await {
                            Ok(ft) if ft.is_dir() => stack.push(rel),
                            Ok(_) => out.push(rel),
                            Err(err) => return Err(StorageError::io(&rel, &err)),
                        }
                    }
                    Ok(None) => break,
                    Err(err) => return Err(StorageError::io(&current, &err)),
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn file_len(&self, path: &str) -> Result<Option<u64>, StorageError> {
        match tokio::fs::metadata(self.resolve(path)).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(path, &err)),
        }
    }

    fn supports_rename(&self) -> bool {
        true
    }

    fn supports_append(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// In-memory backend modeling the host-file namespace: no atomic rename,
/// no native append. Doubles as the test backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored files.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.lock().expect("memory backend lock").len()
    }

    /// Snapshot of all stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .expect("memory backend lock")
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .files
            .lock()
            .expect("memory backend lock")
            .get(path)
            .cloned())
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.files
            .lock()
            .expect("memory backend lock")
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.files.lock().expect("memory backend lock").remove(path);
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir.trim_end_matches('/'))
        };
        let files = self.files.lock().expect("memory backend lock");
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|path| {
                let rest = path.strip_prefix(&prefix)?;
                // Only direct children.
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn ensure_dir(&self, _dir: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn walk_files(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{}/", dir.trim_end_matches('/'))
        };
        let files = self.files.lock().expect("memory backend lock");
        Ok(files
            .keys()
            .filter(|path| path.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        backend.write("a/b.json", b"{}").await.unwrap();
        assert_eq!(backend.read("a/b.json").await.unwrap(), Some(b"{}".to_vec()));
        assert_eq!(backend.read("missing").await.unwrap(), None);
        backend.delete("a/b.json").await.unwrap();
        assert_eq!(backend.read("a/b.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_backend_lists_direct_children_only() {
        let backend = MemoryBackend::new();
        backend.write("dir/a.jsonl", b"1").await.unwrap();
        backend.write("dir/b.jsonl", b"2").await.unwrap();
        backend.write("dir/sub/c.jsonl", b"3").await.unwrap();
        backend.write("other.jsonl", b"4").await.unwrap();
        assert_eq!(
            backend.list("dir").await.unwrap(),
            vec!["a.jsonl".to_string(), "b.jsonl".to_string()]
        );
        assert_eq!(backend.list("").await.unwrap(), vec!["other.jsonl".to_string()]);
    }

    #[tokio::test]
    async fn emulated_append_concatenates() {
        let backend = MemoryBackend::new();
        backend.append("log", b"a\n").await.unwrap();
        backend.append("log", b"b\n").await.unwrap();
        assert_eq!(backend.read("log").await.unwrap(), Some(b"a\nb\n".to_vec()));
        assert!(!backend.supports_append());
    }

    #[tokio::test]
    async fn memory_backend_has_no_rename() {
        let backend = MemoryBackend::new();
        assert!(!backend.supports_rename());
        assert_eq!(
            backend.rename("a", "b").await.unwrap_err(),
            StorageError::Unsupported { op: "rename" }
        );
    }
}
