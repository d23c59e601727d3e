//! Persisted key-value storage
//!
//! The checkout hand-off survives page loads by writing its progress under
//! fixed keys. Reads never fail: a missing or unreadable value is `None`.
//! `FileStore` keeps the whole map in memory and rewrites the JSON file
//! atomically (temp file + rename) on every mutation.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Keys written by the checkout hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Email,
    Stream,
    RedirectToken,
    ProductId,
    MethodId,
    LastInitiate,
    AccessToken,
}

impl StorageKey {
    pub const ALL: [StorageKey; 7] = [
        StorageKey::Email,
        StorageKey::Stream,
        StorageKey::RedirectToken,
        StorageKey::ProductId,
        StorageKey::MethodId,
        StorageKey::LastInitiate,
        StorageKey::AccessToken,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKey::Email => "pw.email",
            StorageKey::Stream => "pw.stream",
            StorageKey::RedirectToken => "pw.redirect_token",
            StorageKey::ProductId => "pw.product_id",
            StorageKey::MethodId => "pw.method_id",
            StorageKey::LastInitiate => "pw.last_initiate_payload",
            StorageKey::AccessToken => "pw.access_token",
        }
    }
}

/// Boxed write future; keeps `KeyValueStore` dyn-compatible.
pub type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// String key-value storage that outlives a session.
pub trait KeyValueStore: Send {
    fn get(&self, key: StorageKey) -> Option<String>;

    fn set(&mut self, key: StorageKey, value: String) -> StoreFuture<'_>;

    fn remove(&mut self, key: StorageKey) -> StoreFuture<'_>;

    /// Value parsed as JSON; unparseable values read as `None`.
    fn get_json(&self, key: StorageKey) -> Option<Value> {
        let raw = self.get(key)?;
        serde_json::from_str(&raw)
            .inspect_err(|e| debug!(key = key.as_str(), error = %e, "stored value is not JSON"))
            .ok()
    }
}

/// Volatile storage, the default for a session with no persistence.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<StorageKey, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Option<String> {
        self.values.get(&key).cloned()
    }

    fn set(&mut self, key: StorageKey, value: String) -> StoreFuture<'_> {
        self.values.insert(key, value);
        Box::pin(async { Ok(()) })
    }

    fn remove(&mut self, key: StorageKey) -> StoreFuture<'_> {
        self.values.remove(&key);
        Box::pin(async { Ok(()) })
    }
}

/// JSON file storage keyed by `StorageKey::as_str()`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts an empty store without touching disk. An
    /// unreadable or corrupt file is logged and also starts empty; the next
    /// write replaces it.
    pub async fn open(path: PathBuf) -> Self {
        let values = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(values) => {
                    info!(path = %path.display(), keys = values.len(), "loaded checkout storage");
                    values
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "checkout storage is corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "checkout storage not found, starting empty");
                HashMap::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkout storage unreadable, starting empty");
                HashMap::new()
            }
        };
        Self { path, values }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: StorageKey) -> Option<String> {
        self.values.get(key.as_str()).cloned()
    }

    fn set(&mut self, key: StorageKey, value: String) -> StoreFuture<'_> {
        self.values.insert(key.as_str().to_owned(), value);
        Box::pin(write_atomic(&self.path, &self.values))
    }

    fn remove(&mut self, key: StorageKey) -> StoreFuture<'_> {
        let changed = self.values.remove(key.as_str()).is_some();
        Box::pin(async move {
            if changed {
                write_atomic(&self.path, &self.values).await?;
            }
            Ok(())
        })
    }
}

/// Write the map to `path` via a sibling temp file and rename.
///
/// Permissions are 0600 since the file may hold an access token.
async fn write_atomic(path: &Path, values: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(values)
        .map_err(|e| Error::Storage(format!("serializing checkout storage: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("storage path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".pw-storage.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp storage file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting storage file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp storage file: {e}")))?;

    debug!(path = %path.display(), "persisted checkout storage");
    Ok(())
}
