//! Token persistence.
//!
//! The connection only needs a get/set store keyed by `(key, scope)`. The
//! scope is the store name from the endpoint configuration, so several
//! plugin identities can share one backing file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// Key under which the authentication token is stored
pub const TOKEN_KEY: &str = "token";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Scoped key/value store for the authentication token.
///
/// Implementations must not assume they are the only writer: another process
/// may update the same scope between two calls.
pub trait TokenStore: Send + Sync + 'static {
    /// Read `key` from `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str, scope: &str) -> Result<Option<String>, StoreError>;

    /// Write `key` in `scope`; `None` removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, key: &str, value: Option<&str>, scope: &str) -> Result<(), StoreError>;
}

type Scopes = HashMap<String, HashMap<String, String>>;

fn apply(scopes: &mut Scopes, key: &str, value: Option<&str>, scope: &str) {
    match value {
        Some(value) => {
            scopes
                .entry(scope.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
        None => {
            if let Some(entries) = scopes.get_mut(scope) {
                entries.remove(key);
                if entries.is_empty() {
                    scopes.remove(scope);
                }
            }
        }
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    scopes: Mutex<Scopes>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str, scope: &str) -> Result<Option<String>, StoreError> {
        let scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(scopes.get(scope).and_then(|s| s.get(key)).cloned())
    }

    fn set(&self, key: &str, value: Option<&str>, scope: &str) -> Result<(), StoreError> {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut scopes, key, value, scope);
        Ok(())
    }
}

/// JSON file store: `{ "<scope>": { "<key>": "<value>" } }`.
///
/// The file is re-read on every access and replaced atomically on write.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Scopes, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Scopes::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Scopes::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, scopes: &Scopes) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(scopes)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str, scope: &str) -> Result<Option<String>, StoreError> {
        let mut scopes = self.load()?;
        Ok(scopes.get_mut(scope).and_then(|s| s.remove(key)))
    }

    fn set(&self, key: &str, value: Option<&str>, scope: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut scopes = self.load()?;
        apply(&mut scopes, key, value, scope);
        self.save(&scopes)?;
        debug!(path = ?self.path, scope, key, cleared = value.is_none(), "Token store updated");
        Ok(())
    }
}
