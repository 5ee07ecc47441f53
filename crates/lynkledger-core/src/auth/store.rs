use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;

/// Storage key of the short-lived access token.
pub const ACCESS_TOKEN_KEY: &str = "token";

/// Storage key of the long-lived refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Access/refresh token pair returned by the login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Persistent key-value storage for credentials.
///
/// Keys are [`ACCESS_TOKEN_KEY`] and [`REFRESH_TOKEN_KEY`]. Writes are
/// last-writer-wins; nothing here is transactional.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Removing a key that is not present is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn save_credentials(&self, pair: &CredentialPair) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, &pair.access_token)?;
        self.set(REFRESH_TOKEN_KEY, &pair.refresh_token)
    }

    /// Remove both tokens. Both removals are attempted; the first error wins.
    fn clear(&self) -> Result<()> {
        let access = self.remove(ACCESS_TOKEN_KEY);
        let refresh = self.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("Token store lock poisoned")
}

/// In-process store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(pair: &CredentialPair) -> Self {
        let store = Self::new();
        if let Ok(mut values) = store.values.lock() {
            values.insert(ACCESS_TOKEN_KEY.to_string(), pair.access_token.clone());
            values.insert(REFRESH_TOKEN_KEY.to_string(), pair.refresh_token.clone());
        }
        store
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionFile {
    values: BTreeMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// JSON file store, the on-disk equivalent of browser local storage.
///
/// The whole map is rewritten on every change. The file is removed once the
/// last key is gone.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileTokenStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).context("Failed to read session file")?;
            let file: SessionFile =
                serde_json::from_str(&contents).context("Failed to parse session file")?;
            file.values
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), keys = values.len(), "Opened session file");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Open the store in the default cache directory.
    pub fn open_default() -> Result<Self> {
        Self::open(Config::cache_dir()?.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SessionFile {
            values: values.clone(),
            updated_at: Some(Utc::now()),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value.to_string());
        self.persist(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        if values.remove(key).is_some() {
            self.persist(&values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(access: &str, refresh: &str) -> CredentialPair {
        CredentialPair {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
        }
    }

    #[test]
    fn test_memory_store_roundtrip_and_clear() {
        let store = MemoryTokenStore::with_credentials(&pair("A", "R"));
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("R"));

        store.set(ACCESS_TOKEN_KEY, "B").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("B"));

        store.clear().unwrap();
        assert!(store.access_token().unwrap().is_none());
        assert!(store.refresh_token().unwrap().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    /// Memory store whose access token cannot be removed.
    struct StuckAccessStore(MemoryTokenStore);

    impl TokenStore for StuckAccessStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<()> {
            if key == ACCESS_TOKEN_KEY {
                anyhow::bail!("keychain locked");
            }
            self.0.remove(key)
        }
    }

    #[test]
    fn test_clear_removes_refresh_token_even_if_access_removal_fails() {
        let store = StuckAccessStore(MemoryTokenStore::with_credentials(&pair("A", "R")));

        let err = store.clear().unwrap_err();
        assert!(err.to_string().contains("keychain locked"));
        assert!(store.refresh_token().unwrap().is_none());
        assert_eq!(store.access_token().unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn test_file_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lynkledger").join(SESSION_FILE);

        let store = FileTokenStore::open(&path).unwrap();
        store.save_credentials(&pair("A", "R")).unwrap();
        assert!(path.exists());

        let reloaded = FileTokenStore::open(&path).unwrap();
        assert_eq!(reloaded.access_token().unwrap().as_deref(), Some("A"));
        assert_eq!(reloaded.refresh_token().unwrap().as_deref(), Some("R"));
    }

    #[test]
    fn test_file_store_removes_file_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);

        let store = FileTokenStore::open(&path).unwrap();
        store.save_credentials(&pair("A", "R")).unwrap();
        store.remove(ACCESS_TOKEN_KEY).unwrap();
        assert!(path.exists());
        store.remove(REFRESH_TOKEN_KEY).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);
        std::fs::write(&path, "not json").unwrap();
        assert!(FileTokenStore::open(&path).is_err());
    }

    #[test]
    fn test_credential_pair_debug_is_redacted() {
        let debug = format!("{:?}", pair("secret-access", "secret-refresh"));
        assert!(!debug.contains("secret"));
    }
}
