//! Per-user conversation identifier, kept in local persistent storage.
//!
//! The identifier only correlates a conversation with the backend's history;
//! it is not a credential.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use uuid::Uuid;

pub const SESSION_STORAGE_KEY: &str = "rag-chatbot-session-id";

/// String key/value storage with `localStorage` semantics.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

/// JSON object on disk. Each operation re-reads the file, so two processes
/// sharing it see each other's writes; the last writer wins.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    // written to a tmp file, then renamed over the original
    fn save(&self, items: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_string_pretty(items)?)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("storage lock poisoned"))?;
        let mut items = self.load()?;
        apply(&mut items);
        self.save(&items)
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.update(|items| {
            items.remove(key);
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| anyhow!("storage lock poisoned"))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("storage lock poisoned"))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| anyhow!("storage lock poisoned"))?;
        items.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct SessionIdStore {
    storage: Option<Arc<dyn KeyValueStore>>,
}

impl SessionIdStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage: Some(storage),
        }
    }

    /// No persistent storage at all; every lookup yields "no session".
    pub fn unavailable() -> Self {
        Self { storage: None }
    }

    /// Returns the stored identifier, creating and persisting a fresh one if
    /// absent. An empty string means storage is unusable and callers should
    /// skip history operations.
    pub fn get_session_id(&self) -> String {
        let Some(storage) = &self.storage else {
            return String::new();
        };

        match storage.get_item(SESSION_STORAGE_KEY) {
            Ok(Some(session_id)) if !session_id.is_empty() => return session_id,
            Ok(_) => {}
            Err(err) => {
                warn!("Session storage unavailable: {:#}", err);
                return String::new();
            }
        }

        let session_id = Uuid::new_v4().to_string();
        if let Err(err) = storage.set_item(SESSION_STORAGE_KEY, &session_id) {
            warn!("Failed to persist session id: {:#}", err);
            return String::new();
        }

        info!("Created session id {}", session_id);
        session_id
    }

    pub fn clear_session_id(&self) {
        let Some(storage) = &self.storage else {
            return;
        };

        match storage.remove_item(SESSION_STORAGE_KEY) {
            Ok(()) => debug!("Session id cleared"),
            Err(err) => warn!("Failed to clear session id: {:#}", err),
        }
    }
}
