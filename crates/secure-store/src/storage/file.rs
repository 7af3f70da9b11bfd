//! File storage backend
//!
//! Keeps one JSON document per namespace in the user's data directory.
//! Values are stored as given; encryption happens above this layer.

use async_trait::async_trait;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::KeyValueBackend;
use crate::error::{Result, StoreError};

/// Current on-disk document version
const FILE_VERSION: u32 = 1;

/// File format for persistent storage
#[derive(Debug, Default, Serialize, Deserialize)]
struct StorageFile {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// JSON file storage backend
pub struct FileBackend {
    /// Path of the namespace document
    path: PathBuf,
    /// In-memory copy of the document
    cache: Arc<RwLock<BTreeMap<String, String>>>,
}

impl FileBackend {
    /// Open (or create) the namespace document inside `dir`
    pub async fn open(dir: &Path, namespace: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            StoreError::Environment(format!("Cannot create storage directory {:?}: {}", dir, e))
        })?;

        let path = dir.join(format!("{}.json", namespace));
        let entries = Self::load(&path).await?;

        debug!("File storage opened at {:?} with {} entries", path, entries.len());

        Ok(Self {
            path,
            cache: Arc::new(RwLock::new(entries)),
        })
    }

    /// Open the namespace document in the platform data directory
    pub async fn open_default(namespace: &str) -> Result<Self> {
        let dir = Self::default_dir()?;
        Self::open(&dir, namespace).await
    }

    /// Get the default storage directory
    pub fn default_dir() -> Result<PathBuf> {
        ProjectDirs::from("com", "stillwater-labs", "secure-store")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                StoreError::Environment("Could not determine data directory".to_string())
            })
    }

    /// Get the path of the namespace document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            debug!("No existing storage file found");
            return Ok(BTreeMap::new());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        let file: StorageFile = serde_json::from_str(&contents)?;

        if file.version != FILE_VERSION {
            return Err(StoreError::Format(format!(
                "Unsupported storage file version: {}",
                file.version
            )));
        }

        Ok(file.entries)
    }

    /// Write the document atomically using a temp file
    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let file = StorageFile {
            version: FILE_VERSION,
            entries: entries.clone(),
        };
        let contents = serde_json::to_string_pretty(&file)?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!("Saved {} entries to storage", entries.len());
        Ok(())
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> Result<()> {
        // hold the lock across persist so writes reach disk in issue order;
        // the cache only changes once the document is on disk
        let mut cache = self.cache.write().await;
        let mut next = cache.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next).await?;
        *cache = next;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.write().await;

        if cache.contains_key(key) {
            let mut next = cache.clone();
            next.remove(key);
            self.persist(&next).await?;
            *cache = next;
        }

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.cache.read().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut cache = self.cache.write().await;
        let next = BTreeMap::new();
        self.persist(&next).await?;
        *cache = next;
        debug!("Cleared all entries");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "File Storage"
    }
}
