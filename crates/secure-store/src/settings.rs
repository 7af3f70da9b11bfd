//! Store settings management
//!
//! Stores non-secret configuration in a plain JSON file.
//! Settings are readable before the store is unlocked.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::crypto::KdfParams;
use crate::envelope::DEFAULT_SENTINEL;
use crate::error::{Result, StoreError};

/// File stem of the settings document
const SETTINGS_FILE_STEM: &str = "settings";

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Settings file version
    pub version: u32,
    /// Persisted namespace name
    pub namespace: String,
    /// Prefix marking encrypted values
    pub sentinel: String,
    /// KDF parameters applied when key material is first created
    pub kdf: KdfParams,
    /// Plaintext keys written by releases that predate encryption
    pub legacy_keys: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            namespace: "default".to_string(),
            sentinel: DEFAULT_SENTINEL.to_string(),
            kdf: KdfParams::default(),
            legacy_keys: Vec::new(),
        }
    }
}

impl Settings {
    /// Reject settings the store cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sentinel.is_empty() {
            return Err(StoreError::Format("sentinel must not be empty".to_string()));
        }
        // a sentinel that starts like JSON would shadow legacy values
        if self.sentinel.starts_with(['{', '[', '"']) {
            return Err(StoreError::Format(format!(
                "sentinel {:?} collides with JSON text",
                self.sentinel
            )));
        }
        // the namespace document shares a directory with settings.json
        if self.namespace.is_empty()
            || self.namespace.contains(['/', '\\'])
            || self.namespace == SETTINGS_FILE_STEM
        {
            return Err(StoreError::Format(format!(
                "invalid namespace {:?}",
                self.namespace
            )));
        }
        self.kdf.validate()
    }
}

/// Settings manager
pub struct SettingsManager {
    settings_file: PathBuf,
    settings: Settings,
}

impl SettingsManager {
    /// Create a new settings manager, falling back to defaults if the file is
    /// missing or unreadable
    pub fn new(storage_dir: &Path) -> Self {
        let settings_file = storage_dir.join(format!("{}.json", SETTINGS_FILE_STEM));
        let settings = Self::load_from_file(&settings_file).unwrap_or_default();

        Self {
            settings_file,
            settings,
        }
    }

    /// Load settings from file
    fn load_from_file(path: &Path) -> Result<Settings> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&contents)?;
        settings.validate()?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to file
    pub async fn save(&self) -> Result<()> {
        self.settings.validate()?;
        let contents = serde_json::to_string_pretty(&self.settings)?;

        if let Some(parent) = self.settings_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write atomically using temp file
        let temp_path = self.settings_file.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, &self.settings_file).await?;

        debug!("Saved settings to {:?}", self.settings_file);
        Ok(())
    }

    /// Get current settings
    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Get mutable settings
    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Update settings and save
    pub async fn update(&mut self, settings: Settings) -> Result<()> {
        self.settings = settings;
        self.save().await
    }

    /// Reset settings to defaults and delete settings file
    pub async fn reset(&mut self) -> Result<()> {
        self.settings = Settings::default();

        if self.settings_file.exists() {
            tokio::fs::remove_file(&self.settings_file).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_settings_default() {
        let temp_dir = TempDir::new().unwrap();
        let manager = SettingsManager::new(temp_dir.path());

        let settings = manager.get();
        assert_eq!(settings.namespace, "default");
        assert_eq!(settings.sentinel, "secure:");
        assert_eq!(settings.kdf, KdfParams::default());
        assert!(settings.legacy_keys.is_empty());
    }

    #[tokio::test]
    async fn test_settings_persistence() {
        let temp_dir = TempDir::new().unwrap();

        {
            let mut manager = SettingsManager::new(temp_dir.path());
            manager.get_mut().namespace = "profile-2".to_string();
            manager.get_mut().legacy_keys = vec!["history".to_string(), "pinHash".to_string()];
            manager.save().await.unwrap();
        }

        {
            let manager = SettingsManager::new(temp_dir.path());
            assert_eq!(manager.get().namespace, "profile-2");
            assert_eq!(manager.get().legacy_keys, vec!["history", "pinHash"]);
        }
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("settings.json"),
            r#"{"legacyKeys": ["settings"]}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(temp_dir.path());
        assert_eq!(manager.get().legacy_keys, vec!["settings"]);
        assert_eq!(manager.get().sentinel, DEFAULT_SENTINEL);
    }

    #[tokio::test]
    async fn test_invalid_file_falls_back_to_defaults() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("settings.json"), r#"{"sentinel": ""}"#).unwrap();

        let manager = SettingsManager::new(temp_dir.path());
        assert_eq!(manager.get(), &Settings::default());
    }

    #[tokio::test]
    async fn test_reset() {
        let temp_dir = TempDir::new().unwrap();
        let mut manager = SettingsManager::new(temp_dir.path());
        manager.get_mut().namespace = "other".to_string();
        manager.save().await.unwrap();

        manager.reset().await.unwrap();

        assert_eq!(manager.get().namespace, "default");
        assert!(!temp_dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_validate() {
        let mut settings = Settings::default();
        settings.validate().unwrap();

        settings.sentinel = "{enc}".to_string();
        assert!(settings.validate().is_err());

        settings = Settings::default();
        settings.namespace = "../etc".to_string();
        assert!(settings.validate().is_err());

        settings.namespace = "settings".to_string();
        assert!(settings.validate().is_err());
    }
}
