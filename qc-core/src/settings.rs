//! Client Settings
//!
//! Persistent settings stored as JSON in ~/.config/qitech-control/settings.json
//! (or `$QC_CONFIG_DIR/settings.json`).

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::constants::{limits, paths, sync};
use crate::error::{ControlError, Result};
use crate::registry::{self, DeviceRegistry};

// ============================================================================
// Cached Settings
// ============================================================================

/// Updated only when settings are explicitly saved or invalidated
static SETTINGS_CACHE: OnceLock<RwLock<Option<ClientSettings>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<Option<ClientSettings>> {
    SETTINGS_CACHE.get_or_init(|| RwLock::new(None))
}

/// Get cached settings, loading from disk on a cache miss
pub fn get_cached_settings() -> ClientSettings {
    if let Some(settings) = get_cache().read().as_ref() {
        return settings.clone();
    }

    let settings = load_settings().unwrap_or_else(|e| {
        tracing::warn!("Falling back to default settings: {}", e);
        ClientSettings::default()
    });
    *get_cache().write() = Some(settings.clone());
    settings
}

pub fn invalidate_settings_cache() {
    *get_cache().write() = None;
}

fn update_cache(settings: &ClientSettings) {
    *get_cache().write() = Some(settings.clone());
}

// ============================================================================
// Settings Model
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Minimum time between two commits of one namespace
    #[serde(default = "default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// JSON registry replacing the built-in machine table
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_throttle_interval_ms() -> u64 {
    sync::DEFAULT_THROTTLE_INTERVAL_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            throttle_interval_ms: default_throttle_interval_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SyncSettings {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.throttle_interval_ms.max(sync::MIN_THROTTLE_INTERVAL_MS))
    }
}

impl RegistrySettings {
    /// The configured registry file, or the built-in table
    pub fn load(&self) -> Result<DeviceRegistry> {
        match &self.path {
            Some(path) => registry::load_registry(path),
            None => Ok(DeviceRegistry::builtin()),
        }
    }
}

// ============================================================================
// Persistence
// ============================================================================

pub fn get_settings_path() -> Result<PathBuf> {
    let dir = paths::user_config_dir()
        .ok_or_else(|| ControlError::config("Could not determine config directory"))?;
    Ok(dir.join(paths::SETTINGS_FILE))
}

/// Load settings, returning defaults if the file does not exist
pub fn load_settings() -> Result<ClientSettings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Ok(ClientSettings::default());
    }

    let size = fs::metadata(&path)
        .map_err(|e| ControlError::FileRead {
            path: path.clone(),
            source: e,
        })?
        .len();
    if size > limits::MAX_SETTINGS_FILE_SIZE {
        return Err(ControlError::config(format!(
            "Settings file too large: {} bytes",
            size
        )));
    }

    let content = fs::read_to_string(&path).map_err(|e| ControlError::FileRead {
        path: path.clone(),
        source: e,
    })?;

    serde_json::from_str(&content)
        .map_err(|e| ControlError::config(format!("Failed to parse settings JSON: {}", e)))
}

/// Save settings to JSON file
/// Uses atomic write (temp file + rename) to prevent corruption on crash
pub fn save_settings(settings: &ClientSettings) -> Result<()> {
    use std::io::Write;

    let path = get_settings_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ControlError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    let temp_path = path.with_extension("json.tmp");

    let write_err = |e| ControlError::FileWrite {
        path: temp_path.clone(),
        source: e,
    };
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(json.as_bytes()).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, &path).map_err(|e| ControlError::FileWrite {
        path: path.clone(),
        source: e,
    })?;

    update_cache(settings);
    Ok(())
}

/// Update settings through a closure and save
pub fn update_setting<F>(updater: F) -> Result<ClientSettings>
where
    F: FnOnce(&mut ClientSettings),
{
    let mut settings = load_settings()?;
    updater(&mut settings);
    save_settings(&settings)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn with_config_dir<F: FnOnce(&TempDir)>(f: F) {
        let dir = TempDir::new().unwrap();
        std::env::set_var(paths::CONFIG_DIR_ENV, dir.path());
        invalidate_settings_cache();
        f(&dir);
        std::env::remove_var(paths::CONFIG_DIR_ENV);
        invalidate_settings_cache();
    }

    #[test]
    #[serial]
    fn test_missing_file_yields_defaults() {
        with_config_dir(|_| {
            let settings = load_settings().unwrap();
            assert_eq!(settings.sync.throttle_interval_ms, 33);
            assert_eq!(settings.logging.level, "info");
            assert!(settings.registry.path.is_none());
        });
    }

    #[test]
    #[serial]
    fn test_save_is_atomic_and_cached() {
        with_config_dir(|dir| {
            let saved = update_setting(|s| s.sync.throttle_interval_ms = 100).unwrap();
            assert_eq!(saved.sync.throttle_interval_ms, 100);
            assert!(dir.path().join("settings.json").exists());
            assert!(!dir.path().join("settings.json.tmp").exists());
            assert_eq!(get_cached_settings().sync.throttle_interval_ms, 100);
        });
    }

    #[test]
    #[serial]
    fn test_partial_file_fills_defaults() {
        with_config_dir(|dir| {
            fs::write(
                dir.path().join("settings.json"),
                r#"{"logging":{"level":"debug"}}"#,
            )
            .unwrap();
            let settings = load_settings().unwrap();
            assert_eq!(settings.logging.level, "debug");
            assert_eq!(settings.sync.throttle_interval_ms, 33);
        });
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_config_error() {
        with_config_dir(|dir| {
            fs::write(dir.path().join("settings.json"), "{not json").unwrap();
            assert!(matches!(load_settings(), Err(ControlError::Config(_))));
        });
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let sync = SyncSettings {
            throttle_interval_ms: 0,
        };
        assert_eq!(sync.throttle_interval(), Duration::from_millis(1));
    }
}
