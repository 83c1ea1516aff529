//! Persisted key-value settings store
//!
//! Holds the user-adjustable device state that must survive a power cycle:
//! actuator levels, volume and the interaction language. Board code reads
//! and writes through the [`SettingsStore`] trait; the JSON file
//! implementation is the default backend.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::ConfigError;

pub const KEY_ROCK_LEVEL: &str = "rock_level";
pub const KEY_SUCK_LEVEL: &str = "suck_level";
pub const KEY_HEATER_LEVEL: &str = "heater_level";
pub const KEY_VOLUME_LEVEL: &str = "volume_level";
pub const KEY_LANGUAGE: &str = "languagesType";

/// Persisted key-value storage.
pub trait SettingsStore: Send + Sync {
    fn get_str(&self, key: &str) -> Option<String>;
    fn set_str(&self, key: &str, value: &str);
    fn get_int(&self, key: &str, default: i64) -> i64;
    fn set_int(&self, key: &str, value: i64);
}

/// JSON-file-backed store. Every write is flushed to disk.
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| ConfigError::Store(format!("corrupt store {}: {e}", path.display())))?,
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    fn flush(&self, values: &BTreeMap<String, serde_json::Value>) {
        match serde_json::to_string_pretty(values) {
            Ok(contents) => {
                if let Err(e) = fs::write(&self.path, contents) {
                    tracing::warn!("failed to persist settings to {}: {e}", self.path.display());
                }
            }
            Err(e) => tracing::warn!("failed to serialize settings: {e}"),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    fn set_str(&self, key: &str, value: &str) {
        let mut values = self.values.lock();
        values.insert(key.to_string(), serde_json::Value::from(value));
        self.flush(&values);
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .lock()
            .get(key)
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(default)
    }

    fn set_int(&self, key: &str, value: i64) {
        let mut values = self.values.lock();
        values.insert(key.to_string(), serde_json::Value::from(value));
        self.flush(&values);
    }
}

/// Actuator levels and volume with the board's clamping rules applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLevels {
    pub rock: u8,
    pub suck: u8,
    pub heater: u8,
    pub volume: u8,
}

impl DeviceLevels {
    /// Motor and heater levels run 1-8.
    pub fn clamp_level(level: u8) -> u8 {
        level.clamp(1, 8)
    }

    /// Volume runs 60-100.
    pub fn clamp_volume(volume: u8) -> u8 {
        volume.clamp(60, 100)
    }

    pub fn load(store: &dyn SettingsStore) -> Self {
        Self {
            rock: Self::clamp_level(store.get_int(KEY_ROCK_LEVEL, 1) as u8),
            suck: Self::clamp_level(store.get_int(KEY_SUCK_LEVEL, 1) as u8),
            heater: Self::clamp_level(store.get_int(KEY_HEATER_LEVEL, 1) as u8),
            volume: Self::clamp_volume(store.get_int(KEY_VOLUME_LEVEL, 80) as u8),
        }
    }

    pub fn save(&self, store: &dyn SettingsStore) {
        store.set_int(KEY_ROCK_LEVEL, self.rock as i64);
        store.set_int(KEY_SUCK_LEVEL, self.suck as i64);
        store.set_int(KEY_HEATER_LEVEL, self.heater as i64);
        store.set_int(KEY_VOLUME_LEVEL, self.volume as i64);
    }
}

impl Default for DeviceLevels {
    fn default() -> Self {
        Self {
            rock: 1,
            suck: 1,
            heater: 1,
            volume: 80,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (JsonFileStore, PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "sona-store-test-{}-{:?}.json",
            std::process::id(),
            std::thread::current().id()
        ));
        let _ = fs::remove_file(&path);
        (JsonFileStore::open(&path).unwrap(), path)
    }

    #[test]
    fn test_store_round_trip() {
        let (store, path) = temp_store();
        store.set_int(KEY_VOLUME_LEVEL, 70);
        store.set_str(KEY_LANGUAGE, "en");

        assert_eq!(store.get_int(KEY_VOLUME_LEVEL, 80), 70);
        assert_eq!(store.get_str(KEY_LANGUAGE).as_deref(), Some("en"));

        // Reopen from disk
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get_int(KEY_VOLUME_LEVEL, 80), 70);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_missing_keys_fall_back() {
        let (store, path) = temp_store();
        assert_eq!(store.get_int("nope", 42), 42);
        assert_eq!(store.get_str("nope"), None);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_level_clamping() {
        assert_eq!(DeviceLevels::clamp_level(0), 1);
        assert_eq!(DeviceLevels::clamp_level(9), 8);
        assert_eq!(DeviceLevels::clamp_level(4), 4);
        assert_eq!(DeviceLevels::clamp_volume(10), 60);
        assert_eq!(DeviceLevels::clamp_volume(255), 100);
    }

    #[test]
    fn test_levels_load_save() {
        let (store, path) = temp_store();
        let levels = DeviceLevels {
            rock: 3,
            suck: 2,
            heater: 5,
            volume: 90,
        };
        levels.save(&store);
        assert_eq!(DeviceLevels::load(&store), levels);
        let _ = fs::remove_file(&path);
    }
}
