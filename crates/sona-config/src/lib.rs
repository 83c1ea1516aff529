//! Settings model and persisted device state
//!
//! Provisioned configuration (broker credentials, AEC mode, OTA endpoint)
//! is loaded from files and environment; user-adjustable device state
//! (actuator levels, volume, language) lives in a small persisted
//! key-value store.

pub mod settings;
pub mod store;

pub use settings::{load_settings, MqttSettings, ObservabilitySettings, OtaSettings, Settings};
pub use store::{DeviceLevels, JsonFileStore, SettingsStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("store error: {0}")]
    Store(String),
}
