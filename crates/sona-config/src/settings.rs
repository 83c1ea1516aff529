//! Provisioned settings
//!
//! Loaded from `config/default` plus an optional environment-specific file,
//! then overridden by `SONA__`-prefixed environment variables. The appliance
//! has no CLI surface; this is the only configuration input.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use sona_core::AecMode;

use crate::ConfigError;

/// Top-level appliance settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Broker connection and topic provisioning
    #[serde(default)]
    pub mqtt: MqttSettings,

    /// Audio and session behavior
    #[serde(default)]
    pub audio: AudioSettings,

    /// Firmware update endpoint
    #[serde(default)]
    pub ota: OtaSettings,

    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilitySettings,
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.keepalive < 5 {
            return Err(ConfigError::InvalidValue {
                field: "mqtt.keepalive".to_string(),
                message: "keepalive below 5 seconds flaps the connection".to_string(),
            });
        }

        if self.audio.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.worker_threads".to_string(),
                message: "at least one worker thread is required".to_string(),
            });
        }

        Ok(())
    }
}

/// MQTT broker settings, provisioned into the settings store at activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    /// Broker host, optionally `host:port`
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Keepalive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,

    /// Per-device session topic carrying both JSON and raw audio
    #[serde(default)]
    pub subscribe_topic: String,
}

fn default_keepalive() -> u64 {
    90
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
            keepalive: default_keepalive(),
            subscribe_topic: String::new(),
        }
    }
}

/// Audio pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Where echo cancellation runs
    #[serde(default = "default_aec_mode")]
    pub aec_mode: AecMode,

    /// Background worker threads for encode/decode jobs
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Encoder complexity when no AEC constraint applies (0-10)
    #[serde(default = "default_complexity")]
    pub encoder_complexity: u8,
}

fn default_aec_mode() -> AecMode {
    AecMode::Off
}
fn default_worker_threads() -> usize {
    2
}
fn default_complexity() -> u8 {
    5
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            aec_mode: default_aec_mode(),
            worker_threads: default_worker_threads(),
            encoder_complexity: default_complexity(),
        }
    }
}

/// Firmware update settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtaSettings {
    #[serde(default)]
    pub check_url: String,
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            check_url: String::new(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Load settings from files and environment.
///
/// Priority (highest to lowest):
/// 1. Environment variables (`SONA__` prefix, `__` separator)
/// 2. `config/{env}` (if an environment name is given)
/// 3. `config/default`
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::with_name(&format!("config/{env_name}")).required(false));
    }

    builder = builder.add_source(Environment::with_prefix("SONA").separator("__").try_parsing(true));

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.mqtt.keepalive, 90);
        assert_eq!(settings.audio.worker_threads, 2);
        assert_eq!(settings.audio.aec_mode, AecMode::Off);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.mqtt.keepalive = 1;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.audio.worker_threads = 0;
        assert!(settings.validate().is_err());
    }
}
