//! Sona appliance entry point

mod stubs;

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use sona_codec::{OpusFrameDecoder, OpusFrameEncoder};
use sona_config::{load_settings, JsonFileStore, Settings, SettingsStore};
use sona_core::Transport;
use sona_engine::{Collaborators, Session, SessionConfig};
use sona_transport::{MqttTransport, MqttTransportConfig};

use stubs::{
    HeadlessDeviceControl, LogNotifier, NoAudioProcessor, NoOta, NoWakeWord, NullAudioDevice,
};

const SETTINGS_STORE_PATH: &str = "sona-settings.json";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = load_settings(std::env::var("SONA_ENV").ok().as_deref())?;

    init_tracing(&settings);
    tracing::info!("starting sona appliance v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn SettingsStore> = Arc::new(JsonFileStore::open(SETTINGS_STORE_PATH)?);

    let device_id = if settings.mqtt.client_id.is_empty() {
        "sona-dev".to_string()
    } else {
        settings.mqtt.client_id.clone()
    };

    let transport = Arc::new(MqttTransport::new(
        MqttTransportConfig::from_settings(&settings.mqtt, &device_id),
        Arc::clone(&store),
    )?);

    let session = Session::new(
        SessionConfig {
            aec_mode: settings.audio.aec_mode,
            encoder_complexity: settings.audio.encoder_complexity,
            worker_threads: settings.audio.worker_threads,
        },
        Collaborators {
            transport: transport.clone(),
            device: Arc::new(NullAudioDevice::new()),
            processor: Arc::new(NoAudioProcessor::new()),
            wake_word: Arc::new(NoWakeWord::new()),
            notifier: Arc::new(LogNotifier),
            device_control: Arc::new(HeadlessDeviceControl::new(Arc::clone(&store))),
            ota: Arc::new(NoOta),
        },
        Box::new(OpusFrameEncoder::new()?),
        Box::new(OpusFrameDecoder::new()?),
    );

    transport.install_hooks(session.transport_hooks());
    session.start()?;

    if let Err(e) = transport.wakeup_call() {
        tracing::warn!("wakeup announcement failed: {e}");
    }

    shutdown_signal().await;
    tracing::info!("shutting down");
    session.shutdown();

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sona={}", settings.observability.log_level).into());

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
