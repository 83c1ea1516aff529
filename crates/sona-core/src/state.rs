//! Device and session state enums
//!
//! `DeviceState` is the authoritative appliance state. Exactly one value is
//! current at any instant and only the session loop mutates it; everyone else
//! reads through the atomic cells below.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Authoritative device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Unknown,
    Starting,
    WifiConfiguring,
    Idle,
    Connecting,
    Listening,
    Speaking,
    Upgrading,
    Activating,
    AudioTesting,
    FatalError,
}

impl DeviceState {
    /// Snake-case name used in logs and state-change notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Starting => "starting",
            DeviceState::WifiConfiguring => "configuring",
            DeviceState::Idle => "idle",
            DeviceState::Connecting => "connecting",
            DeviceState::Listening => "listening",
            DeviceState::Speaking => "speaking",
            DeviceState::Upgrading => "upgrading",
            DeviceState::Activating => "activating",
            DeviceState::AudioTesting => "audio_testing",
            DeviceState::FatalError => "fatal_error",
        }
    }

    fn from_u8(value: u8) -> DeviceState {
        match value {
            1 => DeviceState::Starting,
            2 => DeviceState::WifiConfiguring,
            3 => DeviceState::Idle,
            4 => DeviceState::Connecting,
            5 => DeviceState::Listening,
            6 => DeviceState::Speaking,
            7 => DeviceState::Upgrading,
            8 => DeviceState::Activating,
            9 => DeviceState::AudioTesting,
            10 => DeviceState::FatalError,
            _ => DeviceState::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DeviceState::Unknown => 0,
            DeviceState::Starting => 1,
            DeviceState::WifiConfiguring => 2,
            DeviceState::Idle => 3,
            DeviceState::Connecting => 4,
            DeviceState::Listening => 5,
            DeviceState::Speaking => 6,
            DeviceState::Upgrading => 7,
            DeviceState::Activating => 8,
            DeviceState::AudioTesting => 9,
            DeviceState::FatalError => 10,
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free cell holding the current [`DeviceState`].
///
/// Writes go through the session loop only; reads happen from the transport
/// callbacks, the capture loop and the playback loop.
#[derive(Debug)]
pub struct AtomicDeviceState(AtomicU8);

impl AtomicDeviceState {
    pub fn new(state: DeviceState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> DeviceState {
        DeviceState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: DeviceState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }
}

/// How a listening session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListeningMode {
    /// The server decides when speech has ended.
    AutoStop,
    /// The user explicitly stops listening (push-to-talk).
    ManualStop,
    /// Full-duplex; the device keeps listening while speaking.
    Realtime,
}

#[derive(Debug)]
pub struct AtomicListeningMode(AtomicU8);

impl AtomicListeningMode {
    pub fn new(mode: ListeningMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn load(&self) -> ListeningMode {
        match self.0.load(Ordering::Acquire) {
            1 => ListeningMode::ManualStop,
            2 => ListeningMode::Realtime,
            _ => ListeningMode::AutoStop,
        }
    }

    pub fn store(&self, mode: ListeningMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

/// Where acoustic echo cancellation runs, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AecMode {
    Off,
    OnDevice,
    OnServer,
}

#[derive(Debug)]
pub struct AtomicAecMode(AtomicU8);

impl AtomicAecMode {
    pub fn new(mode: AecMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    pub fn load(&self) -> AecMode {
        match self.0.load(Ordering::Acquire) {
            1 => AecMode::OnDevice,
            2 => AecMode::OnServer,
            _ => AecMode::Off,
        }
    }

    pub fn store(&self, mode: AecMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

/// Why a speaking session was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    None,
    WakeWordDetected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            DeviceState::Unknown,
            DeviceState::Starting,
            DeviceState::WifiConfiguring,
            DeviceState::Idle,
            DeviceState::Connecting,
            DeviceState::Listening,
            DeviceState::Speaking,
            DeviceState::Upgrading,
            DeviceState::Activating,
            DeviceState::AudioTesting,
            DeviceState::FatalError,
        ] {
            let cell = AtomicDeviceState::new(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(DeviceState::Speaking.as_str(), "speaking");
        assert_eq!(DeviceState::WifiConfiguring.as_str(), "configuring");
        assert_eq!(DeviceState::AudioTesting.to_string(), "audio_testing");
    }

    #[test]
    fn test_mode_cells() {
        let mode = AtomicListeningMode::new(ListeningMode::AutoStop);
        mode.store(ListeningMode::Realtime);
        assert_eq!(mode.load(), ListeningMode::Realtime);

        let aec = AtomicAecMode::new(AecMode::Off);
        aec.store(AecMode::OnServer);
        assert_eq!(aec.load(), AecMode::OnServer);
    }
}
