//! Firmware version check and upgrade hand-off
//!
//! A one-shot task: keep checking until the server answers, then either
//! finish startup or wait for Idle and run the upgrade on the session loop.
//! Failed checks retry every 60 s for the first five attempts, then every
//! 300 s.

use std::sync::Arc;
use std::time::Duration;

use sona_core::DeviceState;

use crate::session::Session;

const RETRY_SHORT: Duration = Duration::from_secs(60);
const RETRY_LONG: Duration = Duration::from_secs(300);
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Backoff schedule for failed version checks.
pub(crate) fn retry_delay(failures: u32) -> Duration {
    if failures > 5 {
        RETRY_LONG
    } else {
        RETRY_SHORT
    }
}

impl Session {
    pub(crate) fn version_check_loop(self: Arc<Self>) {
        let mut failures = 0u32;

        loop {
            if self.is_stopping() {
                return;
            }

            match self.ota.check() {
                Ok(check) => {
                    self.has_server_time
                        .store(check.has_server_time, std::sync::atomic::Ordering::Release);

                    match check.new_version {
                        Some(version) => {
                            tracing::info!(%version, "new firmware version available");
                            self.wait_for_idle_then_upgrade(version);
                        }
                        None => {
                            self.ota.mark_valid();
                            tracing::info!(
                                version = %self.ota.current_version(),
                                "firmware is up to date"
                            );
                            let session = Arc::clone(&self);
                            self.schedule(move || session.finish_startup());
                        }
                    }
                    return;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(failures, "version check failed: {e}");
                    self.sleep_with_stop(retry_delay(failures));
                }
            }
        }
    }

    fn finish_startup(&self) {
        self.notifier
            .show_notification(&format!("version {}", self.ota.current_version()));
        self.notifier.set_chat_message("system", "");
        self.set_state(DeviceState::Idle);
    }

    fn wait_for_idle_then_upgrade(self: &Arc<Self>, version: String) {
        // The startup transition to Idle has not happened on this path;
        // schedule it so the device can settle before upgrading.
        {
            let session = Arc::clone(self);
            self.schedule(move || {
                if session.state.load() == DeviceState::Starting {
                    session.set_state(DeviceState::Idle);
                }
            });
        }

        tracing::info!("waiting for idle state before upgrade");
        while self.state.load() != DeviceState::Idle {
            if self.is_stopping() {
                return;
            }
            std::thread::sleep(IDLE_POLL);
        }

        let session = Arc::clone(self);
        self.schedule(move || session.run_upgrade(&version));
    }

    /// Runs on the session loop. Terminal for the session: pipelines are
    /// stopped and the transport closed by the Upgrading entry action.
    fn run_upgrade(self: &Arc<Self>, version: &str) {
        tracing::info!(%version, "starting firmware upgrade");
        self.set_state(DeviceState::Upgrading);
        self.notifier.set_status(&format!("upgrading to {version}"));

        let notifier = Arc::clone(&self.notifier);
        let mut last_reported = 0u8;
        let mut on_progress = move |progress: u8| {
            if progress != last_reported && (progress % 5 == 0 || progress >= 95) {
                notifier.set_status(&format!("{progress}%"));
                last_reported = progress;
            }
        };

        match self.ota.upgrade(&mut on_progress) {
            Ok(()) => {
                // A successful upgrade reboots from inside the routine.
                tracing::info!("upgrade routine returned, rebooting");
                self.device_control.reboot();
            }
            Err(e) => {
                tracing::error!("firmware upgrade failed: {e}");
                self.alert("error", "upgrade failed", "sad");

                // Best-effort pipeline restore before the mandatory reboot.
                self.device.enable_output(true);
                self.device.enable_input(true);
                self.processor.start();
                self.wake_word.start();

                self.device_control.reboot();
            }
        }
    }

    fn sleep_with_stop(&self, duration: Duration) {
        let step = Duration::from_millis(200);
        let mut remaining = duration;
        while remaining > Duration::ZERO && !self.is_stopping() {
            let slice = remaining.min(step);
            std::thread::sleep(slice);
            remaining -= slice;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_schedule() {
        for failures in 1..=5 {
            assert_eq!(retry_delay(failures), RETRY_SHORT);
        }
        assert_eq!(retry_delay(6), RETRY_LONG);
        assert_eq!(retry_delay(100), RETRY_LONG);
    }
}
