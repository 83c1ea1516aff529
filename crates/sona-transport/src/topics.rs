//! Topic layout derived from the device identity

/// The fixed topic set for one device.
#[derive(Debug, Clone)]
pub struct DeviceTopics {
    /// Session topic from provisioning; carries both JSON and raw audio.
    pub session: String,
    /// Remote-control commands from the companion app.
    pub control: String,
    /// Settings pushes (interaction language).
    pub settings: String,
    /// Prompt-sound control.
    pub moan: String,
    /// Server-side voice-activity signals.
    pub vad: String,
    /// Outbound IMU/touch status.
    pub imu_status: String,
    /// Outbound reply-cancellation requests.
    pub cancel_tts: String,
    /// Outbound device-ready announcement.
    pub wakeup: String,
}

impl DeviceTopics {
    pub fn new(device_id: &str, session_topic: &str) -> Self {
        Self {
            session: session_topic.to_string(),
            control: format!("doll/control/{device_id}"),
            settings: format!("doll/set/{device_id}"),
            moan: format!("doll/control_moan/{device_id}"),
            vad: format!("doll/vad/{device_id}"),
            imu_status: "doll/imu_status".to_string(),
            cancel_tts: "tts/cancel".to_string(),
            wakeup: "stt/audio/text".to_string(),
        }
    }

    /// Outbound audio/text topic; depends on the interaction language.
    pub fn publish_topic(device_id: &str, language: &str) -> String {
        format!("stt/doll/{device_id}/{language}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = DeviceTopics::new("84f3eb000000", "server/session/84f3eb000000");
        assert_eq!(topics.session, "server/session/84f3eb000000");
        assert_eq!(topics.control, "doll/control/84f3eb000000");
        assert_eq!(topics.settings, "doll/set/84f3eb000000");
        assert_eq!(topics.moan, "doll/control_moan/84f3eb000000");
        assert_eq!(topics.vad, "doll/vad/84f3eb000000");
    }

    #[test]
    fn test_publish_topic_includes_language() {
        assert_eq!(
            DeviceTopics::publish_topic("84f3eb000000", "en"),
            "stt/doll/84f3eb000000/en"
        );
    }
}
