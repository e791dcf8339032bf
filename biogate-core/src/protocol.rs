//! Inbound commands and outbound messages of the scan protocol.
//!
//! Inbound frames are tagged by `action`, outbound frames by `type`. Every
//! outbound message except `status` carries a human-readable `message` for
//! the operator.

use serde::{Deserialize, Serialize};

use crate::quality::QualityLevel;
use crate::session::{FailureReason, SessionStatus};

/// Command sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Begin the capture flow. Only honoured while the session is idle.
    StartCapture,
    /// Ask for a [`SessionStatus`] snapshot. Accepted in every state.
    GetStatus,
    /// Abandon the session and release the device.
    Cancel,
}

/// Message sent to the client, in the order the session produces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    DeviceInit {
        message: String,
    },
    DeviceReady {
        deadline_secs: u64,
        message: String,
    },
    CaptureAttempt {
        attempt: u32,
        max_attempts: u32,
        deadline_secs: u64,
        message: String,
    },
    QualityCheck {
        quality: u8,
        quality_level: QualityLevel,
        message: String,
    },
    CaptureSuccess {
        template_length: usize,
        quality: u8,
        quality_level: QualityLevel,
        message: String,
    },
    CaptureFailed {
        reason: FailureReason,
        message: String,
    },
    Error {
        reason: FailureReason,
        message: String,
    },
    Done {
        message: String,
    },
    Status {
        #[serde(flatten)]
        status: SessionStatus,
    },
}

impl ServerMessage {
    pub fn device_init() -> Self {
        Self::DeviceInit {
            message: "Initializing fingerprint scanner...".into(),
        }
    }

    pub fn device_ready(deadline_secs: u64) -> Self {
        Self::DeviceReady {
            deadline_secs,
            message: "Device is ready. Please place your thumb firmly on the scanner.".into(),
        }
    }

    pub fn capture_attempt(attempt: u32, max_attempts: u32, deadline_secs: u64) -> Self {
        Self::CaptureAttempt {
            attempt,
            max_attempts,
            deadline_secs,
            message: format!(
                "Attempt {attempt}/{max_attempts}: Place your finger firmly on the sensor."
            ),
        }
    }

    pub fn quality_check(quality: u8, quality_level: QualityLevel) -> Self {
        Self::QualityCheck {
            quality,
            quality_level,
            message: format!("Quality score: {quality}/100. {}", quality_level.hint()),
        }
    }

    pub fn capture_success(
        template_length: usize,
        quality: u8,
        quality_level: QualityLevel,
    ) -> Self {
        Self::CaptureSuccess {
            template_length,
            quality,
            quality_level,
            message: format!("Fingerprint scan successful! Quality: {quality}/100"),
        }
    }

    pub fn done() -> Self {
        Self::Done {
            message: "Scan completed successfully.".into(),
        }
    }

    pub fn status(status: SessionStatus) -> Self {
        Self::Status { status }
    }

    /// Terminal failure message for `reason`, with the default operator text.
    pub fn failure(reason: FailureReason) -> Self {
        let message = match reason {
            FailureReason::DeviceUnavailable => {
                "Scanner is busy with another session. Please wait and retry."
            }
            FailureReason::QualityTooLow => {
                "Failed to capture fingerprint after multiple attempts."
            }
            FailureReason::Timeout => "No finger detected before the capture deadline.",
            FailureReason::DeviceDisconnected => "Scanner disconnected or reported a fault.",
            FailureReason::Cancelled => "Scan cancelled.",
        };
        Self::failure_with(reason, message)
    }

    /// Terminal failure message with a custom operator text.
    ///
    /// Device faults become `error`, everything else `capture_failed`.
    pub fn failure_with(reason: FailureReason, message: impl Into<String>) -> Self {
        let message = message.into();
        if reason.is_device_error() {
            Self::Error { reason, message }
        } else {
            Self::CaptureFailed { reason, message }
        }
    }

    /// Wire name of this message's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DeviceInit { .. } => "device_init",
            Self::DeviceReady { .. } => "device_ready",
            Self::CaptureAttempt { .. } => "capture_attempt",
            Self::QualityCheck { .. } => "quality_check",
            Self::CaptureSuccess { .. } => "capture_success",
            Self::CaptureFailed { .. } => "capture_failed",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
            Self::Status { .. } => "status",
        }
    }

    /// Returns true for the message that closes a session's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done { .. } | Self::CaptureFailed { .. } | Self::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use serde_json::json;

    #[test]
    fn client_commands_parse_by_action() {
        let start: ClientCommand = serde_json::from_str(r#"{"action":"start_capture"}"#).unwrap();
        assert_eq!(start, ClientCommand::StartCapture);

        let status: ClientCommand = serde_json::from_str(r#"{"action":"get_status"}"#).unwrap();
        assert_eq!(status, ClientCommand::GetStatus);

        let cancel: ClientCommand = serde_json::from_str(r#"{"action":"cancel"}"#).unwrap();
        assert_eq!(cancel, ClientCommand::Cancel);
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"action":"format_disk"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>(r#"{"cmd":"start_capture"}"#).is_err());
        assert!(serde_json::from_str::<ClientCommand>("start_capture").is_err());
    }

    #[test]
    fn capture_attempt_wire_shape() {
        let value = serde_json::to_value(ServerMessage::capture_attempt(2, 3, 20)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "capture_attempt",
                "attempt": 2,
                "max_attempts": 3,
                "deadline_secs": 20,
                "message": "Attempt 2/3: Place your finger firmly on the sensor.",
            })
        );
    }

    #[test]
    fn capture_success_wire_shape() {
        let value =
            serde_json::to_value(ServerMessage::capture_success(400, 75, QualityLevel::Excellent))
                .unwrap();
        assert_eq!(value["type"], "capture_success");
        assert_eq!(value["template_length"], 400);
        assert_eq!(value["quality"], 75);
        assert_eq!(value["quality_level"], "EXCELLENT");
        assert_eq!(value["message"], "Fingerprint scan successful! Quality: 75/100");
    }

    #[test]
    fn device_faults_are_errors() {
        let failure = ServerMessage::failure(FailureReason::DeviceDisconnected);
        let value = serde_json::to_value(failure).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["reason"], "device_disconnected");

        let value = serde_json::to_value(ServerMessage::failure(FailureReason::Timeout)).unwrap();
        assert_eq!(value["type"], "capture_failed");
        assert_eq!(value["reason"], "timeout");
    }

    #[test]
    fn status_is_flat() {
        let status = SessionStatus {
            state: SessionState::Retrying,
            attempt_count: 1,
            max_attempts: 3,
            last_quality_score: Some(30),
            last_quality_level: Some(QualityLevel::Low),
        };
        let value = serde_json::to_value(ServerMessage::status(status)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "status",
                "state": "retrying",
                "attempt_count": 1,
                "max_attempts": 3,
                "last_quality_score": 30,
                "last_quality_level": "LOW",
            })
        );
    }

    #[test]
    fn fresh_status_has_null_quality() {
        let status = SessionStatus {
            state: SessionState::Idle,
            attempt_count: 0,
            max_attempts: 3,
            last_quality_score: None,
            last_quality_level: None,
        };
        let value = serde_json::to_value(ServerMessage::status(status)).unwrap();
        assert!(value["last_quality_score"].is_null());
        assert!(value["last_quality_level"].is_null());
    }

    #[test]
    fn messages_parse_back() {
        let message = ServerMessage::quality_check(45, QualityLevel::Acceptable);
        let text = serde_json::to_string(&message).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.kind(), "quality_check");
        assert!(!parsed.is_terminal());
    }

    #[test]
    fn terminal_messages() {
        assert!(ServerMessage::done().is_terminal());
        assert!(ServerMessage::failure(FailureReason::Cancelled).is_terminal());
        assert!(!ServerMessage::capture_success(400, 90, QualityLevel::Excellent).is_terminal());
        assert!(!ServerMessage::device_init().is_terminal());
    }
}
