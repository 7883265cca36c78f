use crate::keymap::KeyId;
use serde::{Deserialize, Serialize};

/// Messages from daemon to control clients (JSON-lines over Unix socket).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonMsg {
    /// Status response for a freshly opened control surface.
    #[serde(rename = "status")]
    Status {
        armed: bool,
        key: Option<KeyId>,
        key_name: Option<String>,
        version: String,
    },
    /// Broadcast to subscribers whenever the switch arms or disarms.
    #[serde(rename = "status_changed")]
    StatusChanged { armed: bool },
    /// Capture countdown tick (fraction runs 0.0 → 1.0).
    #[serde(rename = "capture_progress")]
    CaptureProgress {
        ticks_remaining: u8,
        fraction: f32,
        candidate: Option<String>,
    },
    /// Capture resolved with a chosen key; the switch is now armed on it.
    #[serde(rename = "capture_committed")]
    CaptureCommitted { key: KeyId, key_name: String },
    /// Capture window expired with no usable candidate.
    #[serde(rename = "capture_cancelled")]
    CaptureCancelled,
    /// Acknowledgement for commands.
    #[serde(rename = "ack")]
    Ack { ok: bool, message: String },
}

/// Messages from control clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    /// Arm the switch on the given key. Each arm carries its key explicitly;
    /// the persisted preference is never authoritative daemon-side.
    #[serde(rename = "arm")]
    Arm { key: KeyId },
    /// Disarm and reset all tracking state.
    #[serde(rename = "disarm")]
    Disarm,
    /// Replace the watched key while armed.
    #[serde(rename = "update_key")]
    UpdateKey { key: KeyId },
    /// Begin the timed key-capture countdown.
    #[serde(rename = "start_capture")]
    StartCapture,
    /// Abort an in-flight capture, leaving armed/key state untouched.
    #[serde(rename = "cancel_capture")]
    CancelCapture,
    /// Request current status.
    #[serde(rename = "get_status")]
    GetStatus,
    /// Register for broadcast events (status changes, capture progress).
    #[serde(rename = "subscribe")]
    Subscribe,
}

/// Serialize a message as a JSON line (with trailing newline).
pub fn encode(msg: &impl Serialize) -> String {
    let mut s = serde_json::to_string(msg).expect("serialize IPC message");
    s.push('\n');
    s
}

/// Deserialize a JSON line. Returns None on empty/whitespace input.
pub fn decode_daemon(line: &str) -> Option<DaemonMsg> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub fn decode_client(line: &str) -> Option<ClientMsg> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keymap::KEY_SPACE;

    #[test]
    fn encode_produces_single_trailing_newline() {
        let encoded = encode(&ClientMsg::Disarm);
        assert!(encoded.ends_with('\n'));
        assert_eq!(encoded.matches('\n').count(), 1);
    }

    #[test]
    fn encoded_messages_contain_type_field() {
        assert!(encode(&DaemonMsg::CaptureCancelled).contains("\"type\""));
        assert!(encode(&ClientMsg::GetStatus).contains("\"type\""));
    }

    #[test]
    fn arm_round_trips_with_key() {
        let encoded = encode(&ClientMsg::Arm { key: KEY_SPACE });
        match decode_client(&encoded).expect("should decode") {
            ClientMsg::Arm { key } => assert_eq!(key, KEY_SPACE),
            other => panic!("expected Arm, got {:?}", other),
        }
    }

    #[test]
    fn status_round_trips_with_optional_key() {
        let msg = DaemonMsg::Status {
            armed: true,
            key: Some(KEY_SPACE),
            key_name: Some("Space".into()),
            version: "0.1.0".into(),
        };
        match decode_daemon(&encode(&msg)).expect("should decode") {
            DaemonMsg::Status { armed, key, key_name, .. } => {
                assert!(armed);
                assert_eq!(key, Some(KEY_SPACE));
                assert_eq!(key_name.as_deref(), Some("Space"));
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn decode_returns_none_for_empty_or_garbage() {
        assert!(decode_daemon("").is_none());
        assert!(decode_daemon("   \n").is_none());
        assert!(decode_daemon("not json").is_none());
        assert!(decode_client("{\"type\":\"warp_core\"}").is_none());
    }
}
