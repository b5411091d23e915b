//! JSON framing for byte-oriented transports
//!
//! Shared queues only carry bytes, so protocol messages are encoded as
//! one JSON object per queue item: `{"action": "...", ...}`.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a message into one queue item
pub fn encode<M: Serialize>(message: &M) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decode one queue item
pub fn decode<M: DeserializeOwned>(bytes: &[u8]) -> Result<M, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Wire encoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Failed to encode message: {0}")]
    Encode(String),
    #[error("Failed to decode message: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashingMode;
    use crate::protocol::{NetworkMessage, RequestId, WorkerMessage};
    use serde_json::{json, Value};

    fn as_json(message: &WorkerMessage) -> Value {
        serde_json::from_slice(&encode(message).unwrap()).unwrap()
    }

    #[test]
    fn test_wire_field_names() {
        let init = WorkerMessage::InitRequest {
            request_id: RequestId::from("7"),
            url: "http://x/y".to_string(),
        };
        assert_eq!(
            as_json(&init),
            json!({"action": "init_request", "requestId": "7", "url": "http://x/y"})
        );

        let mode = WorkerMessage::HashingMode {
            mode: HashingMode::Most,
        };
        assert_eq!(as_json(&mode), json!({"action": "hashing_mode", "mode": "most"}));

        let finalize = WorkerMessage::FinalizeRequest {
            request_id: RequestId::from("7"),
        };
        assert_eq!(
            as_json(&finalize),
            json!({"action": "finalize_request", "requestId": "7"})
        );

        let cancel = WorkerMessage::CancelRequest {
            request_id: RequestId::from("7"),
        };
        assert_eq!(
            as_json(&cancel),
            json!({"action": "cancel_request", "requestId": "7"})
        );
    }

    #[test]
    fn test_update_payload_is_hex() {
        let update = WorkerMessage::UpdateRequest {
            request_id: RequestId::from("7"),
            data: b"AAA".to_vec(),
        };
        assert_eq!(
            as_json(&update),
            json!({"action": "update_request", "requestId": "7", "data": "414141"})
        );

        let decoded: WorkerMessage =
            decode(br#"{"action":"update_request","requestId":"7","data":"414141"}"#).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_hash_found() {
        let decoded: NetworkMessage = decode(br#"{"action":"hash_found","url":"http://x"}"#).unwrap();
        assert_eq!(
            decoded,
            NetworkMessage::HashFound {
                url: "http://x".to_string()
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        let unknown = decode::<WorkerMessage>(br#"{"action":"shutdown"}"#);
        assert!(matches!(unknown, Err(ProtocolError::Decode(_))));

        let bad_hex = decode::<WorkerMessage>(
            br#"{"action":"update_request","requestId":"7","data":"zz"}"#,
        );
        assert!(matches!(bad_hex, Err(ProtocolError::Decode(_))));
    }
}
