//! Sync protocol message types
//!
//! Two families of messages:
//!
//! - [`BroadcastMessage`]: discovery traffic, seen by every participant on
//!   the broadcast channel. JSON-encoded.
//! - [`ChannelMessage`]: traffic on a direct data channel between two
//!   devices. CBOR-encoded.

use serde::{Deserialize, Serialize};

use super::SyncError;
use crate::crypto::EncryptedPayload;

/// Messages on the shared broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastMessage {
    /// A hosting device announcing itself
    DeviceAvailable {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "deviceName")]
        device_name: String,
        timestamp: i64,
        /// Transport address to connect to, when the transport needs one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// A scanning device asking hosts to announce themselves
    DeviceDiscovery {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "deviceName")]
        device_name: String,
    },

    /// The sender stopped hosting or scanning
    DeviceUnavailable {
        #[serde(rename = "deviceId")]
        device_id: String,
    },

    /// Announces an outgoing connection so the target can correlate it
    SyncRequest {
        #[serde(rename = "fromDeviceId")]
        from_device_id: String,
        #[serde(rename = "toDeviceId")]
        to_device_id: String,
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
}

impl BroadcastMessage {
    /// Id of the device that sent the message
    pub fn sender(&self) -> &str {
        match self {
            BroadcastMessage::DeviceAvailable { device_id, .. }
            | BroadcastMessage::DeviceDiscovery { device_id, .. }
            | BroadcastMessage::DeviceUnavailable { device_id } => device_id,
            BroadcastMessage::SyncRequest { from_device_id, .. } => from_device_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        serde_json::to_vec(self).map_err(|e| SyncError::Protocol(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::Protocol(e.to_string()))
    }
}

/// Messages on a direct data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelMessage {
    /// First frame from each side: identity and ephemeral public key
    Hello {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "deviceName")]
        device_name: String,
        #[serde(rename = "publicKey", with = "serde_bytes")]
        public_key: Vec<u8>,
    },

    /// An encrypted snapshot
    SyncData {
        ciphertext: EncryptedPayload,
        timestamp: i64,
        #[serde(rename = "fromDevice")]
        from_device: String,
    },

    /// Receipt of a decrypted snapshot
    SyncAck { timestamp: i64 },
}

impl ChannelMessage {
    /// Encode message to CBOR bytes
    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| SyncError::Protocol(e.to_string()))?;
        Ok(bytes)
    }

    /// Decode message from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, SyncError> {
        ciborium::from_reader(bytes).map_err(|e| SyncError::Protocol(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMessage::Hello { .. } => "HELLO",
            ChannelMessage::SyncData { .. } => "SYNC_DATA",
            ChannelMessage::SyncAck { .. } => "SYNC_ACK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_wire_format() {
        let msg = BroadcastMessage::DeviceAvailable {
            device_id: "dev-a".into(),
            device_name: "Laptop".into(),
            timestamp: 42,
            endpoint: None,
        };
        let value: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "DEVICE_AVAILABLE", "deviceId": "dev-a", "deviceName": "Laptop", "timestamp": 42})
        );

        let req = BroadcastMessage::decode(
            br#"{"type":"SYNC_REQUEST","fromDeviceId":"a","toDeviceId":"b","connectionId":"c"}"#,
        )
        .unwrap();
        assert_eq!(req.sender(), "a");
    }

    #[test]
    fn test_unknown_broadcast_is_protocol_error() {
        assert!(matches!(
            BroadcastMessage::decode(br#"{"type":"PING"}"#),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn test_channel_message_cbor() {
        let msg = ChannelMessage::Hello {
            connection_id: "conn".into(),
            device_id: "dev".into(),
            device_name: "Phone".into(),
            public_key: vec![7u8; 32],
        };
        let decoded = ChannelMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.kind(), "HELLO");
    }

    #[test]
    fn test_sync_data_carries_payload() {
        let msg = ChannelMessage::SyncData {
            ciphertext: EncryptedPayload {
                iv: vec![1; 12],
                ciphertext: vec![2; 40],
                auth_tag: vec![3; 16],
            },
            timestamp: 1,
            from_device: "dev".into(),
        };
        match ChannelMessage::decode(&msg.encode().unwrap()).unwrap() {
            ChannelMessage::SyncData { ciphertext, .. } => assert_eq!(ciphertext.ciphertext.len(), 40),
            other => panic!("expected SYNC_DATA, got {}", other.kind()),
        }
    }

    #[test]
    fn test_garbage_frame_is_protocol_error() {
        assert!(ChannelMessage::decode(&[0xff, 0x00, 0x13]).is_err());
    }
}
