//! Cross-context message protocol
//!
//! The network context drives the hashing context exclusively through
//! these messages. Every message is posted by value: byte payloads are
//! moved into the message and the sender keeps no handle to them.

pub mod channel;
pub mod codec;

pub use channel::{memory_channel, ChannelError, MemoryReceiver, MemorySender, MessageChannel};
pub use codec::{decode, encode, ProtocolError};

use serde::{Deserialize, Serialize};

use crate::config::HashingMode;

/// Identifier of one observed exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of an HTTP context inside one VM
    ///
    /// Context ids restart in every VM, so the VM's nonce keeps ids from
    /// different VMs apart at the shared hashing VM.
    pub fn scoped(vm_nonce: u64, context_id: u32) -> Self {
        Self(format!("{:x}-{}", vm_nonce, context_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Messages from the network context to the hashing context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Switch the comparison mode for all later digests
    HashingMode { mode: HashingMode },
    /// One-shot digest of a URL (no body access)
    HashSingleUrl { url: String },
    /// Open a job for an exchange
    InitRequest {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        url: String,
    },
    /// Append a body chunk to a job
    UpdateRequest {
        #[serde(rename = "requestId")]
        request_id: RequestId,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    /// Close a job and compare its digest
    FinalizeRequest {
        #[serde(rename = "requestId")]
        request_id: RequestId,
    },
    /// Drop a job whose body was not fully delivered, without comparing
    CancelRequest {
        #[serde(rename = "requestId")]
        request_id: RequestId,
    },
}

impl WorkerMessage {
    /// Wire name of the message kind
    pub fn action(&self) -> &'static str {
        match self {
            WorkerMessage::HashingMode { .. } => "hashing_mode",
            WorkerMessage::HashSingleUrl { .. } => "hash_single_url",
            WorkerMessage::InitRequest { .. } => "init_request",
            WorkerMessage::UpdateRequest { .. } => "update_request",
            WorkerMessage::FinalizeRequest { .. } => "finalize_request",
            WorkerMessage::CancelRequest { .. } => "cancel_request",
        }
    }

    /// Exchange the message is scoped to, if any
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            WorkerMessage::InitRequest { request_id, .. }
            | WorkerMessage::UpdateRequest { request_id, .. }
            | WorkerMessage::FinalizeRequest { request_id }
            | WorkerMessage::CancelRequest { request_id } => Some(request_id),
            WorkerMessage::HashingMode { .. } | WorkerMessage::HashSingleUrl { .. } => None,
        }
    }
}

/// Messages from the hashing context back to the network context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NetworkMessage {
    /// A digest matched the known-hash set
    HashFound { url: String },
}

/// Hex encoding for byte payloads inside JSON messages
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}
