//! proxy-wasm host bindings
//!
//! Shared queues carry protocol messages between VMs; shared data holds
//! the runtime configuration record.

use std::marker::PhantomData;

use log::{debug, warn};
use proxy_wasm::hostcalls;
use proxy_wasm::types::Status;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{ConfigError, StoredConfig};
use crate::network::{ConfigStore, StoreEntry};
use crate::protocol::{self, ChannelError, MessageChannel};

/// Channel over a shared queue registered by another VM
///
/// The queue is resolved on first use: the peer VM may not have
/// registered it yet when this side starts.
pub struct SharedQueueChannel<M> {
    vm_id: String,
    name: String,
    queue_id: Option<u32>,
    _message: PhantomData<fn(M)>,
}

impl<M> SharedQueueChannel<M> {
    pub fn new(vm_id: &str, name: &str) -> Self {
        Self {
            vm_id: vm_id.to_string(),
            name: name.to_string(),
            queue_id: None,
            _message: PhantomData,
        }
    }

    fn resolve(&mut self) -> Result<u32, ChannelError> {
        if let Some(queue_id) = self.queue_id {
            return Ok(queue_id);
        }

        match hostcalls::resolve_shared_queue(&self.vm_id, &self.name) {
            Ok(Some(queue_id)) => {
                debug!("Resolved queue '{}' on vm '{}'", self.name, self.vm_id);
                self.queue_id = Some(queue_id);
                Ok(queue_id)
            }
            Ok(None) => Err(ChannelError::Unavailable(self.name.clone())),
            Err(status) => Err(ChannelError::Host(format!("{:?}", status))),
        }
    }
}

impl<M: Serialize> MessageChannel<M> for SharedQueueChannel<M> {
    fn post(&mut self, message: M) -> Result<(), ChannelError> {
        let queue_id = self.resolve()?;
        let bytes = protocol::encode(&message)?;

        match hostcalls::enqueue_shared_queue(queue_id, Some(bytes.as_slice())) {
            Ok(()) => Ok(()),
            Err(Status::NotFound) => {
                // Peer VM restarted; resolve again next time
                self.queue_id = None;
                Err(ChannelError::Unavailable(self.name.clone()))
            }
            Err(status) => Err(ChannelError::Host(format!("{:?}", status))),
        }
    }
}

/// Register a queue owned by this VM
pub fn register_queue(name: &str) -> Result<u32, ChannelError> {
    hostcalls::register_shared_queue(name).map_err(|status| ChannelError::Host(format!("{:?}", status)))
}

/// Dequeue and decode every pending item
///
/// Items that fail to decode are logged and skipped.
pub fn drain_queue<M: DeserializeOwned>(queue_id: u32) -> Vec<M> {
    let mut messages = Vec::new();
    loop {
        match hostcalls::dequeue_shared_queue(queue_id) {
            Ok(Some(bytes)) => match protocol::decode(&bytes) {
                Ok(message) => messages.push(message),
                Err(e) => warn!("Dropping queue item: {}", e),
            },
            Ok(None) | Err(Status::Empty) => break,
            Err(status) => {
                warn!("Failed to dequeue from queue {}: {:?}", queue_id, status);
                break;
            }
        }
    }
    messages
}

/// Take the next number from a counter in shared data
///
/// Every VM that calls this with the same key gets a distinct value.
pub fn allocate_vm_nonce(key: &str) -> Result<u64, ConfigError> {
    const ATTEMPTS: usize = 8;

    for _ in 0..ATTEMPTS {
        let (bytes, cas) = hostcalls::get_shared_data(key)
            .map_err(|status| ConfigError::Store(format!("{:?}", status)))?;
        let current = bytes
            .and_then(|b| <[u8; 8]>::try_from(b.as_slice()).ok())
            .map_or(0, u64::from_be_bytes);
        let next = current.wrapping_add(1);

        match hostcalls::set_shared_data(key, Some(&next.to_be_bytes()[..]), cas) {
            Ok(()) => return Ok(next),
            Err(Status::CasMismatch) => debug!("VM counter '{}' raced, retrying", key),
            Err(status) => return Err(ConfigError::Store(format!("{:?}", status))),
        }
    }

    Err(ConfigError::Store(format!(
        "counter '{}' still contended after {} attempts",
        key, ATTEMPTS
    )))
}

/// Configuration store backed by proxy-wasm shared data
pub struct SharedDataStore {
    key: String,
}

impl SharedDataStore {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl ConfigStore for SharedDataStore {
    fn retrieve(&self) -> Result<Option<StoreEntry>, ConfigError> {
        match hostcalls::get_shared_data(&self.key) {
            Ok((Some(bytes), Some(version))) => Ok(Some(StoreEntry { bytes, version })),
            Ok(_) => Ok(None),
            Err(status) => Err(ConfigError::Store(format!("{:?}", status))),
        }
    }

    fn save(&mut self, record: &StoredConfig) -> Result<(), ConfigError> {
        let bytes = record.to_bytes()?;
        hostcalls::set_shared_data(&self.key, Some(bytes.as_slice()), None)
            .map_err(|status| ConfigError::Store(format!("{:?}", status)))
    }
}
