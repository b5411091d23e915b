//! In-flight exchange tracking
//!
//! The registry owns one `RequestEntity` per exchange id for as long as
//! the exchange's body is being observed. An entity tells the hashing
//! context about its exchange lazily: `init_request` goes out right
//! before the first chunk, and `finalize_request` goes out on removal
//! only if that happened.
//!
//! A failed post breaks the entity: later chunks are passed through but
//! no longer forwarded, and removal sends `cancel_request` instead of
//! `finalize_request` so a body with a gap is never compared.

use std::collections::HashMap;

use log::{debug, warn};

use crate::protocol::{ChannelError, MessageChannel, RequestId, WorkerMessage};

/// One observed exchange
#[derive(Debug)]
pub struct RequestEntity {
    id: RequestId,
    url: String,
    /// `init_request` has been sent for this id
    transferred: bool,
    /// A post failed; the hashing side holds an incomplete body
    broken: bool,
}

impl RequestEntity {
    fn new(id: RequestId, url: String) -> Self {
        Self {
            id,
            url,
            transferred: false,
            broken: false,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_transferred(&self) -> bool {
        self.transferred
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Hand one chunk over to the hashing context
    ///
    /// The chunk is moved into the message; nothing on this side can
    /// touch it afterwards.
    pub fn send_data<C>(&mut self, data: Vec<u8>, channel: &mut C) -> Result<(), ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
    {
        if self.broken {
            debug!("[request_id={}] Broken, chunk not forwarded", self.id);
            return Ok(());
        }

        let result = self.forward(data, channel);
        if let Err(e) = &result {
            warn!("[request_id={}] No longer forwarding: {}", self.id, e);
            self.broken = true;
        }
        result
    }

    fn forward<C>(&mut self, data: Vec<u8>, channel: &mut C) -> Result<(), ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
    {
        if !self.transferred {
            channel.post(WorkerMessage::InitRequest {
                request_id: self.id.clone(),
                url: self.url.clone(),
            })?;
            self.transferred = true;
        }

        channel.post(WorkerMessage::UpdateRequest {
            request_id: self.id.clone(),
            data,
        })
    }

    fn cleanup<C>(self, channel: &mut C) -> Result<(), ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
    {
        let request_id = self.id;
        match (self.transferred, self.broken) {
            (false, _) => Ok(()),
            (true, false) => channel.post(WorkerMessage::FinalizeRequest { request_id }),
            (true, true) => channel.post(WorkerMessage::CancelRequest { request_id }),
        }
    }
}

/// Exchange id -> entity map, owned by the network context
#[derive(Debug, Default)]
pub struct RequestRegistry {
    entries: HashMap<RequestId, RequestEntity>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entity for `id`, creating it if absent
    ///
    /// An id determines its exchange, so `url` is ignored for an id
    /// already tracked.
    pub fn get(&mut self, id: &RequestId, url: &str) -> &mut RequestEntity {
        self.entries.entry(id.clone()).or_insert_with(|| {
            debug!("[request_id={}] Tracking {}", id, url);
            RequestEntity::new(id.clone(), url.to_string())
        })
    }

    /// Existing entity only
    pub fn lookup(&mut self, id: &RequestId) -> Option<&mut RequestEntity> {
        self.entries.get_mut(id)
    }

    /// Stop tracking `id`, finalizing its job if data was transferred
    ///
    /// The entry is purged even when the finalize message cannot be
    /// delivered. Returns whether `id` was tracked.
    pub fn remove<C>(&mut self, id: &RequestId, channel: &mut C) -> Result<bool, ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
    {
        let Some(entity) = self.entries.remove(id) else {
            return Ok(false);
        };

        debug!(
            "[request_id={}] Untracking (transferred={}, broken={})",
            id, entity.transferred, entity.broken
        );
        entity.cleanup(channel)?;
        Ok(true)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
