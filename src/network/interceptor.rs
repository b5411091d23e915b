//! Response interception strategies
//!
//! One strategy is picked from the host's `Capability` at startup and
//! used for every exchange afterwards:
//! - `StreamingInterceptor` taps the body and feeds the registry
//! - `UrlOnlyInterceptor` sends a single URL digest request

use log::{debug, warn};

use super::registry::RequestRegistry;
use crate::config::Capability;
use crate::protocol::{ChannelError, MessageChannel, RequestId, WorkerMessage};

/// Destination receiving the response bytes unmodified
pub trait PassThrough {
    fn write(&mut self, chunk: &[u8]);
}

impl PassThrough for Vec<u8> {
    fn write(&mut self, chunk: &[u8]) {
        self.extend_from_slice(chunk);
    }
}

/// Strategy deciding what to forward for an exchange
pub trait Interceptor<C: MessageChannel<WorkerMessage>> {
    fn capability(&self) -> Capability;

    /// A response begins; hashing is known to be enabled
    ///
    /// Returns a tap when the body stream must be observed.
    fn attach(
        &self,
        id: RequestId,
        url: &str,
        registry: &mut RequestRegistry,
        channel: &mut C,
    ) -> Result<Option<StreamTap>, ChannelError>;
}

/// Pick the strategy for a host capability
pub fn for_capability<C>(capability: Capability) -> Box<dyn Interceptor<C>>
where
    C: MessageChannel<WorkerMessage> + 'static,
{
    match capability {
        Capability::Streaming => Box::new(StreamingInterceptor),
        Capability::UrlOnly => Box::new(UrlOnlyInterceptor),
    }
}

/// Body access available: track the exchange and tap its stream
///
/// An id that is still in flight is not tapped a second time; the
/// second stream passes through unobserved.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamingInterceptor;

impl<C: MessageChannel<WorkerMessage>> Interceptor<C> for StreamingInterceptor {
    fn capability(&self) -> Capability {
        Capability::Streaming
    }

    fn attach(
        &self,
        id: RequestId,
        url: &str,
        registry: &mut RequestRegistry,
        _channel: &mut C,
    ) -> Result<Option<StreamTap>, ChannelError> {
        if registry.contains(&id) {
            warn!("[request_id={}] Id already in flight, not tapping {}", id, url);
            return Ok(None);
        }

        registry.get(&id, url);
        Ok(Some(StreamTap::new(id)))
    }
}

/// No body access: hash the URL alone, nothing to track
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlOnlyInterceptor;

impl<C: MessageChannel<WorkerMessage>> Interceptor<C> for UrlOnlyInterceptor {
    fn capability(&self) -> Capability {
        Capability::UrlOnly
    }

    fn attach(
        &self,
        id: RequestId,
        url: &str,
        _registry: &mut RequestRegistry,
        channel: &mut C,
    ) -> Result<Option<StreamTap>, ChannelError> {
        debug!("[request_id={}] Hashing url only", id);
        channel.post(WorkerMessage::HashSingleUrl {
            url: url.to_string(),
        })?;
        Ok(None)
    }
}

/// Handle on one tapped response stream
///
/// `on_stop` and `on_error` consume the tap, so no callback can run on
/// a stream that has terminated.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamTap {
    id: RequestId,
}

impl StreamTap {
    fn new(id: RequestId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// A chunk arrived: pass it through, then move it to the entity
    ///
    /// The pass-through write borrows the chunk and must come first; the
    /// hand-off consumes it.
    pub fn on_data<C, P>(
        &self,
        chunk: Vec<u8>,
        downstream: &mut P,
        registry: &mut RequestRegistry,
        channel: &mut C,
    ) -> Result<(), ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
        P: PassThrough + ?Sized,
    {
        downstream.write(&chunk);

        match registry.lookup(&self.id) {
            Some(entity) => entity.send_data(chunk, channel),
            None => {
                debug!("[request_id={}] Chunk for untracked exchange", self.id);
                Ok(())
            }
        }
    }

    /// Stream ended normally: clean up and detach
    pub fn on_stop<C>(self, registry: &mut RequestRegistry, channel: &mut C) -> Result<(), ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
    {
        registry.remove(&self.id, channel).map(|_| ())
    }

    /// Stream torn down abnormally: same cleanup as a normal stop
    pub fn on_error<C>(self, registry: &mut RequestRegistry, channel: &mut C) -> Result<(), ChannelError>
    where
        C: MessageChannel<WorkerMessage>,
    {
        debug!("[request_id={}] Stream error", self.id);
        registry.remove(&self.id, channel).map(|_| ())
    }
}
