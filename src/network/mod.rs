//! Network context
//!
//! Everything that runs next to the HTTP streams: the runtime switches,
//! the exchange registry and the interception strategy. `NetworkContext`
//! ties them together and is the only sender of job-scoped messages.

pub mod config_state;
pub mod interceptor;
pub mod registry;

pub use config_state::{ConfigState, ConfigStore, MemoryConfigStore, StoreEntry};
pub use interceptor::{
    for_capability, Interceptor, PassThrough, StreamTap, StreamingInterceptor, UrlOnlyInterceptor,
};
pub use registry::{RequestEntity, RequestRegistry};

use log::{debug, warn};

use crate::config::{Capability, HashingConfig};
use crate::protocol::{ChannelError, MessageChannel, NetworkMessage, RequestId, WorkerMessage};
use crate::telemetry::{audit_channel_failure, audit_config_changed, NotificationSink};

/// Network-side half of the filter
pub struct NetworkContext<C> {
    config: ConfigState,
    registry: RequestRegistry,
    channel: C,
    interceptor: Box<dyn Interceptor<C>>,
    /// The hashing context holds the current mode
    mode_synced: bool,
}

impl<C> NetworkContext<C>
where
    C: MessageChannel<WorkerMessage> + 'static,
{
    pub fn new(config: ConfigState, capability: Capability, channel: C) -> Self {
        Self {
            config,
            registry: RequestRegistry::new(),
            channel,
            interceptor: for_capability(capability),
            mode_synced: false,
        }
    }

    /// Tell the hashing context which mode is in force
    ///
    /// If this cannot be delivered (the hashing VM may not be up yet),
    /// the mode is sent again ahead of the next event or poll.
    pub fn start(&mut self) {
        self.sync_mode();
    }

    /// A response begins
    ///
    /// Nothing is sent when hashing is disabled. Otherwise the strategy
    /// decides; a returned tap must be driven until stop or error.
    pub fn on_response(&mut self, id: RequestId, url: &str) -> Option<StreamTap> {
        if !self.config.enabled() {
            return None;
        }

        self.sync_mode();
        match self
            .interceptor
            .attach(id, url, &mut self.registry, &mut self.channel)
        {
            Ok(tap) => tap,
            Err(e) => {
                self.channel_failed("attach", &e);
                None
            }
        }
    }

    pub fn on_data<P>(&mut self, tap: &StreamTap, chunk: Vec<u8>, downstream: &mut P)
    where
        P: PassThrough + ?Sized,
    {
        self.sync_mode();
        if let Err(e) = tap.on_data(chunk, downstream, &mut self.registry, &mut self.channel) {
            self.channel_failed("stream_data", &e);
        }
    }

    pub fn on_stop(&mut self, tap: StreamTap) {
        self.sync_mode();
        if let Err(e) = tap.on_stop(&mut self.registry, &mut self.channel) {
            self.channel_failed("stream_end", &e);
        }
    }

    pub fn on_error(&mut self, tap: StreamTap) {
        self.sync_mode();
        if let Err(e) = tap.on_error(&mut self.registry, &mut self.channel) {
            self.channel_failed("stream_end", &e);
        }
    }

    /// Replace the runtime configuration and forward the mode
    ///
    /// Exchanges already tapped keep streaming; only later responses see
    /// the new `enabled` flag.
    pub fn on_config_change(&mut self, new: HashingConfig) {
        self.config.on_change(new);
        self.propagate(new);
    }

    /// Check the store for a new record
    ///
    /// Also retries a mode that has not been delivered yet.
    pub fn poll_config<S: ConfigStore>(&mut self, store: &S) {
        match self.config.refresh(store) {
            Ok(Some(new)) => self.propagate(new),
            Ok(None) => {}
            Err(e) => warn!("Ignoring configuration update: {}", e),
        }
        self.sync_mode();
    }

    /// A reply from the hashing context
    pub fn on_reply<N: NotificationSink + ?Sized>(&mut self, message: NetworkMessage, sink: &mut N) {
        match message {
            NetworkMessage::HashFound { url } => sink.notify_hash_found(&url),
        }
    }

    pub fn config(&self) -> &ConfigState {
        &self.config
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn capability(&self) -> Capability {
        self.interceptor.capability()
    }

    /// Whether the hashing context is known to hold the current mode
    pub fn mode_synced(&self) -> bool {
        self.mode_synced
    }

    fn propagate(&mut self, new: HashingConfig) {
        audit_config_changed(new.enabled, new.mode).emit();
        self.mode_synced = false;
        self.sync_mode();
    }

    fn sync_mode(&mut self) {
        if self.mode_synced {
            return;
        }

        let mode = self.config.mode();
        match self.channel.post(WorkerMessage::HashingMode { mode }) {
            Ok(()) => {
                debug!("Sent hashing_mode {}", mode);
                self.mode_synced = true;
            }
            Err(e) => self.channel_failed("hashing_mode", &e),
        }
    }

    /// Any failed post may mean the hashing VM is gone; a restarted one
    /// starts over from the default mode
    fn channel_failed(&mut self, action: &str, error: &ChannelError) {
        self.mode_synced = false;
        audit_channel_failure(action, &error.to_string()).emit();
    }
}
