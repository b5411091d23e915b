//! Envoy contexts
//!
//! One binary, two roles picked from plugin configuration:
//! - network: HTTP filter VM, taps response bodies and posts to the worker queue
//! - hashing: singleton VM, drains the worker queue into the hash engine

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, UNIX_EPOCH};

use log::{debug, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType};

use crate::config::{FilterConfig, Role};
use crate::hashing::{HashEngine, KnownHashSet, Sha256Hasher};
use crate::host::{
    allocate_vm_nonce, drain_queue, register_queue, SharedDataStore, SharedQueueChannel,
};
use crate::network::{ConfigState, NetworkContext, PassThrough, StreamTap};
use crate::protocol::{NetworkMessage, RequestId, WorkerMessage};
use crate::telemetry::AuditNotifier;

type HostNetworkContext = NetworkContext<SharedQueueChannel<WorkerMessage>>;
type HostHashEngine = HashEngine<Sha256Hasher, SharedQueueChannel<NetworkMessage>>;

/// Shared-data counter handing out one nonce per network VM
const VM_SEQUENCE_KEY: &str = "hashwatch.vm_sequence";

enum RoleState {
    Network {
        network: Rc<RefCell<HostNetworkContext>>,
        store: SharedDataStore,
        reply_queue: u32,
        notifier: AuditNotifier,
        vm_nonce: u64,
    },
    Hashing {
        engine: HostHashEngine,
        worker_queue: u32,
    },
}

/// Root context for filter lifecycle management
pub struct HashwatchRootContext {
    config: FilterConfig,
    role: Option<RoleState>,
}

impl HashwatchRootContext {
    pub fn new() -> Self {
        Self {
            config: FilterConfig::default(),
            role: None,
        }
    }

    /// Per-VM prefix for exchange ids
    ///
    /// Falls back to the start time if the shared counter is unusable.
    fn vm_nonce(&self) -> u64 {
        match allocate_vm_nonce(VM_SEQUENCE_KEY) {
            Ok(nonce) => nonce,
            Err(e) => {
                warn!("Cannot allocate VM nonce, using start time: {}", e);
                self.get_current_time()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_nanos() as u64)
                    .unwrap_or_default()
            }
        }
    }

    fn start_network(&self) -> Option<RoleState> {
        let config = &self.config;
        let mut store = SharedDataStore::new(&config.config_key);
        let state = match ConfigState::load(&mut store) {
            Ok(state) => state,
            Err(e) => {
                warn!("Configuration store unavailable, hashing disabled: {}", e);
                ConfigState::new(Default::default())
            }
        };

        let reply_queue = match register_queue(&config.reply_queue) {
            Ok(queue_id) => queue_id,
            Err(e) => {
                warn!("Cannot register reply queue '{}': {}", config.reply_queue, e);
                return None;
            }
        };

        let channel = SharedQueueChannel::new(&config.hashing_vm_id, &config.worker_queue);
        let mut network = NetworkContext::new(state, config.capability, channel);
        network.start();

        let vm_nonce = self.vm_nonce();
        info!(
            "Hashwatch network role started ({:?}, hashing={}, vm={:x})",
            config.capability,
            network.config().enabled(),
            vm_nonce
        );

        Some(RoleState::Network {
            network: Rc::new(RefCell::new(network)),
            store,
            reply_queue,
            notifier: AuditNotifier::new(),
            vm_nonce,
        })
    }

    fn start_hashing(&self) -> Option<RoleState> {
        let config = &self.config;
        let known = match KnownHashSet::from_entries(&config.known_hashes) {
            Ok(known) => known,
            Err(e) => {
                warn!("Invalid known hash list: {}", e);
                return None;
            }
        };

        let worker_queue = match register_queue(&config.worker_queue) {
            Ok(queue_id) => queue_id,
            Err(e) => {
                warn!("Cannot register worker queue '{}': {}", config.worker_queue, e);
                return None;
            }
        };

        info!("Hashwatch hashing role started with {} known hashes", known.len());

        let replies = SharedQueueChannel::new(&config.network_vm_id, &config.reply_queue);
        Some(RoleState::Hashing {
            engine: HashEngine::new(known, replies),
            worker_queue,
        })
    }
}

impl Context for HashwatchRootContext {}

impl RootContext for HashwatchRootContext {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        self.config = match self.get_plugin_configuration() {
            Some(bytes) => match FilterConfig::from_bytes(&bytes) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Rejecting filter configuration: {}", e);
                    return false;
                }
            },
            None => FilterConfig::default(),
        };

        self.role = match self.config.role {
            Role::Network => self.start_network(),
            Role::Hashing => self.start_hashing(),
        };
        if self.role.is_none() {
            return false;
        }

        self.set_tick_period(Duration::from_millis(self.config.poll_interval_ms));
        true
    }

    fn on_tick(&mut self) {
        match &mut self.role {
            Some(RoleState::Network { network, store, .. }) => {
                network.borrow_mut().poll_config(&*store);
            }
            Some(RoleState::Hashing { engine, .. }) => engine.log_stats(),
            None => {}
        }
    }

    fn on_queue_ready(&mut self, queue_id: u32) {
        match &mut self.role {
            Some(RoleState::Network {
                network,
                reply_queue,
                notifier,
                ..
            }) if *reply_queue == queue_id => {
                for message in drain_queue::<NetworkMessage>(queue_id) {
                    network.borrow_mut().on_reply(message, notifier);
                }
            }
            Some(RoleState::Hashing {
                engine,
                worker_queue,
            }) if *worker_queue == queue_id => {
                for message in drain_queue::<WorkerMessage>(queue_id) {
                    engine.handle(message);
                }
            }
            _ => debug!("Ignoring unexpected queue {}", queue_id),
        }
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        match &self.role {
            Some(RoleState::Network {
                network, vm_nonce, ..
            }) => Some(Box::new(HashwatchHttpContext::new(
                RequestId::scoped(*vm_nonce, context_id),
                context_id,
                Rc::clone(network),
            ))),
            _ => None,
        }
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// The host keeps forwarding its own copy of the body; returning
/// `Action::Continue` without rewriting it leaves the bytes untouched.
#[derive(Default)]
struct UntouchedBody {
    bytes: usize,
}

impl PassThrough for UntouchedBody {
    fn write(&mut self, chunk: &[u8]) {
        self.bytes += chunk.len();
    }
}

/// HTTP context for per-exchange processing
///
/// The exchange id is fixed when the context is created. Client headers
/// such as `x-request-id` play no part in it.
struct HashwatchHttpContext {
    context_id: u32,
    network: Rc<RefCell<HostNetworkContext>>,
    request_id: Option<RequestId>,
    url: Option<String>,
    tap: Option<StreamTap>,
    downstream: UntouchedBody,
}

impl HashwatchHttpContext {
    fn new(request_id: RequestId, context_id: u32, network: Rc<RefCell<HostNetworkContext>>) -> Self {
        Self {
            context_id,
            network,
            request_id: Some(request_id),
            url: None,
            tap: None,
            downstream: UntouchedBody::default(),
        }
    }

    fn request_url(&self) -> Option<String> {
        let authority = self.get_http_request_header(":authority")?;
        let path = self.get_http_request_header(":path").unwrap_or_else(|| "/".to_string());
        let scheme = self
            .get_http_request_header(":scheme")
            .unwrap_or_else(|| "http".to_string());
        Some(format!("{}://{}{}", scheme, authority, path))
    }
}

impl Context for HashwatchHttpContext {}

impl HttpContext for HashwatchHttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        self.url = self.request_url();

        debug!(
            "[context_id={}] Request {:?} -> {:?}",
            self.context_id, self.request_id, self.url
        );
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let (Some(id), Some(url)) = (self.request_id.take(), self.url.take()) else {
            debug!("[context_id={}] No request seen, not hooking", self.context_id);
            return Action::Continue;
        };

        self.tap = self.network.borrow_mut().on_response(id, &url);
        Action::Continue
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if let Some(tap) = &self.tap {
            if body_size > 0 {
                if let Some(chunk) = self.get_http_response_body(0, body_size) {
                    self.network
                        .borrow_mut()
                        .on_data(tap, chunk, &mut self.downstream);
                }
            }
        }

        if end_of_stream {
            if let Some(tap) = self.tap.take() {
                debug!(
                    "[context_id={}] Response complete, {} bytes passed through",
                    self.context_id, self.downstream.bytes
                );
                self.network.borrow_mut().on_stop(tap);
            }
        }

        Action::Continue
    }

    fn on_log(&mut self) {
        // Still tapped here: the stream ended without end_of_stream
        if let Some(tap) = self.tap.take() {
            debug!(
                "[context_id={}] Stream torn down after {} bytes",
                self.context_id, self.downstream.bytes
            );
            self.network.borrow_mut().on_error(tap);
        }
    }
}
