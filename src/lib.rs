//! Hashwatch Wasm Filter for Envoy Proxy
//!
//! This filter fingerprints HTTP response bodies as they stream through
//! and reports bodies (or URLs) whose digest is in a known-hash set.
//!
//! Two VMs run the same binary:
//! - the network role taps response bodies without altering them and
//!   moves each chunk over a shared queue
//! - the hashing role runs one incremental SHA-256 job per exchange and
//!   replies `hash_found` on a match
//!
//! Targets: wasm32-wasi (Envoy proxy-wasm ABI)

pub mod config;
pub mod hashing;
pub mod network;
pub mod protocol;
pub mod telemetry;

#[cfg(target_arch = "wasm32")]
mod filter;
#[cfg(target_arch = "wasm32")]
mod host;

pub use config::{Capability, FilterConfig, HashingConfig, HashingMode, Role, StoredConfig};
pub use hashing::{Digest, HashEngine, KnownHashSet, Sha256Hasher};
pub use network::{ConfigState, NetworkContext, RequestRegistry, StreamTap};
pub use protocol::{MessageChannel, NetworkMessage, RequestId, WorkerMessage};

// Register the filter with proxy-wasm runtime
#[cfg(target_arch = "wasm32")]
proxy_wasm::main! {{
    proxy_wasm::set_log_level(proxy_wasm::types::LogLevel::Debug);
    proxy_wasm::set_root_context(|_| -> Box<dyn proxy_wasm::traits::RootContext> {
        Box::new(filter::HashwatchRootContext::new())
    });
}}
