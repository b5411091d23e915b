//! Configuration module for the Hashwatch Wasm filter
//!
//! Two kinds of configuration live here:
//! - `FilterConfig`: static plugin configuration handed over by Envoy
//!   (role, capability, known hashes, queue names).
//! - `StoredConfig`: the runtime record `{ config: { enabled, mode } }`
//!   persisted in shared data and changed at runtime.

use serde::{Deserialize, Serialize};

/// Which execution context this VM instance runs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// HTTP filter: intercepts exchanges and feeds the hashing context
    #[default]
    Network,
    /// Singleton service: runs the hash engine
    Hashing,
}

/// What the host lets us see of a response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Response bodies can be streamed chunk by chunk
    #[default]
    Streaming,
    /// Only the URL of the exchange is observable
    UrlOnly,
}

/// How strict digest comparisons are
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashingMode {
    /// Only confirmed hashes match
    Strict,
    /// Confirmed and likely hashes match
    #[default]
    Most,
    /// Every known hash matches
    All,
}

impl HashingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashingMode::Strict => "strict",
            HashingMode::Most => "most",
            HashingMode::All => "all",
        }
    }
}

impl std::fmt::Display for HashingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime switches: whether hashing is on and which mode it uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingConfig {
    pub enabled: bool,
    pub mode: HashingMode,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: HashingMode::default(),
        }
    }
}

/// Persisted record, as found in the configuration store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoredConfig {
    pub config: HashingConfig,
}

impl StoredConfig {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        serde_json::from_slice(bytes).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        serde_json::to_vec(self).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }
}

/// One entry of the known-hash list in plugin configuration
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct KnownHashEntry {
    /// Hex-encoded digest
    pub digest: String,
    #[serde(default)]
    pub confidence: Confidence,
}

/// How sure we are that a known hash identifies unwanted content
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    Confirmed,
    Likely,
    Suspected,
}

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Execution context of this VM
    #[serde(default)]
    pub role: Role,

    /// Interception strategy for the network role
    #[serde(default)]
    pub capability: Capability,

    /// Digests that raise a match (hashing role)
    #[serde(default)]
    pub known_hashes: Vec<KnownHashEntry>,

    /// VM id of the singleton running the hash engine
    #[serde(default = "default_hashing_vm_id")]
    pub hashing_vm_id: String,

    /// VM id of the HTTP filter plugin
    #[serde(default = "default_network_vm_id")]
    pub network_vm_id: String,

    /// Queue carrying network -> hashing messages
    #[serde(default = "default_worker_queue")]
    pub worker_queue: String,

    /// Queue carrying hashing -> network messages
    #[serde(default = "default_reply_queue")]
    pub reply_queue: String,

    /// Shared data key holding the persisted `StoredConfig`
    #[serde(default = "default_config_key")]
    pub config_key: String,

    /// How often the runtime record is checked for changes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_hashing_vm_id() -> String {
    "hashwatch_hashing".to_string()
}

fn default_network_vm_id() -> String {
    "hashwatch_network".to_string()
}

fn default_worker_queue() -> String {
    "hashwatch.worker".to_string()
}

fn default_reply_queue() -> String {
    "hashwatch.matches".to_string()
}

fn default_config_key() -> String {
    "hashwatch.config".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            capability: Capability::default(),
            known_hashes: Vec::new(),
            hashing_vm_id: default_hashing_vm_id(),
            network_vm_id: default_network_vm_id(),
            worker_queue: default_worker_queue(),
            reply_queue: default_reply_queue(),
            config_key: default_config_key(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str = std::str::from_utf8(bytes)
            .map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))
    }
}

/// Configuration parsing and storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(String),
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid digest '{digest}': {reason}")]
    InvalidDigest { digest: String, reason: String },
    #[error("Configuration store failure: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FilterConfig::default();
        assert_eq!(config.role, Role::Network);
        assert_eq!(config.capability, Capability::Streaming);
        assert!(config.known_hashes.is_empty());
        assert!(config.poll_interval_ms > 0);
    }

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "role": "hashing",
            "capability": "url_only",
            "known_hashes": [
                {"digest": "00ff", "confidence": "likely"},
                {"digest": "abcd"}
            ],
            "worker_queue": "q"
        }"#;
        let config = FilterConfig::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(config.role, Role::Hashing);
        assert_eq!(config.capability, Capability::UrlOnly);
        assert_eq!(config.known_hashes.len(), 2);
        assert_eq!(config.known_hashes[0].confidence, Confidence::Likely);
        assert_eq!(config.known_hashes[1].confidence, Confidence::Confirmed);
        assert_eq!(config.worker_queue, "q");
        assert_eq!(config.reply_queue, "hashwatch.matches");
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            FilterConfig::from_bytes(&[0xff, 0xfe]),
            Err(ConfigError::InvalidUtf8(_))
        ));
        assert!(matches!(
            FilterConfig::from_bytes(br#"{"role": "observer"}"#),
            Err(ConfigError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_stored_config_shape() {
        let stored = StoredConfig::from_bytes(br#"{"config": {"enabled": true, "mode": "strict"}}"#)
            .unwrap();
        assert!(stored.config.enabled);
        assert_eq!(stored.config.mode, HashingMode::Strict);

        let json = String::from_utf8(StoredConfig::default().to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"config":{"enabled":false,"mode":"most"}}"#);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = StoredConfig::from_bytes(br#"{"config": {"enabled": true, "mode": "paranoid"}}"#);
        assert!(matches!(result, Err(ConfigError::InvalidJson(_))));
    }
}
