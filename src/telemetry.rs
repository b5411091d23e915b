//! Telemetry Module for Hashwatch
//!
//! In Wasm, we emit structured logs that can be collected by
//! Envoy's access logging or external collectors.

use log::{info, warn};
use serde::Serialize;

use crate::config::{Confidence, HashingMode};

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A body or URL digest matched a known hash
    HashFound,
    /// Runtime configuration replaced
    ConfigChanged,
    /// Hash engine switched comparison mode
    ModeChanged,
    /// A message could not be delivered to the other context
    ChannelFailure,
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type
    pub event_type: AuditEventType,
    /// Request ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// URL of the exchange
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Hex digest that matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Comparison mode in force
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<HashingMode>,
    /// Confidence of the matched hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    /// Hashing switched on or off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Reason for the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            request_id: None,
            url: None,
            digest: None,
            mode: None,
            confidence: None,
            enabled: None,
            reason: None,
        }
    }

    pub fn with_request_id(mut self, id: &str) -> Self {
        self.request_id = Some(id.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_digest(mut self, digest: &str) -> Self {
        self.digest = Some(digest.to_string());
        self
    }

    pub fn with_mode(mut self, mode: HashingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                AuditEventType::HashFound | AuditEventType::ChannelFailure => {
                    warn!("[HASHWATCH-AUDIT] {}", json);
                }
                _ => {
                    info!("[HASHWATCH-AUDIT] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

/// Create a hash match audit event
pub fn audit_hash_found(url: &str, digest: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::HashFound)
        .with_url(url)
        .with_digest(digest)
}

/// Create a configuration change audit event
pub fn audit_config_changed(enabled: bool, mode: HashingMode) -> AuditEvent {
    AuditEvent::new(AuditEventType::ConfigChanged)
        .with_enabled(enabled)
        .with_mode(mode)
}

/// Create a mode switch audit event
pub fn audit_mode_changed(from: HashingMode, to: HashingMode) -> AuditEvent {
    AuditEvent::new(AuditEventType::ModeChanged)
        .with_mode(to)
        .with_reason(&format!("mode changed from '{}'", from))
}

/// Create a delivery failure audit event
pub fn audit_channel_failure(action: &str, error: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::ChannelFailure)
        .with_reason(&format!("{} failed: {}", action, error))
}

/// Receives matches reported back to the network context
pub trait NotificationSink {
    fn notify_hash_found(&mut self, url: &str);
}

/// Notification sink writing `hash_found` audit events
#[derive(Debug, Default)]
pub struct AuditNotifier {
    notified: u64,
}

impl AuditNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notified(&self) -> u64 {
        self.notified
    }
}

impl NotificationSink for AuditNotifier {
    fn notify_hash_found(&mut self, url: &str) {
        self.notified += 1;
        AuditEvent::new(AuditEventType::HashFound)
            .with_url(url)
            .with_reason("known hash detected")
            .emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = audit_hash_found("http://x/y", "abcd")
            .with_request_id("7")
            .with_mode(HashingMode::Most)
            .with_confidence(Confidence::Likely);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event_type":"hash_found""#));
        assert!(json.contains(r#""mode":"most""#));
        assert!(json.contains(r#""confidence":"likely""#));
        assert!(!json.contains("enabled"));
    }

    #[test]
    fn test_audit_config_changed() {
        let event = audit_config_changed(true, HashingMode::Strict);
        assert_eq!(event.enabled, Some(true));
        assert_eq!(event.mode, Some(HashingMode::Strict));
    }

    #[test]
    fn test_audit_channel_failure() {
        let event = audit_channel_failure("init_request", "queue gone");
        assert!(event.reason.as_ref().unwrap().contains("init_request"));
    }

    #[test]
    fn test_audit_notifier_counts() {
        let mut notifier = AuditNotifier::new();
        notifier.notify_hash_found("http://x");
        notifier.notify_hash_found("http://y");
        assert_eq!(notifier.notified(), 2);
    }
}
