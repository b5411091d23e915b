//! Known-hash set
//!
//! Each known digest carries a confidence; the operating mode decides
//! which confidences count as a match.

use std::collections::HashMap;

use super::digest::Digest;
use crate::config::{ConfigError, Confidence, HashingMode, KnownHashEntry};

impl HashingMode {
    /// Whether a hash of the given confidence matches under this mode
    pub fn admits(&self, confidence: Confidence) -> bool {
        match self {
            HashingMode::Strict => confidence == Confidence::Confirmed,
            HashingMode::Most => confidence != Confidence::Suspected,
            HashingMode::All => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KnownHashSet {
    entries: HashMap<Digest, Confidence>,
}

impl KnownHashSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from plugin configuration, rejecting malformed digests
    pub fn from_entries(entries: &[KnownHashEntry]) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for entry in entries {
            let digest =
                Digest::from_hex(&entry.digest).map_err(|e| ConfigError::InvalidDigest {
                    digest: entry.digest.clone(),
                    reason: e.to_string(),
                })?;
            set.insert(digest, entry.confidence);
        }
        Ok(set)
    }

    /// Insert a digest; on duplicates the most confident level wins
    pub fn insert(&mut self, digest: Digest, confidence: Confidence) {
        self.entries
            .entry(digest)
            .and_modify(|existing| {
                if rank(confidence) < rank(*existing) {
                    *existing = confidence;
                }
            })
            .or_insert(confidence);
    }

    /// Confidence of a matching digest under `mode`, if it matches
    pub fn lookup(&self, digest: &Digest, mode: HashingMode) -> Option<Confidence> {
        self.entries
            .get(digest)
            .copied()
            .filter(|confidence| mode.admits(*confidence))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn rank(confidence: Confidence) -> u8 {
    match confidence {
        Confidence::Confirmed => 0,
        Confidence::Likely => 1,
        Confidence::Suspected => 2,
    }
}
