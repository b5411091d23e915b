//! Hashing context
//!
//! This module provides:
//! - Digest type and incremental hasher trait (SHA-256 implementation)
//! - Known-hash set with per-mode confidence filtering
//! - Hash engine running one job per exchange

pub mod digest;
pub mod engine;
pub mod known;

pub use digest::{digest_of, Digest, IncrementalHasher, Sha256Hasher, DIGEST_LEN};
pub use engine::{EngineStats, HashEngine, HashMatch, JobError, JobStage};
pub use known::KnownHashSet;
