//! Hash Engine
//!
//! Receiving side of the worker channel. One job per active request id:
//!
//! ```text
//! (no job) --init--> Initialized --update--> Accumulating --finalize--> Finalized
//!                         |                     ^     |
//!                         |                     +-----+ update
//!                         +----------------finalize------------------------^
//! ```
//!
//! `cancel_request` discards a job from any open stage without comparing.
//! Messages naming an unknown job are dropped without error: stream
//! teardown and in-flight messages may race.

use std::collections::HashMap;

use log::{debug, info, warn};

use super::digest::{digest_of, Digest, IncrementalHasher};
use super::known::KnownHashSet;
use crate::config::{Confidence, HashingMode};
use crate::protocol::{MessageChannel, NetworkMessage, RequestId, WorkerMessage};
use crate::telemetry::{audit_hash_found, audit_mode_changed};

/// Lifecycle stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Initialized,
    Accumulating,
    Finalized,
}

/// Per-exchange accumulator
pub struct HashJob<H> {
    request_id: RequestId,
    url: String,
    hasher: H,
    stage: JobStage,
    bytes_hashed: usize,
}

impl<H: IncrementalHasher> HashJob<H> {
    fn new(request_id: RequestId, url: String) -> Self {
        Self {
            request_id,
            url,
            hasher: H::default(),
            stage: JobStage::Initialized,
            bytes_hashed: 0,
        }
    }

    /// Feed one chunk
    fn update(&mut self, data: &[u8]) -> Result<(), JobError> {
        match self.stage {
            JobStage::Initialized | JobStage::Accumulating => {
                self.hasher.update(data);
                self.bytes_hashed += data.len();
                self.stage = JobStage::Accumulating;
                Ok(())
            }
            JobStage::Finalized => Err(JobError::AlreadyFinalized(self.request_id.clone())),
        }
    }

    /// Close the job and produce its digest
    fn finalize(&mut self) -> Result<Digest, JobError> {
        match self.stage {
            JobStage::Initialized | JobStage::Accumulating => {
                self.stage = JobStage::Finalized;
                Ok(std::mem::take(&mut self.hasher).finalize())
            }
            JobStage::Finalized => Err(JobError::AlreadyFinalized(self.request_id.clone())),
        }
    }

    pub fn stage(&self) -> JobStage {
        self.stage
    }

    pub fn bytes_hashed(&self) -> usize {
        self.bytes_hashed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} is already finalized")]
    AlreadyFinalized(RequestId),
}

/// A digest that matched the known-hash set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMatch {
    pub url: String,
    pub digest: Digest,
    pub confidence: Confidence,
    pub mode: HashingMode,
}

/// Running counters, logged by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub jobs_opened: u64,
    pub jobs_finalized: u64,
    pub jobs_cancelled: u64,
    pub urls_hashed: u64,
    pub matches: u64,
    pub ignored_messages: u64,
}

/// Incremental hashing engine, generic over the hasher and the reply channel
pub struct HashEngine<H, R> {
    mode: HashingMode,
    known: KnownHashSet,
    jobs: HashMap<RequestId, HashJob<H>>,
    replies: R,
    stats: EngineStats,
}

impl<H, R> HashEngine<H, R>
where
    H: IncrementalHasher,
    R: MessageChannel<NetworkMessage>,
{
    pub fn new(known: KnownHashSet, replies: R) -> Self {
        Self {
            mode: HashingMode::default(),
            known,
            jobs: HashMap::new(),
            replies,
            stats: EngineStats::default(),
        }
    }

    /// Dispatch one protocol message
    ///
    /// Returns the match raised by this message, if any.
    pub fn handle(&mut self, message: WorkerMessage) -> Option<HashMatch> {
        match message {
            WorkerMessage::HashingMode { mode } => {
                self.set_mode(mode);
                None
            }
            WorkerMessage::HashSingleUrl { url } => self.hash_single_url(url),
            WorkerMessage::InitRequest { request_id, url } => {
                self.init_request(request_id, url);
                None
            }
            WorkerMessage::UpdateRequest { request_id, data } => {
                self.update_request(&request_id, data);
                None
            }
            WorkerMessage::FinalizeRequest { request_id } => self.finalize_request(&request_id),
            WorkerMessage::CancelRequest { request_id } => {
                self.cancel_request(&request_id);
                None
            }
        }
    }

    fn set_mode(&mut self, mode: HashingMode) {
        if mode != self.mode {
            audit_mode_changed(self.mode, mode).emit();
        }
        self.mode = mode;
    }

    fn init_request(&mut self, request_id: RequestId, url: String) {
        if self.jobs.contains_key(&request_id) {
            warn!(
                "[request_id={}] init_request for an open job, ignoring",
                request_id
            );
            self.stats.ignored_messages += 1;
            return;
        }

        debug!("[request_id={}] Opening job for {}", request_id, url);
        self.jobs
            .insert(request_id.clone(), HashJob::new(request_id, url));
        self.stats.jobs_opened += 1;
    }

    fn update_request(&mut self, request_id: &RequestId, data: Vec<u8>) {
        let Some(job) = self.jobs.get_mut(request_id) else {
            debug!(
                "[request_id={}] update_request for unknown job, ignoring",
                request_id
            );
            self.stats.ignored_messages += 1;
            return;
        };

        if let Err(e) = job.update(&data) {
            warn!("[request_id={}] {}", request_id, e);
            self.stats.ignored_messages += 1;
        }
    }

    fn finalize_request(&mut self, request_id: &RequestId) -> Option<HashMatch> {
        let Some(mut job) = self.jobs.remove(request_id) else {
            debug!(
                "[request_id={}] finalize_request for unknown job, ignoring",
                request_id
            );
            self.stats.ignored_messages += 1;
            return None;
        };

        let digest = match job.finalize() {
            Ok(digest) => digest,
            Err(e) => {
                warn!("[request_id={}] {}", request_id, e);
                return None;
            }
        };
        self.stats.jobs_finalized += 1;

        debug!(
            "[request_id={}] Finalized {} bytes: {}",
            request_id,
            job.bytes_hashed(),
            digest
        );

        let HashJob { url, .. } = job;
        self.compare(Some(request_id), url, digest)
    }

    fn cancel_request(&mut self, request_id: &RequestId) {
        match self.jobs.remove(request_id) {
            Some(job) => {
                debug!(
                    "[request_id={}] Cancelled after {} bytes, not compared",
                    request_id,
                    job.bytes_hashed()
                );
                self.stats.jobs_cancelled += 1;
            }
            None => {
                debug!(
                    "[request_id={}] cancel_request for unknown job, ignoring",
                    request_id
                );
                self.stats.ignored_messages += 1;
            }
        }
    }

    fn hash_single_url(&mut self, url: String) -> Option<HashMatch> {
        let digest = digest_of::<H>(url.as_bytes());
        self.stats.urls_hashed += 1;
        self.compare(None, url, digest)
    }

    /// Compare under the mode in force right now and reply on a match
    fn compare(
        &mut self,
        request_id: Option<&RequestId>,
        url: String,
        digest: Digest,
    ) -> Option<HashMatch> {
        let confidence = self.known.lookup(&digest, self.mode)?;
        self.stats.matches += 1;

        let found = HashMatch {
            url,
            digest,
            confidence,
            mode: self.mode,
        };

        let mut event = audit_hash_found(&found.url, &found.digest.to_hex())
            .with_mode(found.mode)
            .with_confidence(found.confidence);
        if let Some(id) = request_id {
            event = event.with_request_id(id.as_str());
        }
        event.emit();

        if let Err(e) = self.replies.post(NetworkMessage::HashFound {
            url: found.url.clone(),
        }) {
            warn!("Failed to report hash match for {}: {}", found.url, e);
        }

        Some(found)
    }

    pub fn mode(&self) -> HashingMode {
        self.mode
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn job_stage(&self, request_id: &RequestId) -> Option<JobStage> {
        self.jobs.get(request_id).map(HashJob::stage)
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Log a one-line summary of the counters
    pub fn log_stats(&self) {
        let stats = self.stats;
        info!(
            "Hash engine: {} open jobs, {} opened, {} finalized, {} cancelled, {} urls, {} matches, {} ignored",
            self.jobs.len(),
            stats.jobs_opened,
            stats.jobs_finalized,
            stats.jobs_cancelled,
            stats.urls_hashed,
            stats.matches,
            stats.ignored_messages
        );
    }
}
