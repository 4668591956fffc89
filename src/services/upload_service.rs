use crate::config::UploadConfig;
use crate::models::{
    ChunkIndex, Fingerprint, MergedArtifact, ReapReport, ReceivedChunk, TargetName, UploadStatus,
};
use crate::services::chunk_receiver::ChunkReceiver;
use crate::services::cleanup::Cleanup;
use crate::services::error::{UploadError, UploadResult};
use crate::services::merge::MergeEngine;
use crate::services::presence::PresenceQuery;
use crate::services::staging::FingerprintStore;
use crate::services::storage::UploadStore;
use crate::utils::keyed_mutex::KeyedMutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Entry point of the chunk-assembly engine.
///
/// Wires the components to one store and one set of per-fingerprint merge
/// locks, and bounds chunk and merge I/O with timeouts. When a timeout fires
/// the in-flight operation is dropped, which removes its temporary files.
pub struct UploadService {
    store: Arc<dyn UploadStore>,
    receiver: ChunkReceiver,
    presence: PresenceQuery,
    merger: MergeEngine,
    cleanup: Cleanup,
    chunk_timeout: Duration,
    merge_timeout: Duration,
}

async fn with_timeout<T>(
    limit: Duration,
    operation: impl Future<Output = UploadResult<T>>,
) -> UploadResult<T> {
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| UploadError::TimedOut(limit))?
}

impl UploadService {
    pub fn new(store: Arc<dyn UploadStore>, config: &UploadConfig) -> Self {
        let staging = FingerprintStore::new(store.clone());
        let locks = KeyedMutex::new();

        Self {
            receiver: ChunkReceiver::new(staging.clone(), config.max_chunk_size),
            presence: PresenceQuery::new(
                store.clone(),
                staging.clone(),
                config.public_base_url.clone(),
            ),
            merger: MergeEngine::new(
                store.clone(),
                staging,
                locks.clone(),
                config.public_base_url.clone(),
                config.verify_fingerprint,
            ),
            cleanup: Cleanup::new(store.clone(), locks),
            store,
            chunk_timeout: config.chunk_timeout,
            merge_timeout: config.merge_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn UploadStore> {
        &self.store
    }

    /// Stores one chunk. `timeout` overrides the configured chunk timeout.
    pub async fn receive_chunk<'a>(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
        payload: Box<dyn AsyncRead + Unpin + Send + 'a>,
        timeout: Option<Duration>,
    ) -> UploadResult<ReceivedChunk> {
        let limit = timeout.unwrap_or(self.chunk_timeout);
        with_timeout(
            limit,
            self.receiver.receive_chunk(fingerprint, index, payload),
        )
        .await
    }

    pub async fn query_status(
        &self,
        fingerprint: &Fingerprint,
        target_name: &TargetName,
    ) -> UploadResult<UploadStatus> {
        self.presence.query_status(fingerprint, target_name).await
    }

    /// Merges all chunks. `timeout` overrides the configured merge timeout
    /// and includes time spent queued behind another merge of the same
    /// fingerprint.
    pub async fn merge(
        &self,
        fingerprint: &Fingerprint,
        target_name: &TargetName,
        timeout: Option<Duration>,
    ) -> UploadResult<MergedArtifact> {
        let limit = timeout.unwrap_or(self.merge_timeout);
        with_timeout(limit, self.merger.merge(fingerprint, target_name)).await
    }

    pub async fn remove_session(&self, fingerprint: &Fingerprint) -> UploadResult<()> {
        self.cleanup.remove_session(fingerprint).await
    }

    pub async fn reap(&self, max_age: Duration) -> UploadResult<ReapReport> {
        self.cleanup.reap(max_age).await
    }
}
