use crate::models::{ChunkIndex, Fingerprint, MergedArtifact, TargetName};
use crate::services::error::{UploadError, UploadResult};
use crate::services::staging::FingerprintStore;
use crate::services::storage::{ArtifactWriter, UploadStore};
use crate::utils::hash::{self, FingerprintAlgorithm, FingerprintHasher};
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::urls;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Buffer used when copying chunks into the artifact (64 KiB).
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Upper bound on missing indices listed in an `IncompleteUpload` error.
const MAX_REPORTED_MISSING: usize = 1024;

/// Concatenates staged chunks into the final artifact.
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn UploadStore>,
    staging: FingerprintStore,
    locks: KeyedMutex,
    public_base_url: String,
    verify: Option<FingerprintAlgorithm>,
}

/// Indices absent from `0..=max(indices)`. `indices` must be sorted and
/// deduplicated.
pub fn missing_indices(indices: &[ChunkIndex]) -> Vec<u64> {
    let mut missing = Vec::new();
    let mut expected = 0u64;
    for index in indices {
        while expected < index.value() && missing.len() < MAX_REPORTED_MISSING {
            missing.push(expected);
            expected += 1;
        }
        if missing.len() >= MAX_REPORTED_MISSING {
            break;
        }
        expected = index.value() + 1;
    }
    missing
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn UploadStore>,
        staging: FingerprintStore,
        locks: KeyedMutex,
        public_base_url: impl Into<String>,
        verify: Option<FingerprintAlgorithm>,
    ) -> Self {
        Self {
            store,
            staging,
            locks,
            public_base_url: public_base_url.into(),
            verify,
        }
    }

    /// Merges every staged chunk of `fingerprint` into `target_name`.
    ///
    /// Merges of one fingerprint run one at a time; a second request waits
    /// for the first and then finds the finished artifact. Chunks are deleted
    /// only once the artifact has been published, so any failure leaves the
    /// upload resumable and no partial artifact visible.
    ///
    /// After publishing, the whole staging area is removed, not only the
    /// merged chunks. A chunk that lands while the merge is running is
    /// acknowledged but not part of the artifact, and is deleted with the
    /// rest. Clients must finish uploading before they request the merge.
    pub async fn merge(
        &self,
        fingerprint: &Fingerprint,
        target_name: &TargetName,
    ) -> UploadResult<MergedArtifact> {
        let _guard = self.locks.lock(fingerprint.as_str()).await;
        let url = urls::artifact_url(&self.public_base_url, target_name);

        let area = self.staging.staging_area(fingerprint);
        let indices = area.chunk_indices().await?;

        if indices.is_empty() {
            if !area.exists().await? {
                // A merge that completed while we were queued
                if let Some(size) = self.store.artifact_size(target_name).await? {
                    tracing::info!(
                        "Merge for {} already completed, returning existing artifact {}",
                        fingerprint,
                        target_name
                    );
                    return Ok(MergedArtifact {
                        url,
                        size,
                        chunk_count: 0,
                    });
                }
                return Err(UploadError::NotFound(fingerprint.to_string()));
            }
            return Err(UploadError::IncompleteUpload {
                fingerprint: fingerprint.to_string(),
                missing: vec![0],
            });
        }

        let missing = missing_indices(&indices);
        if !missing.is_empty() {
            tracing::warn!(
                "Refusing to merge {}: {} chunks staged, missing {:?}",
                fingerprint,
                indices.len(),
                missing
            );
            return Err(UploadError::IncompleteUpload {
                fingerprint: fingerprint.to_string(),
                missing,
            });
        }

        tracing::info!(
            "Merging {} chunks of {} into {}",
            indices.len(),
            fingerprint,
            target_name
        );

        let mut writer = self.store.create_artifact(target_name).await?;
        let mut hasher = self.verify.map(FingerprintHasher::new);

        if let Err(e) = self
            .concatenate(fingerprint, &indices, writer.as_mut(), hasher.as_mut())
            .await
        {
            tracing::error!("Merge of {} into {} failed: {}", fingerprint, target_name, e);
            Self::discard(writer).await;
            return Err(e);
        }

        if let Some(hasher) = hasher {
            let actual = hasher.finalize_hex();
            if !hash::fingerprint_matches(fingerprint.as_str(), &actual) {
                tracing::warn!(
                    "Merged content of {} does not match its fingerprint (got {})",
                    fingerprint,
                    actual
                );
                Self::discard(writer).await;
                return Err(UploadError::FingerprintMismatch {
                    expected: fingerprint.to_string(),
                    actual,
                });
            }
        }

        let size = writer.finish().await?;

        // The artifact is published; failing here would only hide that.
        if let Err(e) = self.store.remove_staging(fingerprint).await {
            tracing::warn!(
                "Merged {} but could not remove its staging area, leaving it to the reaper: {}",
                fingerprint,
                e
            );
        }

        tracing::info!(
            "Merged {} into {} ({} bytes, {} chunks)",
            fingerprint,
            target_name,
            size,
            indices.len()
        );

        Ok(MergedArtifact {
            url,
            size,
            chunk_count: indices.len() as u64,
        })
    }

    async fn concatenate(
        &self,
        fingerprint: &Fingerprint,
        indices: &[ChunkIndex],
        writer: &mut dyn ArtifactWriter,
        mut hasher: Option<&mut FingerprintHasher>,
    ) -> UploadResult<()> {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        for index in indices {
            let mut reader = self.store.open_chunk(fingerprint, *index).await?;
            loop {
                let n = reader.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                writer.write(&buffer[..n]).await?;
                if let Some(hasher) = hasher.as_deref_mut() {
                    hasher.update(&buffer[..n]);
                }
            }
        }
        Ok(())
    }

    async fn discard(writer: Box<dyn ArtifactWriter>) {
        if let Err(e) = writer.abort().await {
            tracing::error!("Failed to discard temporary artifact output: {}", e);
        }
    }
}
