use crate::models::{ChunkIndex, Fingerprint, ReceivedChunk};
use crate::services::error::UploadResult;
use crate::services::staging::FingerprintStore;
use tokio::io::AsyncRead;

/// Accepts chunks one at a time into their upload's staging area.
#[derive(Clone)]
pub struct ChunkReceiver {
    staging: FingerprintStore,
    max_chunk_size: Option<u64>,
}

impl ChunkReceiver {
    pub fn new(staging: FingerprintStore, max_chunk_size: Option<u64>) -> Self {
        Self {
            staging,
            max_chunk_size,
        }
    }

    /// Stores `payload` as chunk `index` of `fingerprint`.
    ///
    /// Receiving the same index again replaces the earlier payload, so a
    /// client can blindly retry after a network failure. Never triggers a
    /// merge.
    pub async fn receive_chunk<'a>(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
        payload: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> UploadResult<ReceivedChunk> {
        let area = self.staging.staging_dir_for(fingerprint).await?;

        let size = area
            .store()
            .write_chunk(fingerprint, index, payload, self.max_chunk_size)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    "Failed to store chunk {} of {}: {}",
                    index,
                    fingerprint,
                    e
                )
            })?;

        tracing::debug!("Stored chunk {} of {} ({} bytes)", index, fingerprint, size);

        Ok(ReceivedChunk {
            fingerprint: fingerprint.to_string(),
            index: index.value(),
            size,
        })
    }
}
