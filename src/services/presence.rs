use crate::models::{Fingerprint, TargetName, UploadStatus};
use crate::services::error::UploadResult;
use crate::services::staging::FingerprintStore;
use crate::services::storage::UploadStore;
use crate::utils::urls;
use std::sync::Arc;

/// Read-only view telling a client what it can skip.
#[derive(Clone)]
pub struct PresenceQuery {
    store: Arc<dyn UploadStore>,
    staging: FingerprintStore,
    public_base_url: String,
}

impl PresenceQuery {
    pub fn new(
        store: Arc<dyn UploadStore>,
        staging: FingerprintStore,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            staging,
            public_base_url: public_base_url.into(),
        }
    }

    /// Reports whether `target_name` is already finalized, and otherwise
    /// which chunk indices are staged for `fingerprint`.
    ///
    /// Completion is decided by name alone: an existing artifact called
    /// `target_name` counts as done whatever its content. A fingerprint with
    /// nothing staged yields an empty set.
    pub async fn query_status(
        &self,
        fingerprint: &Fingerprint,
        target_name: &TargetName,
    ) -> UploadResult<UploadStatus> {
        if self.store.artifact_size(target_name).await?.is_some() {
            return Ok(UploadStatus::AlreadyComplete {
                url: urls::artifact_url(&self.public_base_url, target_name),
            });
        }

        let present_indices = self
            .staging
            .staging_area(fingerprint)
            .chunk_indices()
            .await?
            .into_iter()
            .map(|i| i.value())
            .collect();

        Ok(UploadStatus::Pending { present_indices })
    }
}
