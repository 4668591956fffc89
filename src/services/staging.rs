use crate::models::{ChunkIndex, Fingerprint};
use crate::services::error::UploadResult;
use crate::services::storage::UploadStore;
use std::sync::Arc;

/// Maps upload fingerprints to their staging areas.
#[derive(Clone)]
pub struct FingerprintStore {
    store: Arc<dyn UploadStore>,
}

/// Handle on the staging area of a single fingerprint.
pub struct StagingArea {
    store: Arc<dyn UploadStore>,
    fingerprint: Fingerprint,
}

impl FingerprintStore {
    pub fn new(store: Arc<dyn UploadStore>) -> Self {
        Self { store }
    }

    /// Resolves the staging area for `fingerprint`, creating it on first use.
    ///
    /// Creation is a single create-if-absent step in the store, so two first
    /// chunks racing for a new fingerprint both end up in the same directory.
    pub async fn staging_dir_for(&self, fingerprint: &Fingerprint) -> UploadResult<StagingArea> {
        self.store.ensure_staging(fingerprint).await?;
        Ok(self.staging_area(fingerprint))
    }

    /// Handle without creating anything; the area may not exist.
    pub fn staging_area(&self, fingerprint: &Fingerprint) -> StagingArea {
        StagingArea {
            store: self.store.clone(),
            fingerprint: fingerprint.clone(),
        }
    }
}

impl StagingArea {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn store(&self) -> &dyn UploadStore {
        self.store.as_ref()
    }

    pub async fn exists(&self) -> UploadResult<bool> {
        self.store.staging_exists(&self.fingerprint).await
    }

    /// Staged chunk indices in ascending numeric order.
    ///
    /// Entries that are not canonical chunk names (`.DS_Store`, in-progress
    /// temporaries, stray files) are skipped.
    pub async fn chunk_indices(&self) -> UploadResult<Vec<ChunkIndex>> {
        let names = self.store.list_staging(&self.fingerprint).await?;
        let mut indices: Vec<ChunkIndex> = names
            .iter()
            .filter_map(|name| {
                let index = ChunkIndex::from_file_name(name);
                if index.is_none() {
                    tracing::debug!(
                        "Ignoring non-chunk entry {:?} in staging area {}",
                        name,
                        self.fingerprint
                    );
                }
                index
            })
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_storage::MemoryStore;

    #[tokio::test]
    async fn test_chunk_indices_are_numeric_and_filtered() {
        let memory = MemoryStore::new();
        let fingerprint = Fingerprint::parse("abc123").unwrap();
        for i in 0..12u64 {
            memory.insert_raw(&fingerprint, &i.to_string(), vec![i as u8]);
        }
        memory.insert_raw(&fingerprint, ".DS_Store", vec![0]);
        memory.insert_raw(&fingerprint, ".4.0000.part", vec![0]);
        memory.insert_raw(&fingerprint, "notes.txt", vec![0]);

        let store = FingerprintStore::new(Arc::new(memory));
        let indices: Vec<u64> = store
            .staging_area(&fingerprint)
            .chunk_indices()
            .await
            .unwrap()
            .iter()
            .map(|i| i.value())
            .collect();
        assert_eq!(indices, (0..12).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_concurrent_first_use_creates_one_area() {
        let dir = tempfile::tempdir().unwrap();
        let fs_store = crate::services::storage::FilesystemStore::new(
            dir.path().join("tmp"),
            dir.path().join("upload"),
        )
        .await
        .unwrap();
        let store = FingerprintStore::new(Arc::new(fs_store));
        let fingerprint = Fingerprint::parse("abc123").unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let fingerprint = fingerprint.clone();
            handles.push(tokio::spawn(async move {
                store.staging_dir_for(&fingerprint).await.map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let area = store.staging_area(&fingerprint);
        assert!(area.exists().await.unwrap());
        assert!(area.chunk_indices().await.unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 1);
    }
}
