use crate::models::{ChunkIndex, Fingerprint, StagedSession, TargetName};
use crate::services::error::UploadResult;
use crate::services::storage::{ArtifactWriter, ChunkReader, UploadStore};
use crate::utils::validation;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::io::{Cursor, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone)]
struct MemorySession {
    entries: BTreeMap<String, Bytes>,
    last_activity: DateTime<Utc>,
}

impl MemorySession {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_activity: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: DashMap<String, MemorySession>,
    artifacts: DashMap<String, Bytes>,
    fail_artifact_writes: AtomicBool,
}

/// In-memory [`UploadStore`] for tests and ephemeral deployments.
///
/// Provides the same visibility guarantees as the filesystem store: chunks
/// are inserted only once fully read, artifacts only on `finish`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places an arbitrary entry into a staging area, e.g. `.DS_Store`.
    #[cfg(test)]
    pub fn insert_raw(&self, fingerprint: &Fingerprint, name: &str, data: impl Into<Bytes>) {
        let mut session = self
            .inner
            .sessions
            .entry(fingerprint.to_string())
            .or_insert_with(MemorySession::new);
        session.entries.insert(name.to_string(), data.into());
        session.last_activity = Utc::now();
    }

    pub fn chunk(&self, fingerprint: &Fingerprint, index: u64) -> Option<Bytes> {
        self.inner
            .sessions
            .get(fingerprint.as_str())
            .and_then(|s| s.entries.get(&index.to_string()).cloned())
    }

    pub fn artifact(&self, name: &str) -> Option<Bytes> {
        self.inner.artifacts.get(name).map(|a| a.value().clone())
    }

    pub fn insert_artifact(&self, name: &str, data: impl Into<Bytes>) {
        self.inner.artifacts.insert(name.to_string(), data.into());
    }

    /// Pretends the last write to a staging area happened `age` ago.
    #[cfg(test)]
    pub fn backdate(&self, fingerprint: &Fingerprint, age: chrono::Duration) {
        if let Some(mut session) = self.inner.sessions.get_mut(fingerprint.as_str()) {
            session.last_activity = Utc::now() - age;
        }
    }

    /// Makes every artifact write fail with an I/O error.
    #[cfg(test)]
    pub fn set_fail_artifact_writes(&self, fail: bool) {
        self.inner.fail_artifact_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn ensure_staging(&self, fingerprint: &Fingerprint) -> UploadResult<()> {
        self.inner
            .sessions
            .entry(fingerprint.to_string())
            .or_insert_with(MemorySession::new);
        Ok(())
    }

    async fn staging_exists(&self, fingerprint: &Fingerprint) -> UploadResult<bool> {
        Ok(self.inner.sessions.contains_key(fingerprint.as_str()))
    }

    async fn list_staging(&self, fingerprint: &Fingerprint) -> UploadResult<Vec<String>> {
        Ok(self
            .inner
            .sessions
            .get(fingerprint.as_str())
            .map(|s| s.entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn write_chunk<'a>(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        max_size: Option<u64>,
    ) -> UploadResult<u64> {
        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
            validation::validate_chunk_size(data.len() as u64, max_size)?;
        }

        let size = data.len() as u64;
        let mut session = self
            .inner
            .sessions
            .get_mut(fingerprint.as_str())
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "staging area missing"))?;
        session.entries.insert(index.file_name(), Bytes::from(data));
        session.last_activity = Utc::now();
        Ok(size)
    }

    async fn open_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
    ) -> UploadResult<ChunkReader> {
        let data = self
            .chunk(fingerprint, index.value())
            .ok_or_else(|| std::io::Error::new(ErrorKind::NotFound, "chunk missing"))?;
        Ok(Box::new(Cursor::new(data)))
    }

    async fn remove_staging(&self, fingerprint: &Fingerprint) -> UploadResult<()> {
        self.inner.sessions.remove(fingerprint.as_str());
        Ok(())
    }

    async fn list_sessions(&self) -> UploadResult<Vec<StagedSession>> {
        Ok(self
            .inner
            .sessions
            .iter()
            .filter_map(|entry| {
                Fingerprint::parse(entry.key().clone())
                    .ok()
                    .map(|fingerprint| StagedSession {
                        fingerprint,
                        last_activity: entry.value().last_activity,
                    })
            })
            .collect())
    }

    async fn artifact_size(&self, name: &TargetName) -> UploadResult<Option<u64>> {
        Ok(self
            .inner
            .artifacts
            .get(name.as_str())
            .map(|a| a.value().len() as u64))
    }

    async fn create_artifact(&self, name: &TargetName) -> UploadResult<Box<dyn ArtifactWriter>> {
        if self.inner.fail_artifact_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("simulated artifact failure").into());
        }
        Ok(Box::new(MemoryArtifactWriter {
            inner: self.inner.clone(),
            name: name.to_string(),
            buffer: Vec::new(),
        }))
    }

    async fn reap_temporaries(&self, _cutoff: DateTime<Utc>) -> UploadResult<usize> {
        // Nothing is ever half-written here
        Ok(0)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryArtifactWriter {
    inner: Arc<Inner>,
    name: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl ArtifactWriter for MemoryArtifactWriter {
    async fn write(&mut self, data: &[u8]) -> UploadResult<()> {
        if self.inner.fail_artifact_writes.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("simulated artifact failure").into());
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> UploadResult<u64> {
        let MemoryArtifactWriter {
            inner,
            name,
            buffer,
        } = *self;
        let size = buffer.len() as u64;
        inner.artifacts.insert(name, Bytes::from(buffer));
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> UploadResult<()> {
        Ok(())
    }
}
