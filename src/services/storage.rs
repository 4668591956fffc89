use crate::models::{ChunkIndex, Fingerprint, StagedSession, TargetName};
use crate::services::error::{UploadError, UploadResult};
use crate::utils::validation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Buffer size used when streaming chunk payloads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Suffix shared by every in-progress temporary file.
pub const TEMP_SUFFIX: &str = ".part";

pub type ChunkReader = Box<dyn AsyncRead + Unpin + Send>;

/// Persistence behind the chunk-assembly engine: a staging root holding one
/// directory per fingerprint, and an output root holding finalized artifacts.
///
/// Every write becomes visible atomically. A chunk or artifact is either
/// absent or complete, never partially written.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Creates the staging area for `fingerprint` if it does not exist yet.
    /// Safe to call concurrently for the same fingerprint.
    async fn ensure_staging(&self, fingerprint: &Fingerprint) -> UploadResult<()>;

    async fn staging_exists(&self, fingerprint: &Fingerprint) -> UploadResult<bool>;

    /// Raw entry names inside the staging area. Empty when there is none.
    async fn list_staging(&self, fingerprint: &Fingerprint) -> UploadResult<Vec<String>>;

    /// Streams `reader` into the chunk slot for `index`, replacing any
    /// previous payload. Returns the number of bytes stored.
    async fn write_chunk<'a>(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        max_size: Option<u64>,
    ) -> UploadResult<u64>;

    async fn open_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
    ) -> UploadResult<ChunkReader>;

    /// Removes the whole staging area including any incidental files.
    /// Removing an absent staging area is not an error.
    async fn remove_staging(&self, fingerprint: &Fingerprint) -> UploadResult<()>;

    async fn list_sessions(&self) -> UploadResult<Vec<StagedSession>>;

    /// Size of the finalized artifact, `None` if there is none.
    async fn artifact_size(&self, name: &TargetName) -> UploadResult<Option<u64>>;

    /// Opens a hidden temporary output that becomes `name` on `finish`.
    async fn create_artifact(&self, name: &TargetName) -> UploadResult<Box<dyn ArtifactWriter>>;

    /// Deletes abandoned temporary files last modified before `cutoff`.
    async fn reap_temporaries(&self, cutoff: DateTime<Utc>) -> UploadResult<usize>;

    fn backend_name(&self) -> &'static str;
}

/// Sequential writer for a merged artifact.
#[async_trait]
pub trait ArtifactWriter: Send {
    async fn write(&mut self, data: &[u8]) -> UploadResult<()>;

    /// Flushes and publishes the artifact under its target name.
    async fn finish(self: Box<Self>) -> UploadResult<u64>;

    /// Discards everything written so far.
    async fn abort(self: Box<Self>) -> UploadResult<()>;
}

/// Removes a temporary file when dropped, unless disarmed.
///
/// Covers early returns as well as futures dropped mid-write (timeouts,
/// client disconnects).
struct TempFileGuard {
    path: Option<PathBuf>,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temporary file {:?}: {}", path, e);
                }
            }
        }
    }
}

fn temp_name(stem: &str) -> String {
    format!(".{}.{}{}", stem, Uuid::new_v4(), TEMP_SUFFIX)
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}

fn modified_at(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

/// Local filesystem implementation of [`UploadStore`].
pub struct FilesystemStore {
    staging_root: PathBuf,
    upload_root: PathBuf,
}

impl FilesystemStore {
    /// Creates both roots if needed.
    pub async fn new(
        staging_root: impl AsRef<Path>,
        upload_root: impl AsRef<Path>,
    ) -> UploadResult<Self> {
        let staging_root = staging_root.as_ref().to_path_buf();
        let upload_root = upload_root.as_ref().to_path_buf();
        fs::create_dir_all(&staging_root).await?;
        fs::create_dir_all(&upload_root).await?;
        Ok(Self {
            staging_root,
            upload_root,
        })
    }

    pub fn upload_root(&self) -> &Path {
        &self.upload_root
    }

    /// Staging directory for a fingerprint. The fingerprint alphabet is
    /// validated on construction, so the join cannot leave the root.
    pub fn staging_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.staging_root.join(fingerprint.as_str())
    }

    pub fn artifact_path(&self, name: &TargetName) -> PathBuf {
        self.upload_root.join(name.as_str())
    }

    fn chunk_path(&self, fingerprint: &Fingerprint, index: ChunkIndex) -> PathBuf {
        self.staging_path(fingerprint).join(index.file_name())
    }

    /// Latest modification time of a directory or anything directly inside it.
    async fn last_activity(dir: &Path) -> UploadResult<Option<DateTime<Utc>>> {
        let mut latest = modified_at(&fs::metadata(dir).await?);
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            // Entries may vanish while we look at them
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if let Some(ts) = modified_at(&meta) {
                latest = Some(latest.map_or(ts, |cur| cur.max(ts)));
            }
        }
        Ok(latest)
    }

    async fn remove_stale_temporaries(dir: &Path, cutoff: DateTime<Utc>) -> UploadResult<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_temp_name(name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if modified_at(&meta).is_some_and(|ts| ts < cutoff) {
                match fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl UploadStore for FilesystemStore {
    async fn ensure_staging(&self, fingerprint: &Fingerprint) -> UploadResult<()> {
        let dir = self.staging_path(fingerprint);
        // create_dir is atomic: exactly one concurrent caller creates it,
        // everyone else sees AlreadyExists.
        match fs::create_dir(&dir).await {
            Ok(()) => {
                tracing::debug!("Created staging directory {:?}", dir);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if fs::metadata(&dir).await?.is_dir() {
                    Ok(())
                } else {
                    Err(std::io::Error::other(format!(
                        "staging path {:?} exists but is not a directory",
                        dir
                    ))
                    .into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn staging_exists(&self, fingerprint: &Fingerprint) -> UploadResult<bool> {
        match fs::metadata(self.staging_path(fingerprint)).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_staging(&self, fingerprint: &Fingerprint) -> UploadResult<Vec<String>> {
        let mut entries = match fs::read_dir(self.staging_path(fingerprint)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn write_chunk<'a>(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
        max_size: Option<u64>,
    ) -> UploadResult<u64> {
        let dir = self.staging_path(fingerprint);
        let final_path = dir.join(index.file_name());
        let temp_path = dir.join(temp_name(&index.file_name()));

        let mut guard = TempFileGuard::new(temp_path.clone());
        let mut file = fs::File::create(&temp_path).await?;

        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            validation::validate_chunk_size(written, max_size)?;
            file.write_all(&buf[..n]).await?;
        }

        // Durable before visible
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &final_path).await?;
        guard.disarm();

        Ok(written)
    }

    async fn open_chunk(
        &self,
        fingerprint: &Fingerprint,
        index: ChunkIndex,
    ) -> UploadResult<ChunkReader> {
        let file = fs::File::open(self.chunk_path(fingerprint, index)).await?;
        Ok(Box::new(file))
    }

    async fn remove_staging(&self, fingerprint: &Fingerprint) -> UploadResult<()> {
        match fs::remove_dir_all(self.staging_path(fingerprint)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_sessions(&self) -> UploadResult<Vec<StagedSession>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.staging_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Ok(fingerprint) = Fingerprint::parse(name) else {
                continue;
            };
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            match Self::last_activity(&entry.path()).await {
                Ok(Some(last_activity)) => sessions.push(StagedSession {
                    fingerprint,
                    last_activity,
                }),
                Ok(None) => {}
                // Removed by a concurrent merge
                Err(UploadError::Io(e)) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(sessions)
    }

    async fn artifact_size(&self, name: &TargetName) -> UploadResult<Option<u64>> {
        match fs::metadata(self.artifact_path(name)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_artifact(&self, name: &TargetName) -> UploadResult<Box<dyn ArtifactWriter>> {
        let final_path = self.artifact_path(name);
        let temp_path = self.upload_root.join(temp_name(name.as_str()));
        let guard = TempFileGuard::new(temp_path.clone());
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemArtifactWriter {
            file: Some(file),
            temp_path,
            final_path,
            written: 0,
            guard,
        }))
    }

    async fn reap_temporaries(&self, cutoff: DateTime<Utc>) -> UploadResult<usize> {
        let mut removed = Self::remove_stale_temporaries(&self.upload_root, cutoff).await?;
        for session in self.list_sessions().await? {
            removed +=
                Self::remove_stale_temporaries(&self.staging_path(&session.fingerprint), cutoff)
                    .await?;
        }
        Ok(removed)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

struct FilesystemArtifactWriter {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    guard: TempFileGuard,
}

#[async_trait]
impl ArtifactWriter for FilesystemArtifactWriter {
    async fn write(&mut self, data: &[u8]) -> UploadResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("artifact writer already closed"))?;
        file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> UploadResult<u64> {
        let file = self
            .file
            .take()
            .ok_or_else(|| std::io::Error::other("artifact writer already closed"))?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.guard.disarm();
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> UploadResult<()> {
        drop(self.file.take());
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.guard.disarm();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, FilesystemStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().join("tmp"), dir.path().join("upload"))
            .await
            .unwrap();
        (dir, store)
    }

    fn fp(raw: &str) -> Fingerprint {
        Fingerprint::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_staging_is_idempotent() {
        let (_dir, store) = store().await;
        let fingerprint = fp("abc123");

        assert!(!store.staging_exists(&fingerprint).await.unwrap());
        store.ensure_staging(&fingerprint).await.unwrap();
        store.ensure_staging(&fingerprint).await.unwrap();
        assert!(store.staging_exists(&fingerprint).await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_staging_rejects_file_in_the_way() {
        let (_dir, store) = store().await;
        let fingerprint = fp("abc123");
        std::fs::write(store.staging_path(&fingerprint), b"not a dir").unwrap();

        assert!(store.ensure_staging(&fingerprint).await.is_err());
    }

    #[tokio::test]
    async fn test_write_chunk_leaves_no_temporary() {
        let (_dir, store) = store().await;
        let fingerprint = fp("abc123");
        store.ensure_staging(&fingerprint).await.unwrap();

        let size = store
            .write_chunk(&fingerprint, ChunkIndex::new(3), Box::new(&b"hello"[..]), None)
            .await
            .unwrap();
        assert_eq!(size, 5);

        let names = store.list_staging(&fingerprint).await.unwrap();
        assert_eq!(names, vec!["3".to_string()]);
        let on_disk = std::fs::read(store.staging_path(&fingerprint).join("3")).unwrap();
        assert_eq!(on_disk, b"hello");
    }

    #[tokio::test]
    async fn test_rewriting_chunk_replaces_previous_payload() {
        let (_dir, store) = store().await;
        let fingerprint = fp("abc");
        store.ensure_staging(&fingerprint).await.unwrap();

        for payload in [&b"first"[..], &b"second"[..], &b"third!"[..]] {
            store
                .write_chunk(&fingerprint, ChunkIndex::new(0), Box::new(payload), None)
                .await
                .unwrap();
        }

        let names = store.list_staging(&fingerprint).await.unwrap();
        assert_eq!(names, vec!["0".to_string()]);
        let on_disk = std::fs::read(store.staging_path(&fingerprint).join("0")).unwrap();
        assert_eq!(on_disk, b"third!");
    }

    #[tokio::test]
    async fn test_write_chunk_over_limit_is_discarded() {
        let (_dir, store) = store().await;
        let fingerprint = fp("abc123");
        store.ensure_staging(&fingerprint).await.unwrap();

        let result = store
            .write_chunk(&fingerprint, ChunkIndex::new(0), Box::new(&[7u8; 32][..]), Some(16))
            .await;
        assert!(matches!(
            result,
            Err(UploadError::ChunkTooLarge { limit: 16 })
        ));
        assert!(store.list_staging(&fingerprint).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_artifact_abort_discards_output() {
        let (_dir, store) = store().await;
        let name = TargetName::parse("movie.mp4").unwrap();

        let mut writer = store.create_artifact(&name).await.unwrap();
        writer.write(b"partial").await.unwrap();
        writer.abort().await.unwrap();

        assert!(store.artifact_size(&name).await.unwrap().is_none());
        let leftovers = std::fs::read_dir(store.upload_root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_dropped_artifact_writer_cleans_up() {
        let (_dir, store) = store().await;
        let name = TargetName::parse("movie.mp4").unwrap();

        let mut writer = store.create_artifact(&name).await.unwrap();
        writer.write(b"partial").await.unwrap();
        drop(writer);

        let leftovers = std::fs::read_dir(store.upload_root()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_reap_temporaries_only_touches_old_temp_files() {
        let (_dir, store) = store().await;
        std::fs::write(store.upload_root().join(".movie.mp4.dead.part"), b"x").unwrap();
        std::fs::write(store.upload_root().join("kept.bin"), b"x").unwrap();

        // Nothing is older than a cutoff in the past
        let removed = store
            .reap_temporaries(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .reap_temporaries(Utc::now() + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.upload_root().join("kept.bin").exists());
    }
}
