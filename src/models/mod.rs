use crate::services::error::UploadResult;
use crate::utils::validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use utoipa::ToSchema;

/// Content fingerprint of a whole upload, computed client-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn parse(raw: impl Into<String>) -> UploadResult<Self> {
        let raw = raw.into();
        validation::validate_fingerprint(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Desired filename of the merged artifact inside the output root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetName(String);

impl TargetName {
    pub fn parse(raw: impl Into<String>) -> UploadResult<Self> {
        let raw = raw.into();
        validation::validate_target_name(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Zero-based position of a chunk within its upload.
///
/// Ordering is numeric, which is what the merge relies on: chunk 10 sorts
/// after chunk 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkIndex(u64);

impl ChunkIndex {
    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn parse(raw: &str) -> UploadResult<Self> {
        validation::validate_chunk_index(raw).map(Self)
    }

    /// Recognizes a staged chunk file name, ignoring everything else.
    pub fn from_file_name(name: &str) -> Option<Self> {
        validation::parse_chunk_name(name).map(Self)
    }

    /// Name of the chunk file inside a staging directory.
    pub fn file_name(&self) -> String {
        self.0.to_string()
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a presence query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// An artifact with the requested target name already exists.
    AlreadyComplete { url: String },
    /// Indices currently staged for the fingerprint, ascending.
    Pending { present_indices: BTreeSet<u64> },
}

/// Acknowledgement for a stored chunk.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReceivedChunk {
    pub fingerprint: String,
    pub index: u64,
    pub size: u64,
}

/// A finalized artifact produced by the merge engine.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MergedArtifact {
    pub url: String,
    pub size: u64,
    pub chunk_count: u64,
}

/// A staging area as seen by the cleanup pass.
#[derive(Debug, Clone)]
pub struct StagedSession {
    pub fingerprint: Fingerprint,
    /// Most recent write inside the staging directory (the directory itself
    /// when it holds no chunks yet).
    pub last_activity: DateTime<Utc>,
}

/// Outcome of a reap pass.
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct ReapReport {
    pub removed_sessions: Vec<String>,
    pub skipped_in_flight: Vec<String>,
    pub removed_temporaries: usize,
}
