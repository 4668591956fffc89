use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the chunk-assembly engine.
///
/// `Io` and `TimedOut` are transient and safe to retry. `IncompleteUpload`
/// means the client has to resume sending chunks before merging again.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Incomplete upload for {fingerprint}: missing chunks {missing:?}")]
    IncompleteUpload {
        fingerprint: String,
        missing: Vec<u64>,
    },

    #[error("Nothing staged for fingerprint {0}")]
    NotFound(String),

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Invalid target name: {0}")]
    InvalidTargetName(String),

    #[error("Invalid chunk index: {0}")]
    InvalidChunkIndex(String),

    #[error("Chunk exceeds maximum size of {limit} bytes")]
    ChunkTooLarge { limit: u64 },

    #[error("Fingerprint mismatch: expected {expected}, merged file hashes to {actual}")]
    FingerprintMismatch { expected: String, actual: String },
}

pub type UploadResult<T> = Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let io = UploadError::from(std::io::Error::other("disk gone"));
        assert_eq!(io.to_string(), "I/O failure: disk gone");
        assert_eq!(
            UploadError::TimedOut(Duration::from_secs(1)).to_string(),
            "Operation timed out after 1s"
        );

        let incomplete = UploadError::IncompleteUpload {
            fingerprint: "abc".to_string(),
            missing: vec![5],
        };
        assert_eq!(
            incomplete.to_string(),
            "Incomplete upload for abc: missing chunks [5]"
        );
    }
}
