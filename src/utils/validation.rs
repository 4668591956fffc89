use crate::services::error::{UploadError, UploadResult};

/// Maximum fingerprint length accepted as a staging directory name
pub const MAX_FINGERPRINT_LEN: usize = 128;

/// Maximum target name length in bytes (common filesystem limit)
pub const MAX_TARGET_NAME_LEN: usize = 255;

/// Validates an upload fingerprint.
///
/// The fingerprint names a directory under the staging root, so only a
/// conservative alphabet is accepted: ASCII alphanumerics, `-` and `_`.
pub fn validate_fingerprint(fingerprint: &str) -> UploadResult<()> {
    if fingerprint.is_empty() {
        return Err(UploadError::InvalidFingerprint(
            "Fingerprint cannot be empty".to_string(),
        ));
    }

    if fingerprint.len() > MAX_FINGERPRINT_LEN {
        return Err(UploadError::InvalidFingerprint(format!(
            "Fingerprint exceeds {} characters",
            MAX_FINGERPRINT_LEN
        )));
    }

    if let Some(c) = fingerprint
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(UploadError::InvalidFingerprint(format!(
            "Fingerprint contains forbidden character {:?}",
            c
        )));
    }

    Ok(())
}

/// Validates the final artifact name.
///
/// Unlike an uploaded filename, the target name is never rewritten: a name
/// that would escape the output root or hide among temporary files is
/// rejected outright.
pub fn validate_target_name(name: &str) -> UploadResult<()> {
    if name.is_empty() {
        return Err(UploadError::InvalidTargetName(
            "Target name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_TARGET_NAME_LEN {
        return Err(UploadError::InvalidTargetName(format!(
            "Target name exceeds {} bytes",
            MAX_TARGET_NAME_LEN
        )));
    }

    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        tracing::warn!("Path traversal attempt detected in target name: {:?}", name);
        return Err(UploadError::InvalidTargetName(
            "Target name must not contain path separators".to_string(),
        ));
    }

    // Covers "." and ".." as well as hidden files
    if name.starts_with('.') {
        return Err(UploadError::InvalidTargetName(
            "Hidden names (starting with '.') are not allowed".to_string(),
        ));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(UploadError::InvalidTargetName(
            "Target name must not contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Parses a chunk index from its canonical decimal encoding.
///
/// Returns `None` for anything that is not a chunk name: hidden files,
/// temporaries, zero-padded or signed numbers. The on-disk name of chunk `n`
/// is exactly `n.to_string()`, so a name is accepted only if it round-trips.
pub fn parse_chunk_name(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if name.len() > 1 && name.starts_with('0') {
        return None;
    }
    name.parse().ok()
}

/// Validates a chunk index coming from a request path or form filename.
pub fn validate_chunk_index(raw: &str) -> UploadResult<u64> {
    parse_chunk_name(raw).ok_or_else(|| {
        UploadError::InvalidChunkIndex(format!(
            "'{}' is not a non-negative integer without leading zeros",
            raw
        ))
    })
}

/// Validates a chunk size against the configured limit
pub fn validate_chunk_size(size: u64, limit: Option<u64>) -> UploadResult<()> {
    match limit {
        Some(limit) if size > limit => Err(UploadError::ChunkTooLarge { limit }),
        _ => Ok(()),
    }
}
