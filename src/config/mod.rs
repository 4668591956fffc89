use crate::utils::hash::FingerprintAlgorithm;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the chunk-assembly service
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Root holding one staging directory per fingerprint (default: "./tmp")
    pub staging_dir: PathBuf,

    /// Root holding finalized artifacts (default: "./public/upload")
    pub upload_dir: PathBuf,

    /// Base URL prefixed to artifact links (default: "http://localhost:3000")
    pub public_base_url: String,

    /// Maximum size of a single chunk in bytes (default: 64 MB)
    pub max_chunk_size: Option<u64>,

    /// Time allowed for storing one chunk (default: 300 s)
    pub chunk_timeout: Duration,

    /// Time allowed for one merge (default: 3600 s)
    pub merge_timeout: Duration,

    /// Staging directories idle for longer are reaped (default: 24)
    pub staging_cleanup_age_hours: u64,

    /// Interval between background reap passes (default: 3600 s)
    pub reap_interval: Duration,

    /// Re-hash merged artifacts and compare with the fingerprint (default: off)
    pub verify_fingerprint: Option<FingerprintAlgorithm>,

    /// Allowed CORS Origins (comma separated, "*" for any)
    pub allowed_origins: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./tmp"),
            upload_dir: PathBuf::from("./public/upload"),
            public_base_url: "http://localhost:3000".to_string(),
            max_chunk_size: Some(64 * 1024 * 1024), // 64 MB
            chunk_timeout: Duration::from_secs(300),
            merge_timeout: Duration::from_secs(3600),
            staging_cleanup_age_hours: 24,
            reap_interval: Duration::from_secs(3600),
            verify_fingerprint: None,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(), // Vite default
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

fn parse_secs(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.upload_dir),

            public_base_url: env::var("PUBLIC_BASE_URL").unwrap_or(default.public_base_url),

            // "0" disables the limit
            max_chunk_size: match env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
            {
                Some(0) => None,
                Some(limit) => Some(limit),
                None => default.max_chunk_size,
            },

            chunk_timeout: parse_secs("CHUNK_TIMEOUT_SECS").unwrap_or(default.chunk_timeout),

            merge_timeout: parse_secs("MERGE_TIMEOUT_SECS").unwrap_or(default.merge_timeout),

            staging_cleanup_age_hours: env::var("STAGING_CLEANUP_AGE_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.staging_cleanup_age_hours),

            reap_interval: parse_secs("REAP_INTERVAL_SECS").unwrap_or(default.reap_interval),

            verify_fingerprint: match env::var("VERIFY_FINGERPRINT") {
                Ok(v) if v.is_empty() || v.eq_ignore_ascii_case("none") => None,
                Ok(v) => match v.parse() {
                    Ok(algorithm) => Some(algorithm),
                    Err(e) => {
                        tracing::warn!("Ignoring VERIFY_FINGERPRINT: {}", e);
                        None
                    }
                },
                Err(_) => default.verify_fingerprint,
            },

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development (relaxed limits, frequent reaping)
    pub fn development() -> Self {
        Self {
            max_chunk_size: None,
            reap_interval: Duration::from_secs(300),
            allowed_origins: vec!["*".to_string()],
            ..Self::default()
        }
    }

    /// Config rooted in a scratch directory, used by tests
    pub fn with_roots(staging_dir: impl Into<PathBuf>, upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            upload_dir: upload_dir.into(),
            ..Self::development()
        }
    }

    /// Idle time after which a staging directory counts as abandoned
    pub fn staging_max_age(&self) -> Duration {
        Duration::from_secs(self.staging_cleanup_age_hours.saturating_mul(3600))
    }
}
