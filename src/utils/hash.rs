use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use xxhash_rust::xxh3::Xxh3;

/// Digest the client used to compute an upload's fingerprint, when the
/// server is asked to double-check it after merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintAlgorithm {
    Sha256,
    /// 128-bit XXH3, rendered as 32 hex digits
    Xxh3,
}

impl FromStr for FingerprintAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "xxh3" | "xxh3-128" => Ok(Self::Xxh3),
            other => Err(format!("unknown fingerprint algorithm '{}'", other)),
        }
    }
}

/// Incremental hasher fed with the merged stream.
pub enum FingerprintHasher {
    Sha256(Sha256),
    Xxh3(Box<Xxh3>),
}

impl FingerprintHasher {
    pub fn new(algorithm: FingerprintAlgorithm) -> Self {
        match algorithm {
            FingerprintAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            FingerprintAlgorithm::Xxh3 => Self::Xxh3(Box::new(Xxh3::new())),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Xxh3(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Xxh3(h) => format!("{:032x}", h.digest128()),
        }
    }
}

/// Compares a computed digest against a client fingerprint, ignoring case.
pub fn fingerprint_matches(expected: &str, actual_hex: &str) -> bool {
    expected.eq_ignore_ascii_case(actual_hex)
}
