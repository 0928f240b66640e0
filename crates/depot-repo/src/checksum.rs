//! Checksum computation and the short-lived checksum cache
//!
//! When a proxy fetches an artifact it records the digests it computed here.
//! A later fetch of the matching `.md5` / `.sha1` sidecar is validated
//! against the cached value.

use depot_core::ChecksumAlgorithm;
use md5::Md5;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Incremental MD5 + SHA-1 over a byte stream
#[derive(Clone, Default)]
pub struct Digests {
    md5: Md5,
    sha1: Sha1,
    size: u64,
}

/// Finished hex digests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestValues {
    pub md5: String,
    pub sha1: String,
    pub size: u64,
}

impl DigestValues {
    pub fn get(&self, algorithm: ChecksumAlgorithm) -> &str {
        match algorithm {
            ChecksumAlgorithm::Md5 => &self.md5,
            ChecksumAlgorithm::Sha1 => &self.sha1,
        }
    }
}

impl Digests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha1.update(data);
        self.size += data.len() as u64;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn finish(self) -> DigestValues {
        DigestValues {
            md5: hex::encode(self.md5.finalize()),
            sha1: hex::encode(self.sha1.finalize()),
            size: self.size,
        }
    }
}

/// Extract the digest from a checksum file body
///
/// Accepts both a bare digest and the `<digest>  <file name>` form.
pub fn parse_checksum(content: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(content).ok()?;
    let digest = text.split_whitespace().next()?;
    digest
        .chars()
        .all(|c| c.is_ascii_hexdigit())
        .then(|| digest.to_ascii_lowercase())
}

/// Time-limited cache of computed checksums keyed by artifact path + algorithm
pub struct ChecksumCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, ChecksumAlgorithm), (String, Instant)>>,
}

impl ChecksumCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached checksum, if present and not expired
    pub fn get(&self, artifact_path: &str, algorithm: ChecksumAlgorithm) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (artifact_path.to_string(), algorithm);
        match entries.get(&key) {
            Some((value, stored)) if stored.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, artifact_path: &str, algorithm: ChecksumAlgorithm, checksum: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (_, stored)| stored.elapsed() < self.ttl);
        entries.insert(
            (artifact_path.to_string(), algorithm),
            (checksum.to_ascii_lowercase(), Instant::now()),
        );
    }

    /// Record every digest of a fetched artifact
    pub fn put_all(&self, artifact_path: &str, digests: &DigestValues) {
        for algorithm in ChecksumAlgorithm::ALL {
            self.put(artifact_path, algorithm, digests.get(algorithm));
        }
    }

    pub fn remove(&self, artifact_path: &str, algorithm: ChecksumAlgorithm) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(artifact_path.to_string(), algorithm))
            .map(|(value, _)| value)
    }
}
