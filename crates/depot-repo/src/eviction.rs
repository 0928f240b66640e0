//! Eviction of unused proxy cache entries

use chrono::Utc;
use depot_core::{Configuration, Repository, RepositoryPath};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::index::ArtifactIndex;
use crate::locks::PathLocks;
use crate::stream;

/// Outcome of one eviction pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvictionReport {
    /// Evicted paths as `storage:repository:path`
    pub evicted: Vec<String>,
    /// Stale paths left alone because they were in use
    pub skipped: Vec<String>,
    pub bytes_freed: u64,
}

impl EvictionReport {
    fn merge(&mut self, other: EvictionReport) {
        self.evicted.extend(other.evicted);
        self.skipped.extend(other.skipped);
        self.bytes_freed += other.bytes_freed;
    }
}

/// Removes cached artifacts nobody used for a while
pub struct CacheEvictor {
    index: Arc<ArtifactIndex>,
    locks: Arc<PathLocks>,
}

impl CacheEvictor {
    /// `locks` must be the ones the proxy provider commits under
    pub fn new(index: Arc<ArtifactIndex>, locks: Arc<PathLocks>) -> Self {
        Self { index, locks }
    }

    /// Evict from every proxy repository using the configured maximum age
    pub async fn sweep(&self, config: &Configuration) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        for repository in config.repositories().filter(|r| r.is_proxy()) {
            report.merge(self.evict(repository, config.remote.cache_max_age).await?);
        }
        Ok(report)
    }

    /// Evict cached, non-pinned entries of `repository` unused for `max_age`
    ///
    /// Paths that are locked (being fetched or served) are skipped.
    pub async fn evict(&self, repository: &Repository, max_age: Duration) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(report);
        };

        let key = repository.key();
        for entry in self.index.find_stale(&key, cutoff)? {
            let path = match RepositoryPath::new(repository.clone(), &entry.path) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Dropping unusable index entry {}:{}: {}", key, entry.path, e);
                    self.index.remove(&key, &entry.path)?;
                    continue;
                }
            };

            let Some(_guard) = self.locks.try_acquire(&path.to_string()) else {
                tracing::debug!("{} is busy, not evicting", path);
                report.skipped.push(path.to_string());
                continue;
            };

            match tokio::fs::remove_file(path.absolute()).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            stream::remove_sidecars(&path).await?;
            self.index.remove(&key, path.relative())?;

            report.bytes_freed += entry.size;
            report.evicted.push(path.to_string());
        }

        if !report.evicted.is_empty() {
            tracing::info!(
                "Evicted {} artifacts ({} bytes) from {}",
                report.evicted.len(),
                report.bytes_freed,
                key
            );
        }
        Ok(report)
    }
}
