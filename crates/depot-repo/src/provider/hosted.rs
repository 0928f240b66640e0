//! Hosted repositories: artifacts stored under the repository base directory

use async_trait::async_trait;
use depot_core::{Configuration, Repository, RepositoryPath, RepositoryType};
use std::sync::Arc;

use super::RepositoryProvider;
use crate::error::Result;
use crate::index::{ArtifactEntry, ArtifactIndex, ArtifactPredicate, Paginator};
use crate::stream::{self, ArtifactInputStream, ArtifactOutputStream};

pub struct HostedRepositoryProvider {
    index: Arc<ArtifactIndex>,
}

impl HostedRepositoryProvider {
    pub fn new(index: Arc<ArtifactIndex>) -> Self {
        Self { index }
    }

    /// Whether the repository policy lets `path` be written
    async fn accepts(&self, path: &RepositoryPath) -> Result<bool> {
        if path.coordinates().is_none() {
            return Ok(true);
        }

        let repository = path.repository();
        let snapshot = path.is_snapshot();
        if !repository.policy.accepts(snapshot) {
            tracing::debug!(
                "{} refused by {:?} policy of {}",
                path.relative(),
                repository.policy,
                repository.key()
            );
            return Ok(false);
        }

        if !snapshot
            && !repository.allows_redeployment
            && tokio::fs::try_exists(path.absolute()).await?
        {
            tracing::debug!("{} already deployed, redeployment is disabled", path);
            return Ok(false);
        }

        Ok(true)
    }
}

#[async_trait]
impl RepositoryProvider for HostedRepositoryProvider {
    fn alias(&self) -> RepositoryType {
        RepositoryType::Hosted
    }

    async fn resolve_path(
        &self,
        _config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<RepositoryPath>> {
        match tokio::fs::metadata(path.absolute()).await {
            Ok(meta) if meta.is_file() => Ok(Some(path.clone())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_input_stream(
        &self,
        _config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactInputStream>> {
        ArtifactInputStream::open(path.clone()).await
    }

    async fn get_output_stream(
        &self,
        _config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactOutputStream>> {
        if !self.accepts(path).await? {
            return Ok(None);
        }
        let stream = ArtifactOutputStream::create(path.clone(), self.index.clone()).await?;
        Ok(Some(stream))
    }

    async fn delete(&self, _config: &Configuration, path: &RepositoryPath) -> Result<bool> {
        if !tokio::fs::try_exists(path.absolute()).await? {
            return Ok(false);
        }

        if path.repository().trash_enabled {
            stream::move_to_trash(path).await?;
        } else {
            tokio::fs::remove_file(path.absolute()).await?;
        }
        if !path.is_checksum() {
            stream::remove_sidecars(path).await?;
        }
        self.index.remove(&path.key(), path.relative())?;

        tracing::info!("Deleted {}", path);
        Ok(true)
    }

    async fn search(
        &self,
        _config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Result<Vec<ArtifactEntry>> {
        self.index.search(&[repository.key()], predicate, paginator)
    }

    async fn count(
        &self,
        _config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
    ) -> Result<u64> {
        self.index.count(&[repository.key()], predicate)
    }
}
