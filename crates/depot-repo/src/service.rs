//! Artifact resolution service
//!
//! The entry point callers use: validates the request, picks the provider for
//! the repository type and turns "nothing here" into typed errors.

use depot_core::{Configuration, ConfigurationManager, CoreError, Repository, RepositoryPath};
use std::sync::Arc;

use crate::checksum::ChecksumCache;
use crate::error::{RepoError, Result};
use crate::eviction::CacheEvictor;
use crate::index::{ArtifactEntry, ArtifactIndex, ArtifactPredicate, Paginator};
use crate::locks::PathLocks;
use crate::provider::{ProviderRegistry, RepositoryProvider};
use crate::remote::{HttpRemoteFetcher, RemoteFetcher};
use crate::stream::{ArtifactInputStream, ArtifactOutputStream};

/// Resolves, stores and searches artifacts by `(storage, repository, path)`
pub struct ArtifactResolutionService {
    config: Arc<ConfigurationManager>,
    registry: ProviderRegistry,
    index: Arc<ArtifactIndex>,
    locks: Arc<PathLocks>,
}

struct Target {
    config: Arc<Configuration>,
    repository: Repository,
    provider: Arc<dyn RepositoryProvider>,
}

impl ArtifactResolutionService {
    /// Service over a custom provider registry
    ///
    /// `locks` must be shared with any proxy provider in `registry`.
    pub fn new(
        config: Arc<ConfigurationManager>,
        registry: ProviderRegistry,
        index: Arc<ArtifactIndex>,
        locks: Arc<PathLocks>,
    ) -> Self {
        Self {
            config,
            registry,
            index,
            locks,
        }
    }

    /// Standard providers with the given remote fetcher
    pub fn with_fetcher(
        config: Arc<ConfigurationManager>,
        index: Arc<ArtifactIndex>,
        fetcher: Arc<dyn RemoteFetcher>,
    ) -> Self {
        let snapshot = config.snapshot();
        let locks = Arc::new(PathLocks::new());
        let checksums = Arc::new(ChecksumCache::new(snapshot.remote.checksum_cache_ttl));
        let registry =
            ProviderRegistry::standard(index.clone(), fetcher, locks.clone(), checksums);
        Self::new(config, registry, index, locks)
    }

    /// Standard providers fetching over HTTP
    pub fn standard(config: Arc<ConfigurationManager>, index: Arc<ArtifactIndex>) -> Result<Self> {
        let fetcher = HttpRemoteFetcher::new(&config.snapshot().remote)?;
        Ok(Self::with_fetcher(config, index, Arc::new(fetcher)))
    }

    pub fn configuration(&self) -> &Arc<ConfigurationManager> {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Evictor sharing this service's index and path locks
    pub fn evictor(&self) -> CacheEvictor {
        CacheEvictor::new(self.index.clone(), self.locks.clone())
    }

    fn target(&self, storage_id: &str, repository_id: &str) -> Result<Target> {
        if storage_id.trim().is_empty() {
            return Err(RepoError::StorageNotFound {
                id: storage_id.to_string(),
            });
        }
        if repository_id.trim().is_empty() {
            return Err(RepoError::RepositoryNotFound {
                storage: storage_id.to_string(),
                id: repository_id.to_string(),
            });
        }

        let config = self.config.snapshot();
        let storage = config
            .storage(storage_id)
            .ok_or_else(|| RepoError::StorageNotFound {
                id: storage_id.to_string(),
            })?;
        let repository = storage
            .repository(repository_id)
            .ok_or_else(|| RepoError::RepositoryNotFound {
                storage: storage_id.to_string(),
                id: repository_id.to_string(),
            })?
            .clone();

        let provider = self.registry.for_repository(&repository).ok_or_else(|| {
            RepoError::UnsupportedOperation {
                operation: format!("{} repositories", repository.repo_type),
                repository: repository.key().to_string(),
            }
        })?;

        Ok(Target {
            config,
            repository,
            provider,
        })
    }

    fn path(repository: &Repository, path: &str) -> Result<RepositoryPath> {
        let invalid = |reason: &str| RepoError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(invalid("absolute paths are not allowed"));
        }
        if path.as_bytes().get(1) == Some(&b':') {
            return Err(invalid("drive paths are not allowed"));
        }

        RepositoryPath::new(repository.clone(), path).map_err(|e| match e {
            CoreError::InvalidPath { path, reason } => RepoError::InvalidPath { path, reason },
            other => other.into(),
        })
    }

    fn not_found(target: &Target, path: &str) -> RepoError {
        RepoError::ArtifactNotFound {
            path: format!("{}:{}", target.repository.key(), path),
        }
    }

    fn out_of_service(target: &Target) -> RepoError {
        RepoError::RepositoryOutOfService {
            repository: target.repository.key().to_string(),
        }
    }

    /// Open an artifact for reading
    pub async fn get_input_stream(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> Result<ArtifactInputStream> {
        let target = self.target(storage_id, repository_id)?;
        let artifact = Self::path(&target.repository, path)?;
        if !target.repository.in_service {
            return Err(Self::not_found(&target, path));
        }

        target
            .provider
            .get_input_stream(&target.config, &artifact)
            .await?
            .ok_or_else(|| Self::not_found(&target, path))
    }

    /// Concrete location of an artifact
    pub async fn resolve_path(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> Result<RepositoryPath> {
        let target = self.target(storage_id, repository_id)?;
        let artifact = Self::path(&target.repository, path)?;
        if !target.repository.in_service {
            return Err(Self::not_found(&target, path));
        }

        target
            .provider
            .resolve_path(&target.config, &artifact)
            .await?
            .ok_or_else(|| Self::not_found(&target, path))
    }

    /// Open an artifact for writing
    pub async fn get_output_stream(
        &self,
        storage_id: &str,
        repository_id: &str,
        path: &str,
    ) -> Result<ArtifactOutputStream> {
        let target = self.target(storage_id, repository_id)?;
        let artifact = Self::path(&target.repository, path)?;
        if !target.repository.in_service {
            return Err(Self::out_of_service(&target));
        }

        target
            .provider
            .get_output_stream(&target.config, &artifact)
            .await?
            .ok_or_else(|| RepoError::ArtifactCannotBeStored {
                path: artifact.to_string(),
                reason: format!("refused by {} repository", target.repository.repo_type),
            })
    }

    /// Delete an artifact
    pub async fn delete(&self, storage_id: &str, repository_id: &str, path: &str) -> Result<()> {
        let target = self.target(storage_id, repository_id)?;
        let artifact = Self::path(&target.repository, path)?;
        if !target.repository.in_service {
            return Err(Self::out_of_service(&target));
        }

        if target.provider.delete(&target.config, &artifact).await? {
            Ok(())
        } else {
            Err(Self::not_found(&target, path))
        }
    }

    /// Search a repository; out-of-service repositories have no results
    pub async fn search(
        &self,
        storage_id: &str,
        repository_id: &str,
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Result<Vec<ArtifactEntry>> {
        let target = self.target(storage_id, repository_id)?;
        if !target.repository.in_service {
            return Ok(Vec::new());
        }
        target
            .provider
            .search(&target.config, &target.repository, predicate, paginator)
            .await
    }

    /// Count distinct artifacts in a repository
    pub async fn count(
        &self,
        storage_id: &str,
        repository_id: &str,
        predicate: &ArtifactPredicate,
    ) -> Result<u64> {
        let target = self.target(storage_id, repository_id)?;
        if !target.repository.in_service {
            return Ok(0);
        }
        target
            .provider
            .count(&target.config, &target.repository, predicate)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::ScriptedFetcher;
    use tokio::io::AsyncWriteExt;

    fn service(dir: &std::path::Path) -> ArtifactResolutionService {
        let yaml = format!(
            r#"
basedir: {}
storages:
  storage0:
    repositories:
      releases: {{}}
      group:
        type: group
        groupRepositories: [releases]
"#,
            dir.display()
        );
        let manager = ConfigurationManager::new(Configuration::from_yaml(&yaml).unwrap()).unwrap();
        ArtifactResolutionService::with_fetcher(
            Arc::new(manager),
            Arc::new(ArtifactIndex::open_memory().unwrap()),
            Arc::new(ScriptedFetcher::new()),
        )
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        assert!(matches!(
            service.get_input_stream("", "releases", "a.jar").await,
            Err(RepoError::StorageNotFound { .. })
        ));
        assert!(matches!(
            service.get_input_stream("storage0", " ", "a.jar").await,
            Err(RepoError::RepositoryNotFound { .. })
        ));
        assert!(matches!(
            service.get_input_stream("nope", "releases", "a.jar").await,
            Err(RepoError::StorageNotFound { .. })
        ));
        assert!(matches!(
            service.get_input_stream("storage0", "nope", "a.jar").await,
            Err(RepoError::RepositoryNotFound { .. })
        ));
        for bad in ["", "../etc/passwd", "/etc/passwd", "C:/windows", "org/../../x"] {
            assert!(
                matches!(
                    service.get_input_stream("storage0", "releases", bad).await,
                    Err(RepoError::InvalidPath { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_write_read_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let jar = "org/foo/bar/1.0/bar-1.0.jar";

        let mut out = service.get_output_stream("storage0", "releases", jar).await.unwrap();
        out.write_all(b"bar").await.unwrap();
        out.commit().await.unwrap();

        let resolved = service.resolve_path("storage0", "group", jar).await.unwrap();
        assert_eq!(resolved.repository_id(), "releases");
        assert_eq!(
            service
                .count("storage0", "group", &ArtifactPredicate::all())
                .await
                .unwrap(),
            1
        );

        service.delete("storage0", "releases", jar).await.unwrap();
        assert!(matches!(
            service.get_input_stream("storage0", "releases", jar).await,
            Err(RepoError::ArtifactNotFound { .. })
        ));
        assert!(matches!(
            service.delete("storage0", "releases", jar).await,
            Err(RepoError::ArtifactNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_refusals() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        assert!(matches!(
            service
                .get_output_stream("storage0", "releases", "org/foo/bar/1.0-SNAPSHOT/bar-1.0-SNAPSHOT.jar")
                .await,
            Err(RepoError::ArtifactCannotBeStored { .. })
        ));
        assert!(matches!(
            service
                .get_output_stream("storage0", "group", "org/foo/bar/1.0/bar-1.0.jar")
                .await,
            Err(RepoError::UnsupportedOperation { .. })
        ));

        service
            .configuration()
            .set_in_service("storage0", "releases", false)
            .unwrap();
        assert!(matches!(
            service
                .get_output_stream("storage0", "releases", "org/foo/bar/1.0/bar-1.0.jar")
                .await,
            Err(RepoError::RepositoryOutOfService { .. })
        ));
        assert!(service
            .search("storage0", "releases", &ArtifactPredicate::all(), &Paginator::unbounded())
            .await
            .unwrap()
            .is_empty());
    }
}
