//! Repository providers
//!
//! One provider per repository type, looked up through a registry built at
//! startup. Providers answer `Ok(None)` for "nothing here"; translating that
//! into errors is left to the resolution service.

mod group;
mod hosted;
mod proxy;

pub use group::{GroupRepositoryProvider, MAX_SEARCH_ROUNDS};
pub use hosted::HostedRepositoryProvider;
pub use proxy::ProxyRepositoryProvider;

use async_trait::async_trait;
use depot_core::{Configuration, Repository, RepositoryPath, RepositoryType};
use std::collections::HashMap;
use std::sync::Arc;

use crate::checksum::ChecksumCache;
use crate::error::Result;
use crate::index::{ArtifactEntry, ArtifactIndex, ArtifactPredicate, Paginator};
use crate::locks::PathLocks;
use crate::remote::RemoteFetcher;
use crate::stream::{ArtifactInputStream, ArtifactOutputStream};

/// Storage behaviour of one repository type
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Repository type served by this provider
    fn alias(&self) -> RepositoryType;

    /// Concrete location of `path`, if the artifact exists
    async fn resolve_path(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<RepositoryPath>>;

    /// Open the artifact for reading
    async fn get_input_stream(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactInputStream>>;

    /// Open the artifact for writing; `None` when the repository refuses it
    async fn get_output_stream(
        &self,
        config: &Configuration,
        path: &RepositoryPath,
    ) -> Result<Option<ArtifactOutputStream>>;

    /// Remove the artifact; `false` when there was nothing to remove
    async fn delete(&self, config: &Configuration, path: &RepositoryPath) -> Result<bool>;

    /// Indexed artifacts matching `predicate`, windowed by `paginator`
    async fn search(
        &self,
        config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
        paginator: &Paginator,
    ) -> Result<Vec<ArtifactEntry>>;

    /// Number of distinct artifacts matching `predicate`
    async fn count(
        &self,
        config: &Configuration,
        repository: &Repository,
        predicate: &ArtifactPredicate,
    ) -> Result<u64>;
}

/// Providers by repository type
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<RepositoryType, Arc<dyn RepositoryProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosted, proxy and group providers over shared storage state
    pub fn standard(
        index: Arc<ArtifactIndex>,
        fetcher: Arc<dyn RemoteFetcher>,
        locks: Arc<PathLocks>,
        checksums: Arc<ChecksumCache>,
    ) -> Self {
        let leaves = Self::new()
            .with(HostedRepositoryProvider::new(index.clone()))
            .with(ProxyRepositoryProvider::new(index.clone(), fetcher, locks, checksums));

        let group = GroupRepositoryProvider::new(leaves.clone(), index);
        leaves.with(group)
    }

    /// Add a provider under its own alias
    pub fn with<P: RepositoryProvider + 'static>(mut self, provider: P) -> Self {
        self.register(Arc::new(provider));
        self
    }

    /// Add or replace a provider under its own alias
    pub fn register(&mut self, provider: Arc<dyn RepositoryProvider>) {
        self.providers.insert(provider.alias(), provider);
    }

    pub fn get(&self, repo_type: &RepositoryType) -> Option<Arc<dyn RepositoryProvider>> {
        self.providers.get(repo_type).cloned()
    }

    /// Provider for a repository
    pub fn for_repository(&self, repository: &Repository) -> Option<Arc<dyn RepositoryProvider>> {
        self.get(&repository.repo_type)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut aliases: Vec<&str> = self.providers.keys().map(RepositoryType::as_str).collect();
        aliases.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("providers", &aliases)
            .finish()
    }
}
