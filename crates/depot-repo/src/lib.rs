//! Depot Artifact Resolution
//!
//! This crate resolves artifacts across the repositories described by
//! `depot-core`:
//!
//! - **Hosted repositories**: local storage with version policy and redeploy checks
//! - **Proxy repositories**: on-demand caching of a remote, with checksum
//!   validation, resumable downloads and one fetch per path at a time
//! - **Group repositories**: ordered lookup over members, filtered by routing rules
//!
//! ## Key Features
//!
//! - **Atomic commits**: artifacts are staged and renamed into place
//! - **SQLite index**: search and count across groups with pagination
//! - **Eviction**: unused proxy cache entries are swept by age
//!
//! ## Example
//!
//! ```rust,no_run
//! use depot_core::ConfigurationManager;
//! use depot_repo::{ArtifactIndex, ArtifactResolutionService};
//! use std::path::Path;
//! use std::sync::Arc;
//! use tokio::io::AsyncReadExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(ConfigurationManager::load_from(Path::new("depot.yaml"))?);
//! let index = Arc::new(ArtifactIndex::open_at(&ArtifactIndex::default_path(Path::new("storages")))?);
//! let service = ArtifactResolutionService::standard(config, index)?;
//!
//! let mut input = service
//!     .get_input_stream("storage0", "public", "org/foo/bar/1.0/bar-1.0.jar")
//!     .await?;
//! let mut bytes = Vec::new();
//! input.read_to_end(&mut bytes).await?;
//! println!("resolved from {}", input.path());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod index;
pub mod checksum;
pub mod locks;
pub mod remote;
pub mod fetch;
pub mod stream;
pub mod routing;
pub mod collector;
pub mod provider;
pub mod eviction;
pub mod service;

// Re-exports for convenience
pub use error::{RepoError, Result};
pub use index::{ArtifactEntry, ArtifactIndex, ArtifactPredicate, Paginator};
pub use checksum::{ChecksumCache, DigestValues, Digests};
pub use locks::{PathGuard, PathLocks};
pub use remote::{
    ByteStream, HttpRemoteFetcher, RemoteCredentials, RemoteFetcher, RemoteRequest, RemoteResponse,
};
pub use stream::{ArtifactInputStream, ArtifactOutputStream};
pub use routing::RoutingRuleChecker;
pub use collector::{CollectedRepositories, GroupRepositorySetCollector};
pub use provider::{
    GroupRepositoryProvider, HostedRepositoryProvider, ProviderRegistry, ProxyRepositoryProvider,
    RepositoryProvider,
};
pub use eviction::{CacheEvictor, EvictionReport};
pub use service::ArtifactResolutionService;
