//! Depot Core - Core types for the artifact repository manager
//!
//! This crate provides the model every resolution component reads:
//! - `Storage` / `Repository`: the storage → repository graph, including
//!   group membership and proxy remotes
//! - `RoutingRules`: per-group accept/deny rule sets plus wildcard rules
//! - `Layout` / `ArtifactCoordinates`: layout-specific artifact identity
//! - `RepositoryPath`: a validated relative path inside one repository
//! - `Configuration` / `ConfigurationManager`: immutable snapshots published
//!   by a single writer

pub mod error;
pub mod repository;
pub mod routing;
pub mod layout;
pub mod path;
pub mod config;

pub use error::{CoreError, Result};
pub use repository::{
    RemoteRepository, Repository, RepositoryKey, RepositoryPolicy, RepositoryType, Storage,
};
pub use routing::{RoutingPattern, RoutingRule, RoutingRules, RuleSet, WILDCARD};
pub use layout::{ArtifactCoordinates, ChecksumAlgorithm, Layout};
pub use path::{RepositoryPath, TRASH_DIR};
pub use config::{Configuration, ConfigurationManager, RemoteSettings};
