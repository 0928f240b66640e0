//! Storage and repository definitions
//!
//! A storage is a named container owning repositories. Repositories are one
//! of `hosted`, `proxy` or `group` (or a custom provider alias), and group
//! repositories reference their members as `storageId:repositoryId` or a bare
//! `repositoryId` meaning the group's own storage.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::layout::Layout;

/// Storage: a named top-level container of repositories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// Storage id (filled from the configuration map key)
    #[serde(skip)]
    pub id: String,

    /// Base directory (defaults to `<configuration basedir>/<id>`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basedir: Option<PathBuf>,

    /// Repositories by id
    #[serde(default)]
    pub repositories: IndexMap<String, Repository>,
}

impl Storage {
    /// Create an empty storage
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            basedir: None,
            repositories: IndexMap::new(),
        }
    }

    /// Set an explicit base directory
    pub fn with_basedir(mut self, basedir: impl Into<PathBuf>) -> Self {
        self.basedir = Some(basedir.into());
        self
    }

    /// Get a repository by id
    pub fn repository(&self, id: &str) -> Option<&Repository> {
        self.repositories.get(id)
    }

    /// Get a mutable repository by id
    pub fn repository_mut(&mut self, id: &str) -> Option<&mut Repository> {
        self.repositories.get_mut(id)
    }

    /// Add a repository, taking ownership of its storage back-reference
    pub fn add(&mut self, mut repository: Repository) -> Result<()> {
        if self.repositories.contains_key(&repository.id) {
            return Err(CoreError::RepositoryAlreadyExists {
                storage: self.id.clone(),
                id: repository.id,
            });
        }
        repository.storage_id = self.id.clone();
        self.repositories.insert(repository.id.clone(), repository);
        Ok(())
    }

    /// Remove a repository by id
    pub fn remove(&mut self, id: &str) -> Result<Repository> {
        self.repositories
            .shift_remove(id)
            .ok_or_else(|| CoreError::RepositoryNotFound {
                storage: self.id.clone(),
                id: id.to_string(),
            })
    }
}

/// Repository definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Repository id (unique within its storage, filled from the map key)
    #[serde(skip)]
    pub id: String,

    /// Owning storage id
    #[serde(skip)]
    pub storage_id: String,

    /// Repository type
    #[serde(rename = "type", default)]
    pub repo_type: RepositoryType,

    /// Artifact layout
    #[serde(default)]
    pub layout: Layout,

    /// Version policy
    #[serde(default)]
    pub policy: RepositoryPolicy,

    /// Administrative service state
    #[serde(default = "default_true")]
    pub in_service: bool,

    /// Move replaced and deleted artifacts to `.trash` instead of removing them
    #[serde(default)]
    pub trash_enabled: bool,

    /// Allow overwriting existing release artifacts
    #[serde(default)]
    pub allows_redeployment: bool,

    /// Explicit base directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basedir: Option<PathBuf>,

    /// Resolved base directory (internal)
    #[serde(skip)]
    pub location: PathBuf,

    /// Ordered member references (group repositories only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_repositories: Vec<String>,

    /// Remote origin (proxy repositories only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteRepository>,
}

fn default_true() -> bool {
    true
}

impl Repository {
    fn with_type(id: impl Into<String>, repo_type: RepositoryType) -> Self {
        Self {
            id: id.into(),
            storage_id: String::new(),
            repo_type,
            layout: Layout::default(),
            policy: RepositoryPolicy::default(),
            in_service: true,
            trash_enabled: false,
            allows_redeployment: false,
            basedir: None,
            location: PathBuf::new(),
            group_repositories: Vec::new(),
            remote: None,
        }
    }

    /// Create a hosted repository
    pub fn hosted(id: impl Into<String>) -> Self {
        Self::with_type(id, RepositoryType::Hosted)
    }

    /// Create a proxy repository for a remote URL
    pub fn proxy(id: impl Into<String>, url: impl Into<String>) -> Result<Self> {
        let mut repo = Self::with_type(id, RepositoryType::Proxy);
        repo.remote = Some(RemoteRepository::new(url)?);
        Ok(repo)
    }

    /// Create a group repository over the given member references
    pub fn group<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut repo = Self::with_type(id, RepositoryType::Group);
        repo.group_repositories = members.into_iter().map(Into::into).collect();
        repo
    }

    /// Set the layout
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Set the version policy
    pub fn with_policy(mut self, policy: RepositoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable trash
    pub fn with_trash(mut self) -> Self {
        self.trash_enabled = true;
        self
    }

    /// Identity of this repository across storages
    pub fn key(&self) -> RepositoryKey {
        RepositoryKey::new(&self.storage_id, &self.id)
    }

    /// Resolved base directory
    pub fn basedir(&self) -> &Path {
        &self.location
    }

    pub fn is_group(&self) -> bool {
        matches!(self.repo_type, RepositoryType::Group)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.repo_type, RepositoryType::Proxy)
    }

    pub fn is_hosted(&self) -> bool {
        matches!(self.repo_type, RepositoryType::Hosted)
    }

    /// Parse the member references of a group repository
    pub fn members(&self) -> Result<Vec<RepositoryKey>> {
        self.group_repositories
            .iter()
            .map(|reference| RepositoryKey::parse_member(reference, &self.storage_id))
            .collect()
    }
}

/// `(storage id, repository id)` identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryKey {
    pub storage_id: String,
    pub repository_id: String,
}

impl RepositoryKey {
    pub fn new(storage_id: impl Into<String>, repository_id: impl Into<String>) -> Self {
        Self {
            storage_id: storage_id.into(),
            repository_id: repository_id.into(),
        }
    }

    /// Parse a group member reference
    ///
    /// `storageId:repositoryId` names a repository in any storage; a bare
    /// `repositoryId` refers to `default_storage`.
    pub fn parse_member(reference: &str, default_storage: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidMemberRef {
            reference: reference.to_string(),
        };

        let reference = reference.trim();
        match reference.split_once(':') {
            Some((storage, repo)) => {
                if storage.is_empty() || repo.is_empty() || repo.contains(':') {
                    return Err(invalid());
                }
                Ok(Self::new(storage, repo))
            }
            None if !reference.is_empty() => Ok(Self::new(default_storage, reference)),
            None => Err(invalid()),
        }
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage_id, self.repository_id)
    }
}

/// Repository type, also the provider registry key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RepositoryType {
    /// Artifacts stored locally
    #[default]
    Hosted,

    /// Local cache in front of a remote origin
    Proxy,

    /// Virtual view over member repositories
    Group,

    /// Provider registered under a custom alias
    Custom(String),
}

impl RepositoryType {
    pub fn as_str(&self) -> &str {
        match self {
            RepositoryType::Hosted => "hosted",
            RepositoryType::Proxy => "proxy",
            RepositoryType::Group => "group",
            RepositoryType::Custom(alias) => alias,
        }
    }
}

impl From<String> for RepositoryType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "hosted" => RepositoryType::Hosted,
            "proxy" => RepositoryType::Proxy,
            "group" => RepositoryType::Group,
            _ => RepositoryType::Custom(value),
        }
    }
}

impl From<RepositoryType> for String {
    fn from(value: RepositoryType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version policy of a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryPolicy {
    /// Release versions only
    #[default]
    Release,

    /// Snapshot / prerelease versions only
    Snapshot,

    /// Anything
    Mixed,
}

impl RepositoryPolicy {
    /// Whether an artifact of the given kind may be stored
    pub fn accepts(&self, is_snapshot: bool) -> bool {
        match self {
            RepositoryPolicy::Release => !is_snapshot,
            RepositoryPolicy::Snapshot => is_snapshot,
            RepositoryPolicy::Mixed => true,
        }
    }
}

/// Remote origin of a proxy repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepository {
    /// Base URL of the remote repository
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl RemoteRepository {
    /// Create a remote, validating the URL
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let remote = Self {
            url: url.into(),
            username: None,
            password: None,
        };
        remote.validate()?;
        Ok(remote)
    }

    /// Check the URL is an absolute http(s) URL
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.url).map_err(|e| CoreError::InvalidRemoteUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(CoreError::InvalidRemoteUrl {
                url: self.url.clone(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }

    /// URL of a path on the remote
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
