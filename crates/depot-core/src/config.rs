//! Configuration snapshots and the single-writer configuration manager
//!
//! Stores configuration in `~/.config/depot/depot.yaml` by default. Readers
//! take an `Arc<Configuration>` snapshot; writers clone the current snapshot,
//! mutate and validate the clone, then publish it with a pointer swap.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{CoreError, Result};
use crate::repository::{Repository, RepositoryKey, RepositoryType, Storage};
use crate::routing::RoutingRules;

/// Depot configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    /// API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Root directory for storages without an explicit base directory
    #[serde(default = "default_basedir")]
    pub basedir: PathBuf,

    /// Storages by id
    #[serde(default)]
    pub storages: IndexMap<String, Storage>,

    /// Group routing rules
    #[serde(default)]
    pub routing_rules: RoutingRules,

    /// Proxy fetch settings
    #[serde(default)]
    pub remote: RemoteSettings,
}

fn default_api_version() -> String {
    "depot.io/v1".to_string()
}

fn default_basedir() -> PathBuf {
    PathBuf::from("storages")
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            basedir: default_basedir(),
            storages: IndexMap::new(),
            routing_rules: RoutingRules::default(),
            remote: RemoteSettings::default(),
        }
    }
}

/// Settings for proxy repositories talking to remote origins
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSettings {
    /// Connect timeout (default: 10s)
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Whole-request read timeout (default: 60s)
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Resume attempts after transient failures (default: 3)
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Cached metadata files older than this are fetched again (default: 1h)
    #[serde(default = "default_metadata_max_age", with = "humantime_serde")]
    pub metadata_max_age: Duration,

    /// Lifetime of computed checksums awaiting validation (default: 5m)
    #[serde(default = "default_checksum_ttl", with = "humantime_serde")]
    pub checksum_cache_ttl: Duration,

    /// Unused cached artifacts older than this are evicted (default: 30d)
    #[serde(default = "default_cache_max_age", with = "humantime_serde")]
    pub cache_max_age: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_budget() -> u32 {
    3
}

fn default_metadata_max_age() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_checksum_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cache_max_age() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            retry_budget: default_retry_budget(),
            metadata_max_age: default_metadata_max_age(),
            checksum_cache_ttl: default_checksum_ttl(),
            cache_max_age: default_cache_max_age(),
        }
    }
}

impl Configuration {
    /// Create an empty configuration rooted at `basedir`
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from default location
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse, link and validate a YAML configuration
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        config.link();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default configuration path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| CoreError::InvalidConfig {
            message: "Could not determine config directory".to_string(),
        })?;
        Ok(config_dir.join("depot").join("depot.yaml"))
    }

    /// Fill ids, storage back-references and resolved base directories
    pub fn link(&mut self) {
        for (storage_id, storage) in self.storages.iter_mut() {
            storage.id = storage_id.clone();
            let storage_dir = storage
                .basedir
                .clone()
                .unwrap_or_else(|| self.basedir.join(storage_id));

            for (repo_id, repo) in storage.repositories.iter_mut() {
                repo.id = repo_id.clone();
                repo.storage_id = storage_id.clone();
                repo.location = repo
                    .basedir
                    .clone()
                    .unwrap_or_else(|| storage_dir.join(repo_id));
            }
        }
    }

    /// Check per-repository invariants and reject group cycles
    ///
    /// Dangling member references are tolerated here; the group collector
    /// skips them at resolution time.
    pub fn validate(&self) -> Result<()> {
        for repo in self.repositories() {
            let invalid = |message: &str| CoreError::InvalidRepository {
                repository: repo.key().to_string(),
                message: message.to_string(),
            };

            match repo.repo_type {
                RepositoryType::Proxy => {
                    repo.remote
                        .as_ref()
                        .ok_or_else(|| invalid("proxy repository requires a remote"))?
                        .validate()?;
                }
                RepositoryType::Group => {
                    let members = repo.members()?;
                    if members.contains(&repo.key()) {
                        return Err(CoreError::GroupCycle {
                            cycle: format!("{} -> {}", repo.key(), repo.key()),
                        });
                    }
                }
                _ => {
                    if !repo.group_repositories.is_empty() {
                        return Err(invalid("only group repositories can have members"));
                    }
                }
            }
        }

        self.check_group_cycles()
    }

    fn check_group_cycles(&self) -> Result<()> {
        let mut edges: HashMap<RepositoryKey, Vec<RepositoryKey>> = HashMap::new();
        for repo in self.repositories().filter(|r| r.is_group()) {
            let members = repo
                .members()?
                .into_iter()
                .filter(|m| self.repository_by_key(m).is_some_and(Repository::is_group))
                .collect();
            edges.insert(repo.key(), members);
        }

        let mut done: HashSet<RepositoryKey> = HashSet::new();
        for start in edges.keys() {
            if done.contains(start) {
                continue;
            }

            // (node, index of next edge to follow)
            let mut stack: Vec<(&RepositoryKey, usize)> = vec![(start, 0)];
            let mut on_path: HashSet<&RepositoryKey> = HashSet::from([start]);

            while let Some((node, next)) = stack.last_mut() {
                let targets = edges.get(*node).map(Vec::as_slice).unwrap_or_default();
                match targets.get(*next) {
                    Some(target) => {
                        *next += 1;
                        if on_path.contains(target) {
                            let mut cycle: Vec<String> = stack
                                .iter()
                                .skip_while(|(n, _)| *n != target)
                                .map(|(n, _)| n.to_string())
                                .collect();
                            cycle.push(target.to_string());
                            return Err(CoreError::GroupCycle {
                                cycle: cycle.join(" -> "),
                            });
                        }
                        if !done.contains(target) {
                            on_path.insert(target);
                            stack.push((target, 0));
                        }
                    }
                    None => {
                        let node = *node;
                        on_path.remove(node);
                        done.insert(node.clone());
                        stack.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Iterate every repository of every storage
    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.storages.values().flat_map(|s| s.repositories.values())
    }

    pub fn storage(&self, id: &str) -> Option<&Storage> {
        self.storages.get(id)
    }

    pub fn repository(&self, storage_id: &str, repository_id: &str) -> Option<&Repository> {
        self.storages.get(storage_id)?.repository(repository_id)
    }

    pub fn repository_by_key(&self, key: &RepositoryKey) -> Option<&Repository> {
        self.repository(&key.storage_id, &key.repository_id)
    }

    pub fn repository_mut(
        &mut self,
        storage_id: &str,
        repository_id: &str,
    ) -> Result<&mut Repository> {
        self.storages
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound {
                id: storage_id.to_string(),
            })?
            .repository_mut(repository_id)
            .ok_or_else(|| CoreError::RepositoryNotFound {
                storage: storage_id.to_string(),
                id: repository_id.to_string(),
            })
    }

    /// Add a storage (replacing none) and link it
    pub fn add_storage(&mut self, storage: Storage) -> Result<()> {
        if self.storages.contains_key(&storage.id) {
            return Err(CoreError::InvalidConfig {
                message: format!("Storage already exists: {}", storage.id),
            });
        }
        self.storages.insert(storage.id.clone(), storage);
        self.link();
        Ok(())
    }

    /// Add a repository to an existing storage and link it
    pub fn add_repository(&mut self, storage_id: &str, repository: Repository) -> Result<()> {
        self.storages
            .get_mut(storage_id)
            .ok_or_else(|| CoreError::StorageNotFound {
                id: storage_id.to_string(),
            })?
            .add(repository)?;
        self.link();
        Ok(())
    }
}

/// Single-writer owner of the published configuration snapshot
pub struct ConfigurationManager {
    current: RwLock<Arc<Configuration>>,
    writer: Mutex<()>,
    path: Option<PathBuf>,
}

impl ConfigurationManager {
    /// Publish an in-memory configuration
    pub fn new(mut config: Configuration) -> Result<Self> {
        config.link();
        config.validate()?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            writer: Mutex::new(()),
            path: None,
        })
    }

    /// Load from a file; every successful update is written back to it
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Configuration::load_from(path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            writer: Mutex::new(()),
            path: Some(path.to_path_buf()),
        })
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Configuration> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply a mutation to a copy of the configuration and publish it
    ///
    /// Nothing is published when the mutation or validation fails.
    pub fn update<F>(&self, mutate: F) -> Result<Arc<Configuration>>
    where
        F: FnOnce(&mut Configuration) -> Result<()>,
    {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut next = (*self.snapshot()).clone();
        mutate(&mut next)?;
        next.link();
        next.validate()?;

        if let Some(path) = &self.path {
            next.save_to(path)?;
        }

        let next = Arc::new(next);
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();
        tracing::debug!("Published configuration snapshot");
        Ok(next)
    }

    /// Put a repository in or out of service
    pub fn set_in_service(
        &self,
        storage_id: &str,
        repository_id: &str,
        in_service: bool,
    ) -> Result<()> {
        self.update(|config| {
            config.repository_mut(storage_id, repository_id)?.in_service = in_service;
            Ok(())
        })?;
        Ok(())
    }

    /// Add a repository to a storage
    pub fn add_repository(&self, storage_id: &str, repository: Repository) -> Result<()> {
        self.update(|config| config.add_repository(storage_id, repository))?;
        Ok(())
    }

    /// Replace the routing rules
    pub fn set_routing_rules(&self, rules: RoutingRules) -> Result<()> {
        self.update(|config| {
            config.routing_rules = rules;
            Ok(())
        })?;
        Ok(())
    }
}
