//! Repository-relative artifact paths

use std::fmt;
use std::path::PathBuf;

use crate::error::{CoreError, Result};
use crate::layout::ArtifactCoordinates;
use crate::repository::{Repository, RepositoryKey};

/// Directory holding trashed artifacts inside a repository
pub const TRASH_DIR: &str = ".trash";

/// A validated relative path inside one repository
#[derive(Debug, Clone)]
pub struct RepositoryPath {
    repository: Repository,
    relative: String,
}

impl RepositoryPath {
    /// Create a path, normalizing separators and rejecting traversal
    pub fn new(repository: Repository, path: &str) -> Result<Self> {
        let relative = normalize(path)?;
        Ok(Self {
            repository,
            relative,
        })
    }

    /// The same relative path inside another repository
    pub fn with_repository(&self, repository: &Repository) -> Self {
        Self {
            repository: repository.clone(),
            relative: self.relative.clone(),
        }
    }

    /// A sibling path in the same repository (already normalized input)
    pub fn sibling(&self, relative: impl Into<String>) -> Self {
        Self {
            repository: self.repository.clone(),
            relative: relative.into(),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn key(&self) -> RepositoryKey {
        self.repository.key()
    }

    pub fn storage_id(&self) -> &str {
        &self.repository.storage_id
    }

    pub fn repository_id(&self) -> &str {
        &self.repository.id
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Location on disk under the repository base directory
    pub fn absolute(&self) -> PathBuf {
        self.repository.basedir().join(&self.relative)
    }

    /// Location on disk under the repository trash directory
    pub fn trash(&self) -> PathBuf {
        self.repository
            .basedir()
            .join(TRASH_DIR)
            .join(&self.relative)
    }

    pub fn file_name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }

    pub fn coordinates(&self) -> Option<ArtifactCoordinates> {
        self.repository.layout.coordinates(&self.relative)
    }

    pub fn is_metadata(&self) -> bool {
        self.repository.layout.is_metadata(&self.relative)
    }

    pub fn is_checksum(&self) -> bool {
        self.repository.layout.is_checksum(&self.relative)
    }

    pub fn is_snapshot(&self) -> bool {
        self.repository.layout.is_snapshot(&self.relative)
    }
}

impl fmt::Display for RepositoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository.key(), self.relative)
    }
}

/// Normalize a relative artifact path
fn normalize(path: &str) -> Result<String> {
    let invalid = |reason: &str| CoreError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let unified = path.replace('\\', "/");
    let segments: Vec<&str> = unified
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();

    if segments.is_empty() {
        return Err(invalid("path is empty"));
    }
    if segments.contains(&"..") {
        return Err(invalid("path traversal is not allowed"));
    }
    if segments[0] == TRASH_DIR {
        return Err(invalid("trash is not addressable"));
    }
    if segments.iter().any(|s| s.chars().any(char::is_control)) {
        return Err(invalid("control characters are not allowed"));
    }

    Ok(segments.join("/"))
}
