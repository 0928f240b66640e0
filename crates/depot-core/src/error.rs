//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage not found: {id}")]
    StorageNotFound { id: String },

    #[error("Repository not found: {storage}:{id}")]
    RepositoryNotFound { storage: String, id: String },

    #[error("Repository already exists: {storage}:{id}")]
    RepositoryAlreadyExists { storage: String, id: String },

    #[error("Invalid repository configuration for {repository}: {message}")]
    InvalidRepository { repository: String, message: String },

    #[error("Invalid member reference '{reference}'")]
    InvalidMemberRef { reference: String },

    #[error("Group repository cycle detected: {cycle}")]
    GroupCycle { cycle: String },

    #[error("Invalid routing pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid artifact path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid remote URL {url}: {reason}")]
    InvalidRemoteUrl { url: String, reason: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse configuration: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
