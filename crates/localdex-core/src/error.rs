//! Error type shared by every engine operation.
//!
//! `Display` carries the detailed, internal message (paths, causes). What a
//! caller shows to an end user comes from [`Error::user_message`], which never
//! includes filesystem paths or source chains.

use std::path::PathBuf;

use thiserror::Error;

/// Which resource tripped a bulk-operation abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Disk,
    Memory,
    FileCount,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Disk => f.write_str("disk space"),
            ResourceKind::Memory => f.write_str("memory"),
            ResourceKind::FileCount => f.write_str("file count"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pattern '{pattern}': {detail}")]
    InvalidPattern { pattern: String, detail: String },

    #[error("Path is outside the project root: {}", .0.display())]
    OutsideProject(PathBuf),

    #[error("Refusing to follow symlink: {}", .0.display())]
    Symlink(PathBuf),

    #[error("Path {path} is not indexable: {reason}")]
    PolicyRejected { path: String, reason: String },

    #[error("Insufficient {kind}: {detail}")]
    Resource { kind: ResourceKind, detail: String },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt index state at {}: {detail}", .path.display())]
    Corruption { path: PathBuf, detail: String },

    #[error("Index is busy: {0}")]
    Busy(String),

    #[error("Not a version-controlled project: {}", .0.display())]
    NotVersioned(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage failure: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidConfig(_) => "The index configuration is invalid.".to_string(),
            Error::InvalidPattern { pattern, .. } => format!("The pattern '{pattern}' is not valid."),
            Error::OutsideProject(_) => "The requested path is outside the project.".to_string(),
            Error::Symlink(_) => "Symbolic links are not indexed.".to_string(),
            Error::PolicyRejected { reason, .. } => format!("This file is not indexable ({reason})."),
            Error::Resource { kind, .. } => {
                format!("Indexing stopped early: not enough {kind}. Work done so far was kept.")
            }
            Error::Embedding(_) | Error::DimensionMismatch { .. } => {
                "Some content could not be embedded.".to_string()
            }
            Error::Corruption { .. } => "The stored index is damaged.".to_string(),
            Error::Busy(_) => "Another indexing operation is in progress.".to_string(),
            Error::NotVersioned(_) => "This project is not under version control.".to_string(),
            Error::NotFound(_) => "Nothing is indexed for this project yet.".to_string(),
            Error::Store(_) | Error::Io(_) => "An internal storage error occurred.".to_string(),
        }
    }

    /// Corrective step to suggest alongside [`Error::user_message`], if any.
    pub fn recommended_action(&self) -> Option<&'static str> {
        match self {
            Error::Corruption { .. } => Some("Delete and rebuild the index."),
            Error::Busy(_) => Some("Retry once the current operation finishes."),
            Error::Resource { kind: ResourceKind::Disk, .. } => {
                Some("Free disk space, then run indexing again to resume.")
            }
            Error::Resource { kind: ResourceKind::Memory, .. } => {
                Some("Close other applications, then run indexing again to resume.")
            }
            Error::Resource { kind: ResourceKind::FileCount, .. } => {
                Some("Raise max_files or add exclude patterns.")
            }
            Error::NotFound(_) => Some("Create the index first."),
            Error::NotVersioned(_) => Some("Use the realtime or lazy strategy instead."),
            Error::InvalidConfig(_) | Error::InvalidPattern { .. } => Some("Fix the index config.toml."),
            _ => None,
        }
    }

    pub fn corruption(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        Error::Corruption { path: path.into(), detail: detail.to_string() }
    }
}
