use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

/// A change to one project-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub path: String,
    pub kind: FileEventKind,
}

impl FileEvent {
    pub fn new(path: impl Into<String>, kind: FileEventKind) -> Self {
        Self { path: path.into(), kind }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(path, FileEventKind::Modified)
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self::new(path, FileEventKind::Deleted)
    }
}
