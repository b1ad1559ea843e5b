//! Per-project on-disk layout under the data root.
//!
//! ```text
//! <data root>/<key>/
//!   vectors/code/  vectors/prose/     vector sub-stores
//!   lexical/                          lexical store
//!   fingerprints-code.json  fingerprints-prose.json
//!   dirty.json                        lazy strategy only
//!   metadata.json
//!   config.toml                       user-editable, survives delete
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::CONFIG_FILE;
use crate::error::Result;
use crate::types::Modality;

const KEY_LEN: usize = 16;
const LEGACY_KEY_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct IndexLayout {
    dir: PathBuf,
}

pub fn project_key(project: &Path) -> String {
    key_of(project, KEY_LEN)
}

fn key_of(project: &Path, len: usize) -> String {
    let hex = blake3::hash(project.to_string_lossy().as_bytes()).to_hex();
    hex[..len].to_string()
}

impl IndexLayout {
    /// Locates (and creates) the index directory for `project`, moving a
    /// directory left under the older short key into place first.
    pub fn open(data_root: &Path, project: &Path) -> Result<Self> {
        let dir = data_root.join(project_key(project));
        let legacy = data_root.join(key_of(project, LEGACY_KEY_LEN));
        if !dir.exists() && legacy.is_dir() {
            info!(from = %legacy.display(), to = %dir.display(), "migrating legacy index directory");
            fs::rename(&legacy, &dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_dir(&self, modality: Modality) -> PathBuf {
        self.dir.join("vectors").join(modality.as_str())
    }

    pub fn lexical_dir(&self) -> PathBuf {
        self.dir.join("lexical")
    }

    pub fn fingerprints_path(&self, modality: Modality) -> PathBuf {
        self.dir.join(format!("fingerprints-{}.json", modality.as_str()))
    }

    pub fn dirty_path(&self) -> PathBuf {
        self.dir.join("dirty.json")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    /// Total bytes used by the index directory.
    pub fn storage_size(&self) -> u64 {
        WalkDir::new(&self.dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Removes everything except the user's config file.
    pub fn clear(&self) -> Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_name() == CONFIG_FILE {
                continue;
            }
            let path = entry.path();
            let res = if entry.file_type()?.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
            if let Err(e) = res {
                warn!(path = %path.display(), error = %e, "failed to remove index entry");
                return Err(e.into());
            }
        }
        Ok(())
    }
}
