//! Index-wide metadata record.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StrategyName;
use crate::error::Result;
use crate::persist;
use crate::types::{EngineSelection, Modality};

pub const METADATA_VERSION: u32 = 2;

fn legacy_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    #[serde(default = "legacy_version")]
    pub version: u32,
    #[serde(default)]
    pub project_path: String,
    #[serde(default, alias = "total_files")]
    pub files_indexed: usize,
    #[serde(default, alias = "total_chunks")]
    pub chunks_indexed: usize,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updated_at")]
    pub last_indexed_at: Option<DateTime<Utc>>,
    /// Absent in records written before hybrid search existed.
    #[serde(default)]
    pub engine_selection: Option<EngineSelection>,
    /// Model id each modality was embedded with.
    #[serde(default)]
    pub models: BTreeMap<Modality, String>,
    #[serde(default)]
    pub strategy: Option<StrategyName>,
}

impl IndexMetadata {
    pub fn new(project_path: &Path) -> Self {
        Self {
            version: METADATA_VERSION,
            project_path: project_path.display().to_string(),
            files_indexed: 0,
            chunks_indexed: 0,
            created_at: Some(Utc::now()),
            last_indexed_at: None,
            engine_selection: None,
            models: BTreeMap::new(),
            strategy: None,
        }
    }

    /// Loads the record, rewriting older shapes in the current version.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(mut meta) = persist::read_json::<IndexMetadata>(path)? else { return Ok(None) };
        if meta.version < METADATA_VERSION {
            info!(from = meta.version, to = METADATA_VERSION, "upgrading index metadata");
            meta.version = METADATA_VERSION;
            meta.save(path)?;
        }
        Ok(Some(meta))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_json(path, self)
    }

    pub fn touch(&mut self) {
        self.last_indexed_at = Some(Utc::now());
    }
}
