//! Layered configuration and path helpers.
//!
//! Uses Figment to merge compiled defaults, the project's `config.toml` in its
//! index directory, then `LOCALDEX_*` env vars (nested keys split on `__`).
//! Provides helpers to expand `~` and `${VAR}` and to resolve relative paths
//! against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunker::ChunkProfile;
use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "config.toml";
pub const ENV_PREFIX: &str = "LOCALDEX_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StrategyName {
    #[default]
    Realtime,
    Lazy,
    Git,
}

impl StrategyName {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyName::Realtime => "realtime",
            StrategyName::Lazy => "lazy",
            StrategyName::Git => "git",
        }
    }
}

impl std::fmt::Display for StrategyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "realtime" => Ok(StrategyName::Realtime),
            "lazy" => Ok(StrategyName::Lazy),
            "git" => Ok(StrategyName::Git),
            other => Err(format!("unknown strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnginePreference {
    #[default]
    Auto,
    Native,
    Builtin,
}

impl EnginePreference {
    pub fn as_str(self) -> &'static str {
        match self {
            EnginePreference::Auto => "auto",
            EnginePreference::Native => "native",
            EnginePreference::Builtin => "builtin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Lance,
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// Best available accelerator, falling back to the CPU.
    #[default]
    Auto,
    Cpu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub code_model_dir: Option<String>,
    pub prose_model_dir: Option<String>,
    pub device: DeviceChoice,
    /// Use the deterministic hash embedder instead of loading models.
    pub fake: bool,
    pub cpu_batch_size: usize,
    pub accelerator_batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            code_model_dir: None,
            prose_model_dir: None,
            device: DeviceChoice::Auto,
            fake: false,
            cpu_batch_size: 8,
            accelerator_batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub code: ChunkProfile,
    pub prose: ChunkProfile,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { code: ChunkProfile::code(), prose: ChunkProfile::prose() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    pub min_free_disk_mb: u64,
    pub max_memory_percent: f32,
    pub check_every_files: usize,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self { min_free_disk_mb: 256, max_memory_percent: 95.0, check_every_files: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub respect_ignore_files: bool,
    pub max_file_size_bytes: u64,
    pub max_files: usize,
    /// Files matching these are routed to the prose model.
    pub doc_patterns: Vec<String>,
    pub strategy: StrategyName,
    pub lazy_idle_ms: u64,
    pub realtime_debounce_ms: u64,
    pub git_debounce_ms: u64,
    pub lexical_engine: EnginePreference,
    pub native_threshold_files: usize,
    pub default_alpha: f32,
    pub rrf_offset: f32,
    pub overfetch_multiplier: usize,
    pub vector_backend: VectorBackend,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub resources: ResourceSettings,
    pub streaming_threshold_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            respect_ignore_files: true,
            max_file_size_bytes: 1024 * 1024,
            max_files: 50_000,
            doc_patterns: ["**/*.md", "**/*.mdx", "**/*.markdown", "**/*.rst", "**/*.txt", "**/*.adoc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strategy: StrategyName::Realtime,
            lazy_idle_ms: 30_000,
            realtime_debounce_ms: 300,
            git_debounce_ms: 3_000,
            lexical_engine: EnginePreference::Auto,
            native_threshold_files: 2_000,
            default_alpha: 0.5,
            rrf_offset: 60.0,
            overfetch_multiplier: 3,
            vector_backend: VectorBackend::Lance,
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingSettings::default(),
            resources: ResourceSettings::default(),
            streaming_threshold_bytes: 256 * 1024,
        }
    }
}

impl Settings {
    /// Defaults, then `<index_dir>/config.toml` when given, then the environment.
    pub fn figment(index_dir: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(dir) = index_dir {
            figment = figment.merge(Toml::file(dir.join(CONFIG_FILE)));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(index_dir: Option<&Path>) -> Result<Self> {
        Self::extract(Self::figment(index_dir))
    }

    pub fn extract(figment: Figment) -> Result<Self> {
        let settings: Settings = figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_alpha) {
            return Err(Error::InvalidConfig(format!("default_alpha must be within [0, 1], got {}", self.default_alpha)));
        }
        if self.rrf_offset <= 0.0 {
            return Err(Error::InvalidConfig("rrf_offset must be positive".into()));
        }
        if self.overfetch_multiplier == 0 {
            return Err(Error::InvalidConfig("overfetch_multiplier must be at least 1".into()));
        }
        if self.max_files == 0 || self.max_file_size_bytes == 0 {
            return Err(Error::InvalidConfig("max_files and max_file_size_bytes must be positive".into()));
        }
        if self.streaming_threshold_bytes == 0 || self.streaming_threshold_bytes > self.max_file_size_bytes {
            return Err(Error::InvalidConfig(format!(
                "streaming_threshold_bytes must be within 1..={} (max_file_size_bytes), got {}",
                self.max_file_size_bytes, self.streaming_threshold_bytes
            )));
        }
        if self.embedding.cpu_batch_size == 0 || self.embedding.accelerator_batch_size == 0 {
            return Err(Error::InvalidConfig("embedding batch sizes must be positive".into()));
        }
        if self.resources.check_every_files == 0 {
            return Err(Error::InvalidConfig("resources.check_every_files must be positive".into()));
        }
        for (name, profile) in [("code", &self.chunking.code), ("prose", &self.chunking.prose)] {
            profile.validate().map_err(|e| Error::InvalidConfig(format!("chunking.{name}: {e}")))?;
        }
        for pattern in self.include.iter().chain(&self.exclude).chain(&self.doc_patterns) {
            globset::Glob::new(pattern)
                .map_err(|e| Error::InvalidPattern { pattern: pattern.clone(), detail: e.to_string() })?;
        }
        Ok(())
    }

    /// Model directory configured for `modality`, expanded against `base`.
    pub fn model_dir(&self, modality: crate::types::Modality, base: &Path) -> Option<PathBuf> {
        let raw = match modality {
            crate::types::Modality::Code => self.embedding.code_model_dir.as_deref(),
            crate::types::Modality::Prose => self.embedding.prose_model_dir.as_deref(),
        };
        raw.map(|p| resolve_with_base(base, p))
    }
}

/// Root under which every project's index directory lives.
pub fn data_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LOCALDEX_DATA_DIR") {
        return Ok(expand_path(dir));
    }
    dirs::data_dir()
        .map(|d| d.join("localdex"))
        .ok_or_else(|| Error::InvalidConfig("no platform data directory; set LOCALDEX_DATA_DIR".into()))
}

/// Commented starter file written next to a freshly created index.
pub const DEFAULT_CONFIG_TOML: &str = r#"# localdex project configuration.
# Values here override the built-in defaults; LOCALDEX_* environment
# variables override values here (use `__` for nesting, e.g.
# LOCALDEX_EMBEDDING__FAKE=true).

# include = ["src/**"]
# exclude = ["**/*.snap"]
# respect_ignore_files = true
# max_file_size_bytes = 1048576
# files above this size are chunked in bounded segments
# streaming_threshold_bytes = 262144
# max_files = 50000
# doc_patterns = ["**/*.md", "**/*.rst", "**/*.txt"]

# realtime | lazy | git
# strategy = "realtime"
# lazy_idle_ms = 30000

# auto | native | builtin
# lexical_engine = "auto"
# native_threshold_files = 2000
# default_alpha = 0.5

# [embedding]
# code_model_dir = "~/models/bge-small-en-v1.5"
# prose_model_dir = "~/models/bge-m3"
# device = "auto"

# [resources]
# min_free_disk_mb = 256
# max_memory_percent = 95.0
"#;

/// Writes [`DEFAULT_CONFIG_TOML`] into `index_dir` unless a config exists.
pub fn write_default_config(index_dir: &Path) -> Result<bool> {
    let path = index_dir.join(CONFIG_FILE);
    if path.exists() {
        return Ok(false);
    }
    std::fs::create_dir_all(index_dir)?;
    crate::persist::write_atomic(&path, DEFAULT_CONFIG_TOML.as_bytes())?;
    Ok(true)
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
