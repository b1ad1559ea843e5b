//! Per-file indexability decisions and the on-disk sweep built on them.
//!
//! Rules apply in a fixed order and the first match wins: built-in deny
//! rules, user excludes, ignore files, binary detection, the size ceiling,
//! user includes, then default allow. Built-in deny rules cannot be relaxed
//! from configuration.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::Modality;

const DENY_RULES: &[&str] = &[
    // dependencies and vendored code
    "**/node_modules/**",
    "**/bower_components/**",
    "**/vendor/**",
    "**/.venv/**",
    "**/venv/**",
    "**/__pycache__/**",
    // version control
    "**/.git/**",
    "**/.hg/**",
    "**/.svn/**",
    // build output
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/.next/**",
    "**/.gradle/**",
    // secrets
    "**/.env",
    "**/.env.*",
    "**/*.pem",
    "**/*.key",
    "**/*.p12",
    "**/*.pfx",
    "**/id_rsa*",
    "**/id_ed25519*",
    "**/.npmrc",
    "**/.netrc",
    "**/.pypirc",
    "**/secrets/**",
    "**/credentials.json",
    // lockfiles
    "**/*.lock",
    "**/package-lock.json",
    "**/pnpm-lock.yaml",
    "**/go.sum",
    // editors and IDEs
    "**/.idea/**",
    "**/.vscode/**",
    "**/*.swp",
    "**/*.iml",
    "**/.DS_Store",
    // coverage
    "**/coverage/**",
    "**/.nyc_output/**",
    "**/lcov.info",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "tiff", "psd", "pdf", "zip", "gz", "tgz", "bz2", "xz", "7z",
    "rar", "tar", "jar", "war", "class", "exe", "dll", "so", "dylib", "o", "a", "lib", "obj", "wasm", "bin", "dat",
    "db", "sqlite", "sqlite3", "pyc", "pyo", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "mov", "avi", "wav",
    "flac", "ogg", "lance", "arrow", "parquet", "onnx", "safetensors", "pt", "ckpt",
];

const IGNORE_FILES: &[&str] = &[".gitignore", ".ignore"];
const SNIFF_BYTES: usize = 8 * 1024;

/// Outcome of evaluating one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub index: bool,
    pub reason: String,
}

impl PolicyDecision {
    fn allow(reason: &str) -> Self {
        Self { index: true, reason: reason.to_string() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { index: false, reason: reason.into() }
    }
}

pub struct PolicyEngine {
    root: PathBuf,
    deny: GlobSet,
    exclude: GlobSet,
    include: Option<GlobSet>,
    docs: GlobSet,
    respect_ignore_files: bool,
    max_file_size: u64,
    ignore_cache: Mutex<HashMap<PathBuf, Option<Arc<Gitignore>>>>,
}

impl PolicyEngine {
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Result<Self> {
        let include = if settings.include.is_empty() { None } else { Some(user_globs(&settings.include)?) };
        Ok(Self {
            root: root.into(),
            deny: deny_globs(),
            exclude: user_globs(&settings.exclude)?,
            include,
            docs: user_globs(&settings.doc_patterns)?,
            respect_ignore_files: settings.respect_ignore_files,
            max_file_size: settings.max_file_size_bytes,
            ignore_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path-only check against deny rules and excludes, for callers that
    /// cannot read the file (deletions, raw watcher events).
    pub fn is_denied(&self, rel: &str) -> bool {
        self.deny.is_match(rel) || self.exclude.is_match(rel)
    }

    /// Decides whether `rel` (project-relative, `/`-separated) is indexable.
    /// Content-based rules read from `abs`.
    pub fn should_index(&self, rel: &str, abs: &Path) -> PolicyDecision {
        if self.deny.is_match(rel) {
            return PolicyDecision::deny("matched a built-in deny rule");
        }
        if self.exclude.is_match(rel) {
            return PolicyDecision::deny("matched an exclude pattern");
        }
        if self.respect_ignore_files && self.is_ignored(abs, false) {
            return PolicyDecision::deny("ignored by an ignore file");
        }
        if has_binary_extension(rel) {
            return PolicyDecision::deny("binary file extension");
        }
        let meta = match fs::metadata(abs) {
            Ok(m) => m,
            Err(e) => return PolicyDecision::deny(format!("unreadable: {}", e.kind())),
        };
        if sniff_binary(abs) {
            return PolicyDecision::deny("binary content");
        }
        if meta.len() > self.max_file_size {
            return PolicyDecision::deny(format!("larger than {} bytes", self.max_file_size));
        }
        if let Some(include) = &self.include {
            if !include.is_match(rel) {
                return PolicyDecision::deny("not matched by any include pattern");
            }
            return PolicyDecision::allow("matched an include pattern");
        }
        PolicyDecision::allow("allowed by default")
    }

    /// Resolves a caller-named path to its relative form and evaluates it.
    /// Unlike the sweep, symlinks and paths outside the project are errors.
    pub fn check_explicit(&self, path: &str) -> Result<(String, PathBuf, PolicyDecision)> {
        let rel = relativize(&self.root, Path::new(path))?;
        if let Some(link) = self.first_symlink(&rel) {
            return Err(Error::Symlink(link));
        }
        let abs = self.root.join(&rel);
        if let (Ok(real), Ok(root)) = (abs.canonicalize(), self.root.canonicalize()) {
            if !real.starts_with(&root) {
                return Err(Error::OutsideProject(abs));
            }
        }
        let decision = self.should_index(&rel, &abs);
        Ok((rel, abs, decision))
    }

    /// The first component of `rel`, walking down from the root, that is a
    /// symlink. Stops at the first component that does not exist.
    fn first_symlink(&self, rel: &str) -> Option<PathBuf> {
        let mut current = self.root.clone();
        for part in rel.split('/') {
            current.push(part);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => return Some(current),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
        None
    }

    /// Prose for documentation patterns, code for everything else.
    pub fn modality_for(&self, rel: &str) -> Modality {
        if self.docs.is_match(rel) { Modality::Prose } else { Modality::Code }
    }

    /// Walks the project and returns every indexable file, sorted by path.
    /// Symlinks are skipped with a warning; denied directories are pruned.
    pub fn sweep(&self) -> Vec<(String, PathBuf)> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(false).into_iter().filter_entry(|e| {
            if e.depth() == 0 || !e.file_type().is_dir() {
                return true;
            }
            let Ok(rel) = relative_str(&self.root, e.path()) else { return false };
            !self.deny.is_match(format!("{rel}/_").as_str())
                && !self.exclude.is_match(rel.as_str())
                && !(self.respect_ignore_files && self.is_ignored(e.path(), true))
        });
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry during sweep");
                    continue;
                }
            };
            if entry.file_type().is_symlink() {
                warn!(path = %entry.path().display(), "skipping symlink");
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = relative_str(&self.root, entry.path()) else { continue };
            let decision = self.should_index(&rel, entry.path());
            if decision.index {
                out.push((rel, entry.path().to_path_buf()));
            } else {
                debug!(path = %rel, reason = %decision.reason, "not indexable");
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Drops cached ignore matchers, e.g. after an ignore file changed.
    pub fn invalidate_ignore_cache(&self) {
        if let Ok(mut cache) = self.ignore_cache.lock() {
            cache.clear();
        }
    }

    /// Checks ignore files from the closest directory outwards; the closest
    /// file with an opinion decides, each matching relative to its own dir.
    fn is_ignored(&self, abs: &Path, is_dir: bool) -> bool {
        let Ok(rel) = abs.strip_prefix(&self.root) else { return false };
        let mut dirs = vec![self.root.clone()];
        let mut cur = self.root.clone();
        if let Some(parent) = rel.parent() {
            for comp in parent.components() {
                cur.push(comp);
                dirs.push(cur.clone());
            }
        }
        for dir in dirs.iter().rev() {
            let Some(matcher) = self.matcher_for(dir) else { continue };
            match matcher.matched_path_or_any_parents(abs, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }

    fn matcher_for(&self, dir: &Path) -> Option<Arc<Gitignore>> {
        let mut cache = self.ignore_cache.lock().ok()?;
        cache
            .entry(dir.to_path_buf())
            .or_insert_with(|| {
                let mut builder = GitignoreBuilder::new(dir);
                let mut any = false;
                for name in IGNORE_FILES {
                    let file = dir.join(name);
                    if file.is_file() {
                        if let Some(e) = builder.add(&file) {
                            warn!(path = %file.display(), error = %e, "ignore file partially parsed");
                        }
                        any = true;
                    }
                }
                if !any {
                    return None;
                }
                match builder.build() {
                    Ok(g) => Some(Arc::new(g)),
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "ignore rules unusable");
                        None
                    }
                }
            })
            .clone()
    }
}

fn deny_globs() -> GlobSet {
    let mut b = GlobSetBuilder::new();
    for rule in DENY_RULES {
        if let Ok(g) = GlobBuilder::new(rule).literal_separator(true).build() {
            b.add(g);
        }
    }
    b.build().unwrap_or_else(|_| GlobSet::empty())
}

fn user_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p).map_err(|e| Error::InvalidPattern { pattern: p.clone(), detail: e.to_string() })?;
        b.add(g);
    }
    b.build().map_err(|e| Error::InvalidPattern { pattern: patterns.join(", "), detail: e.to_string() })
}

fn has_binary_extension(rel: &str) -> bool {
    Path::new(rel)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn sniff_binary(abs: &Path) -> bool {
    let Ok(mut f) = fs::File::open(abs) else { return false };
    let mut buf = vec![0u8; SNIFF_BYTES];
    let n = f.read(&mut buf).unwrap_or(0);
    buf[..n].contains(&0)
}

fn relative_str(root: &Path, abs: &Path) -> Result<String> {
    let rel = abs.strip_prefix(root).map_err(|_| Error::OutsideProject(abs.to_path_buf()))?;
    Ok(to_slash(rel))
}

fn to_slash(p: &Path) -> String {
    p.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Lexically normalizes `path` (absolute or root-relative) into a
/// `/`-separated project-relative path, rejecting anything that escapes.
pub fn relativize(root: &Path, path: &Path) -> Result<String> {
    let joined = if path.is_absolute() { path.to_path_buf() } else { root.join(path) };
    let mut normal = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::ParentDir => {
                if !normal.pop() {
                    return Err(Error::OutsideProject(path.to_path_buf()));
                }
            }
            Component::CurDir => {}
            other => normal.push(other),
        }
    }
    let rel = normal.strip_prefix(root).map_err(|_| Error::OutsideProject(path.to_path_buf()))?;
    if rel.as_os_str().is_empty() {
        return Err(Error::OutsideProject(path.to_path_buf()));
    }
    Ok(to_slash(rel))
}
