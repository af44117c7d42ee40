//! The metadata store seam.
//!
//! The index never owns titles, types, years, or statuses. It reads them
//! through [`MetadataSource`] and writes back exactly one thing: the word
//! count computed at extraction time.
//!
//! [`Catalog`] is the bundled implementation: an in-memory list of works
//! that is either loaded from a TOML catalog file or discovered by walking
//! the library directory.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{DocType, WorkFilter, WorkId, WorkInfo};

/// Read/write access to the external store of work records.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use works_index::metadata::MetadataSource;
/// use works_index::models::{WorkFilter, WorkId, WorkInfo};
///
/// struct Empty;
///
/// #[async_trait]
/// impl MetadataSource for Empty {
///     async fn list_works(&self) -> Result<Vec<WorkInfo>> { Ok(vec![]) }
///     async fn works_by_ids(&self, _ids: &[WorkId]) -> Result<Vec<WorkInfo>> { Ok(vec![]) }
///     async fn filter_work_ids(&self, _f: &WorkFilter) -> Result<Vec<WorkId>> { Ok(vec![]) }
///     async fn update_word_count(&self, _id: WorkId, _n: i64) -> Result<()> { Ok(()) }
/// }
/// ```
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// All works eligible for indexing.
    async fn list_works(&self) -> Result<Vec<WorkInfo>>;

    /// The subset of `ids` that exist. Unknown ids are silently dropped.
    async fn works_by_ids(&self, ids: &[WorkId]) -> Result<Vec<WorkInfo>>;

    /// Ids of works matching the type/year/status equality filters
    /// (and the explicit id list, when present).
    async fn filter_work_ids(&self, filter: &WorkFilter) -> Result<Vec<WorkId>>;

    /// Record a freshly computed word count for a work.
    async fn update_word_count(&self, id: WorkId, word_count: i64) -> Result<()>;

    /// Persist any buffered writes. Called once at the end of a build.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    works: Vec<WorkInfo>,
}

/// In-memory [`MetadataSource`], optionally backed by a TOML file.
#[derive(Debug, Default)]
pub struct Catalog {
    works: RwLock<Vec<WorkInfo>>,
    file: Option<PathBuf>,
    dirty: RwLock<bool>,
}

impl Catalog {
    pub fn new(works: Vec<WorkInfo>) -> Self {
        Self {
            works: RwLock::new(works),
            file: None,
            dirty: RwLock::new(false),
        }
    }

    /// Use the configured catalog file, or discover works under the base dir.
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.library.catalog {
            Some(path) => Self::load(path),
            None => Self::discover(&config.library.base_dir, &config.library.include_globs),
        }
    }

    /// Load `[[works]]` entries from a TOML file. Word counts are written back to it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog: {}", path.display()))?;
        let parsed: CatalogFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse catalog: {}", path.display()))?;

        let mut seen = HashSet::new();
        for work in &parsed.works {
            if !seen.insert(work.id) {
                bail!("duplicate work id {} in {}", work.id, path.display());
            }
        }

        Ok(Self {
            works: RwLock::new(parsed.works),
            file: Some(path.to_path_buf()),
            dirty: RwLock::new(false),
        })
    }

    /// Build a catalog from the files under `base_dir` matching `include_globs`.
    ///
    /// Each work's id is derived from its relative path (see
    /// [`work_id_for_path`]), so it does not shift when other files come and
    /// go. Titles come from file stems; files with an unknown extension are
    /// skipped. Works are listed in sorted path order.
    pub fn discover(base_dir: &Path, include_globs: &[String]) -> Result<Self> {
        if !base_dir.exists() {
            bail!("Library base_dir does not exist: {}", base_dir.display());
        }

        let include_set = build_globset(include_globs)?;
        let mut found: Vec<(String, DocType, String)> = Vec::new();

        for entry in WalkDir::new(base_dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(base_dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");
            if !include_set.is_match(&rel_str) {
                continue;
            }
            let Some(doc_type) = path
                .extension()
                .and_then(|e| DocType::from_extension(&e.to_string_lossy()))
            else {
                continue;
            };
            let title = path
                .file_stem()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            found.push((rel_str, doc_type, title));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut seen: HashMap<WorkId, String> = HashMap::new();
        let mut works = Vec::with_capacity(found.len());
        for (path, doc_type, title) in found {
            let id = work_id_for_path(&path);
            if let Some(other) = seen.insert(id, path.clone()) {
                bail!("work id collision between {} and {}", other, path);
            }
            works.push(WorkInfo {
                id,
                title,
                work_type: String::new(),
                year: None,
                status: String::new(),
                doc_type: doc_type.as_str().to_string(),
                path,
                word_count: None,
            });
        }

        Ok(Self::new(works))
    }

    /// Snapshot of every work.
    pub fn works(&self) -> Vec<WorkInfo> {
        self.read().clone()
    }

    pub fn get(&self, id: WorkId) -> Option<WorkInfo> {
        self.read().iter().find(|w| w.id == id).cloned()
    }

    /// Write the catalog back to its file, if it has one and anything changed.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let mut dirty = self.dirty.write().unwrap_or_else(|e| e.into_inner());
        if !*dirty {
            return Ok(());
        }
        let file = CatalogFile {
            works: self.works(),
        };
        let content = toml::to_string_pretty(&file)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write catalog: {}", path.display()))?;
        *dirty = false;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<WorkInfo>> {
        self.works.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<WorkInfo>> {
        self.works.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MetadataSource for Catalog {
    async fn list_works(&self) -> Result<Vec<WorkInfo>> {
        Ok(self.works())
    }

    async fn works_by_ids(&self, ids: &[WorkId]) -> Result<Vec<WorkInfo>> {
        let wanted: HashSet<WorkId> = ids.iter().copied().collect();
        Ok(self
            .read()
            .iter()
            .filter(|w| wanted.contains(&w.id))
            .cloned()
            .collect())
    }

    async fn filter_work_ids(&self, filter: &WorkFilter) -> Result<Vec<WorkId>> {
        let explicit: HashSet<WorkId> = filter.ids.iter().copied().collect();
        Ok(self
            .read()
            .iter()
            .filter(|w| explicit.is_empty() || explicit.contains(&w.id))
            .filter(|w| filter.matches(w))
            .map(|w| w.id)
            .collect())
    }

    async fn update_word_count(&self, id: WorkId, word_count: i64) -> Result<()> {
        let changed = {
            let mut works = self.write();
            match works.iter_mut().find(|w| w.id == id) {
                Some(work) if work.word_count != Some(word_count) => {
                    work.word_count = Some(word_count);
                    true
                }
                _ => false,
            }
        };
        if changed {
            *self.dirty.write().unwrap_or_else(|e| e.into_inner()) = true;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.save()
    }
}

/// Stable id for a discovered work: the first eight bytes of the SHA-256 of
/// its `/`-separated relative path, as a positive 63-bit integer.
pub fn work_id_for_path(rel_path: &str) -> WorkId {
    let digest = Sha256::digest(rel_path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) & (i64::MAX as u64)) as WorkId
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
