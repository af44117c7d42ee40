//! Full and incremental (re)indexing.
//!
//! The builder pulls [`WorkInfo`] records from a [`MetadataSource`], extracts
//! each file, and writes rows into the [`IndexStore`]. A document that fails
//! to extract is recorded in [`BuildReport::errors`] and skipped; only
//! failures that make the run itself impossible (index unavailable, metadata
//! source unreadable, transaction cannot start) abort it.
//!
//! Staleness is decided per document by comparing the file's modification
//! time with the `source_mtime` recorded at the last successful extraction:
//!
//! ```text
//!   Missing ──extract──▶ Indexed ──file touched──▶ Stale ──extract──▶ Indexed
//!
//!   (row whose id left the metadata source)  ▶ Orphaned, reported only
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use crate::error::ExtractError;
use crate::extract::extract_by_type;
use crate::metadata::MetadataSource;
use crate::models::{IndexedDocument, WorkId, WorkInfo};
use crate::progress::{BuildPhase, BuildProgress, NoProgress, ProgressReporter};
use crate::store::{self, IndexStore};

/// Where a single document stands relative to the index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Missing,
    Indexed,
    Stale,
    Orphaned,
}

/// Classify a document from its recorded and on-disk mtimes (ms).
pub fn classify(recorded_mtime: Option<i64>, disk_mtime: i64) -> DocumentState {
    match recorded_mtime {
        None => DocumentState::Missing,
        Some(recorded) if disk_mtime > recorded => DocumentState::Stale,
        Some(_) => DocumentState::Indexed,
    }
}

/// Outcome of a staleness check. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessReport {
    /// Works known to the metadata source.
    pub total_works: usize,
    /// Rows currently in the index.
    pub indexed: usize,
    pub stale: Vec<WorkId>,
    pub missing: Vec<WorkId>,
    /// Index rows whose id is no longer in the metadata source.
    pub orphaned: usize,
    pub orphaned_ids: Vec<WorkId>,
    /// Works whose file could not be statted; neither stale nor missing.
    pub skipped: usize,
}

impl StalenessReport {
    pub fn needs_update(&self) -> bool {
        !self.stale.is_empty() || !self.missing.is_empty()
    }
}

/// Outcome of a build run.
///
/// `success` means the run completed. Callers must also look at `errors`:
/// a completed run may still have skipped documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub success: bool,
    pub document_count: usize,
    pub word_count: i64,
    pub duration_ms: u64,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

/// Orchestrates extraction and index writes.
pub struct IndexBuilder<'a> {
    store: &'a IndexStore,
    source: &'a dyn MetadataSource,
    base_dir: PathBuf,
    progress: Box<dyn ProgressReporter + 'a>,
    cancel: CancellationToken,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(
        store: &'a IndexStore,
        source: &'a dyn MetadataSource,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            source,
            base_dir: base_dir.into(),
            progress: Box::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, reporter: Box<dyn ProgressReporter + 'a>) -> Self {
        self.progress = reporter;
        self
    }

    /// Checked between documents; cancelling stops the run at the next boundary.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Rebuild the whole index inside one transaction.
    ///
    /// The clear and every insert commit together, so a crash or cancellation
    /// leaves the previous index untouched.
    pub async fn build_full(&self) -> Result<BuildReport> {
        let started = Instant::now();
        self.store.open().await?;
        let _writer = self.store.lock_writer().await;

        let works = self
            .source
            .list_works()
            .await
            .context("failed to read works from metadata source")?;
        let total = works.len();
        tracing::info!(total, "full index build started");
        self.emit(BuildPhase::Preparing, 0, total, None, 0);

        let mut tx = self
            .store
            .begin()
            .await
            .context("failed to begin index transaction")?;
        let cleared = store::clear_documents(&mut tx).await?;
        tracing::debug!(cleared, "cleared document table");

        let mut report = BuildReport::default();
        let mut counts = Vec::with_capacity(total);
        self.index_works(&works, &mut tx, &mut report, &mut counts)
            .await?;

        if report.cancelled {
            tx.rollback().await?;
            report.duration_ms = started.elapsed().as_millis() as u64;
            tracing::info!("full index build cancelled; previous index kept");
            return Ok(report);
        }

        self.emit(BuildPhase::Updating, total, total, None, report.errors.len());
        let now = chrono::Utc::now().to_rfc3339();
        store::set_meta_on(&mut tx, store::META_LAST_FULL_BUILD, &now).await?;
        store::set_meta_on(
            &mut tx,
            store::META_DOCUMENT_COUNT,
            &report.document_count.to_string(),
        )
        .await?;
        store::set_meta_on(&mut tx, store::META_WORD_COUNT, &report.word_count.to_string())
            .await?;
        tx.commit().await?;

        // Only committed rows may reach the metadata source
        self.write_back_counts(&counts).await;
        self.flush_source().await;

        report.success = true;
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.emit(BuildPhase::Complete, total, total, None, report.errors.len());
        tracing::info!(
            documents = report.document_count,
            words = report.word_count,
            failed = report.errors.len(),
            duration_ms = report.duration_ms,
            "full index build finished"
        );
        Ok(report)
    }

    /// Re-extract only stale and missing documents, one upsert at a time.
    pub async fn update_incremental(&self) -> Result<BuildReport> {
        let started = Instant::now();
        self.emit(BuildPhase::Preparing, 0, 0, None, 0);

        let works = self
            .source
            .list_works()
            .await
            .context("failed to read works from metadata source")?;
        let staleness = self.compute_staleness(&works).await?;

        let targets: HashSet<WorkId> = staleness
            .stale
            .iter()
            .chain(staleness.missing.iter())
            .copied()
            .collect();

        if targets.is_empty() {
            self.emit(BuildPhase::Complete, 0, 0, None, 0);
            tracing::info!("index is up to date");
            return Ok(BuildReport {
                success: true,
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        let pending: Vec<WorkInfo> = works
            .into_iter()
            .filter(|w| targets.contains(&w.id))
            .collect();
        tracing::info!(
            stale = staleness.stale.len(),
            missing = staleness.missing.len(),
            "incremental index update started"
        );

        let mut report = self.reindex(&pending).await?;
        self.store
            .set_meta(
                store::META_LAST_INCREMENTAL,
                &chrono::Utc::now().to_rfc3339(),
            )
            .await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            documents = report.document_count,
            failed = report.errors.len(),
            cancelled = report.cancelled,
            "incremental index update finished"
        );
        Ok(report)
    }

    /// Re-index one work after a change event. No-op if the id is unknown upstream.
    pub async fn update_single_work(&self, id: WorkId) -> Result<BuildReport> {
        let started = Instant::now();
        let works = self
            .source
            .works_by_ids(&[id])
            .await
            .context("failed to read work from metadata source")?;
        if works.is_empty() {
            tracing::debug!(id, "work not in metadata source; nothing to index");
            return Ok(BuildReport {
                success: true,
                ..Default::default()
            });
        }

        let mut report = self.reindex(&works).await?;
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Classify every upstream document as stale, missing, or fine.
    pub async fn check_staleness(&self) -> Result<StalenessReport> {
        let works = self
            .source
            .list_works()
            .await
            .context("failed to read works from metadata source")?;
        self.compute_staleness(&works).await
    }

    async fn compute_staleness(&self, works: &[WorkInfo]) -> Result<StalenessReport> {
        let mut report = StalenessReport {
            total_works: works.len(),
            ..Default::default()
        };

        if !self.store.exists() {
            report.missing = works.iter().map(|w| w.id).collect();
            return Ok(report);
        }

        self.store.open().await?;
        let recorded: HashMap<WorkId, i64> = self.store.indexed_mtimes().await?;
        report.indexed = recorded.len();

        for work in works {
            let disk_mtime = match stat(&self.base_dir.join(&work.path)) {
                Ok((mtime, _)) => mtime,
                Err(e) => {
                    // A file mid-save must not show up as stale or missing
                    tracing::debug!(path = %work.path, error = %e, "cannot stat; skipped");
                    report.skipped += 1;
                    continue;
                }
            };
            match classify(recorded.get(&work.id).copied(), disk_mtime) {
                DocumentState::Missing => report.missing.push(work.id),
                DocumentState::Stale => report.stale.push(work.id),
                DocumentState::Indexed | DocumentState::Orphaned => {}
            }
        }

        let upstream: HashSet<WorkId> = works.iter().map(|w| w.id).collect();
        let mut orphaned: Vec<WorkId> = recorded
            .keys()
            .filter(|id| !upstream.contains(id))
            .copied()
            .collect();
        orphaned.sort_unstable();
        report.orphaned = orphaned.len();
        report.orphaned_ids = orphaned;

        Ok(report)
    }

    /// Upsert each work outside a transaction, then refresh aggregates.
    async fn reindex(&self, works: &[WorkInfo]) -> Result<BuildReport> {
        self.store.open().await?;
        let _writer = self.store.lock_writer().await;

        let pool = self.store.pool().await?;
        let mut conn = pool.acquire().await?;
        let mut report = BuildReport::default();
        let mut counts = Vec::with_capacity(works.len());
        self.index_works(works, &mut conn, &mut report, &mut counts)
            .await?;
        // Each upsert committed on its own, cancelled or not
        self.write_back_counts(&counts).await;

        let total = works.len();
        self.emit(BuildPhase::Updating, total, total, None, report.errors.len());
        let documents = self.store.document_count().await?;
        let words = self.store.total_words().await?;
        store::set_meta_on(&mut conn, store::META_DOCUMENT_COUNT, &documents.to_string()).await?;
        store::set_meta_on(&mut conn, store::META_WORD_COUNT, &words.to_string()).await?;

        self.flush_source().await;

        report.success = !report.cancelled;
        self.emit(BuildPhase::Complete, total, total, None, report.errors.len());
        Ok(report)
    }

    /// Extract and write each work on `conn`, recording per-document failures.
    /// Word counts of written rows are pushed to `counts` for the caller to
    /// write back once the rows are durable.
    async fn index_works(
        &self,
        works: &[WorkInfo],
        conn: &mut SqliteConnection,
        report: &mut BuildReport,
        counts: &mut Vec<(WorkId, i64)>,
    ) -> Result<()> {
        let total = works.len();
        for (i, work) in works.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.emit(
                BuildPhase::Extracting,
                i,
                total,
                Some(work.path.as_str()),
                report.errors.len(),
            );

            match self.extract_work(work) {
                Ok(doc) => {
                    store::upsert_document(conn, &doc).await?;
                    counts.push((work.id, doc.word_count));
                    report.document_count += 1;
                    report.word_count += doc.word_count;
                }
                Err(e) => {
                    tracing::warn!(path = %work.path, error = %e, "extraction failed; skipped");
                    report.errors.push(format!("{}: {}", work.path, e));
                }
            }

            self.emit(
                BuildPhase::Extracting,
                i + 1,
                total,
                Some(work.path.as_str()),
                report.errors.len(),
            );
        }
        Ok(())
    }

    fn extract_work(&self, work: &WorkInfo) -> Result<IndexedDocument, ExtractError> {
        let path = self.base_dir.join(&work.path);
        // Stat before reading: a write racing the read then shows up as stale next time
        let (source_mtime, source_size) = stat(&path)?;
        let content = extract_by_type(&path, &work.doc_type)?;
        Ok(IndexedDocument {
            id: work.id,
            text_content: content.text,
            word_count: content.word_count,
            extracted_at: chrono::Utc::now().timestamp(),
            source_mtime,
            source_size,
            headings: Some(content.headings).filter(|h| !h.is_empty()),
            dateline: content.dateline,
        })
    }

    async fn write_back_counts(&self, counts: &[(WorkId, i64)]) {
        for &(id, word_count) in counts {
            if let Err(e) = self.source.update_word_count(id, word_count).await {
                tracing::warn!(id, error = %e, "word count write-back failed");
            }
        }
    }

    async fn flush_source(&self) {
        if let Err(e) = self.source.flush().await {
            tracing::warn!(error = %e, "metadata source flush failed");
        }
    }

    fn emit(
        &self,
        phase: BuildPhase,
        current: usize,
        total: usize,
        current_file: Option<&str>,
        errors: usize,
    ) {
        self.progress.report(&BuildProgress {
            phase,
            current,
            total,
            current_file: current_file.map(str::to_string),
            errors,
        });
    }
}

/// Modification time (Unix ms) and size of a file.
fn stat(path: &Path) -> std::io::Result<(i64, i64)> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    let mtime = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    Ok((mtime, metadata.len() as i64))
}
