//! The on-disk index.
//!
//! One SQLite file in WAL mode holds three things:
//!
//! | Object | Purpose |
//! |--------|---------|
//! | `documents` | one row per work: extracted text, word count, source mtime/size |
//! | `documents_fts` | FTS5 external-content index over `documents.text_content` |
//! | `meta` | key/value bookkeeping (schema version, last build, aggregates) |
//!
//! `documents_fts` is written only by the AFTER INSERT/UPDATE/DELETE triggers
//! on `documents`, inside the same statement's transaction. Nothing else may
//! write to it.
//!
//! [`IndexStore`] is constructed explicitly and passed by reference; there is
//! no process-wide handle.

use anyhow::Result;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::error::IndexError;
use crate::models::{DocumentContent, IndexedDocument, WorkId};

pub const SCHEMA_VERSION: i64 = 2;

pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_LAST_FULL_BUILD: &str = "last_full_build";
pub const META_LAST_INCREMENTAL: &str = "last_incremental_update";
pub const META_DOCUMENT_COUNT: &str = "document_count";
pub const META_WORD_COUNT: &str = "word_count";

/// Columns added after the first schema, with their types. Applied in order.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[("headings", "TEXT"), ("dateline", "TEXT")];

const COMPANION_SUFFIXES: &[&str] = &["-wal", "-shm"];

/// Handle to the index file.
pub struct IndexStore {
    path: PathBuf,
    tokenizer: String,
    pool: RwLock<Option<SqlitePool>>,
    writer: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>, tokenizer: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            tokenizer: tokenizer.into(),
            pool: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(&config.index.path, &config.index.tokenizer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the index, creating the file and schema if needed. No-op when already open.
    pub async fn open(&self) -> Result<()> {
        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let open_err = |reason: String| IndexError::Open {
            path: self.path.display().to_string(),
            reason,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| open_err(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| open_err(e.to_string()))?;

        if let Err(e) = create_schema(&pool, &self.tokenizer).await {
            pool.close().await;
            return Err(e);
        }

        tracing::debug!(path = %self.path.display(), "index opened");
        *guard = Some(pool);
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.pool.read().await.is_some()
    }

    /// Close the connection pool. No-op when already closed.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    /// Whether the index file is present on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Close, then remove the index file and its WAL/shared-memory companions.
    pub async fn delete(&self) -> Result<()> {
        self.close().await;
        remove_if_present(&self.path)?;
        for suffix in COMPANION_SUFFIXES {
            let mut companion = self.path.clone().into_os_string();
            companion.push(suffix);
            remove_if_present(Path::new(&companion))?;
        }
        tracing::info!(path = %self.path.display(), "index deleted");
        Ok(())
    }

    /// A handle to the open pool, or [`IndexError::NotOpen`].
    pub async fn pool(&self) -> Result<SqlitePool> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or_else(|| IndexError::NotOpen.into())
    }

    /// Serialize writers. Builders hold this for the duration of a run.
    pub async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Begin a transaction on the index.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool().await?.begin().await?)
    }

    /// Read a meta value. Missing keys read as the empty string.
    pub async fn get_meta(&self, key: &str) -> Result<String> {
        let pool = self.pool().await?;
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&pool)
            .await?;
        Ok(value.unwrap_or_default())
    }

    pub async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let pool = self.pool().await?;
        set_meta_on(&mut *pool.acquire().await?, key, value).await
    }

    /// Insert or replace one document row. The statement is atomic on its own.
    ///
    /// Takes the writer lock, so it waits for a running build to finish.
    pub async fn upsert(&self, doc: &IndexedDocument) -> Result<()> {
        let pool = self.pool().await?;
        let _writer = self.lock_writer().await;
        upsert_document(&mut *pool.acquire().await?, doc).await
    }

    /// Recorded source mtime (ms) for every indexed id.
    pub async fn indexed_mtimes(&self) -> Result<HashMap<WorkId, i64>> {
        let pool = self.pool().await?;
        let rows = sqlx::query("SELECT id, source_mtime FROM documents")
            .fetch_all(&pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("source_mtime")))
            .collect())
    }

    /// Every indexed id, ascending.
    pub async fn indexed_ids(&self) -> Result<Vec<WorkId>> {
        let pool = self.pool().await?;
        Ok(sqlx::query_scalar("SELECT id FROM documents ORDER BY id")
            .fetch_all(&pool)
            .await?)
    }

    pub async fn document_count(&self) -> Result<i64> {
        let pool = self.pool().await?;
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&pool)
            .await?)
    }

    pub async fn total_words(&self) -> Result<i64> {
        let pool = self.pool().await?;
        Ok(
            sqlx::query_scalar("SELECT COALESCE(SUM(word_count), 0) FROM documents")
                .fetch_one(&pool)
                .await?,
        )
    }

    /// Raw content for one id, or `None` when it is not indexed.
    pub async fn get_document(&self, id: WorkId) -> Result<Option<DocumentContent>> {
        let pool = self.pool().await?;
        let row = sqlx::query(
            "SELECT id, text_content, word_count, headings, dateline FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        Ok(row.map(|r| content_from_row(&r)))
    }

    /// Raw content for every indexed id among `ids`, in ascending id order.
    pub async fn get_documents(&self, ids: &[WorkId]) -> Result<Vec<DocumentContent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, text_content, word_count, headings, dateline FROM documents
            WHERE id IN (SELECT value FROM json_each(?))
            ORDER BY id
            "#,
        )
        .bind(serde_json::to_string(ids)?)
        .fetch_all(&pool)
        .await?;
        Ok(rows.iter().map(content_from_row).collect())
    }
}

/// Insert or replace a document row on the given connection or transaction.
pub async fn upsert_document(conn: &mut SqliteConnection, doc: &IndexedDocument) -> Result<()> {
    let headings = doc
        .headings
        .as_ref()
        .filter(|h| !h.is_empty())
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO documents (id, text_content, word_count, extracted_at, source_mtime,
                               source_size, headings, dateline)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            text_content = excluded.text_content,
            word_count = excluded.word_count,
            extracted_at = excluded.extracted_at,
            source_mtime = excluded.source_mtime,
            source_size = excluded.source_size,
            headings = excluded.headings,
            dateline = excluded.dateline
        "#,
    )
    .bind(doc.id)
    .bind(&doc.text_content)
    .bind(doc.word_count)
    .bind(doc.extracted_at)
    .bind(doc.source_mtime)
    .bind(doc.source_size)
    .bind(headings)
    .bind(&doc.dateline)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Remove every document row. The delete trigger empties the FTS index with it.
pub async fn clear_documents(conn: &mut SqliteConnection) -> Result<u64> {
    let done = sqlx::query("DELETE FROM documents")
        .execute(&mut *conn)
        .await?;
    Ok(done.rows_affected())
}

pub async fn set_meta_on(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn content_from_row(row: &sqlx::sqlite::SqliteRow) -> DocumentContent {
    let headings: Option<String> = row.get("headings");
    DocumentContent {
        id: row.get("id"),
        text_content: row.get("text_content"),
        word_count: row.get("word_count"),
        headings: headings.and_then(|h| serde_json::from_str(&h).ok()),
        dateline: row.get("dateline"),
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn create_schema(pool: &SqlitePool, tokenizer: &str) -> Result<()> {
    // Base shape; later columns arrive through ADDITIVE_COLUMNS
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY,
            text_content TEXT NOT NULL,
            word_count INTEGER NOT NULL DEFAULT 0,
            extracted_at INTEGER NOT NULL,
            source_mtime INTEGER NOT NULL,
            source_size INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='documents_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(&format!(
            r#"
            CREATE VIRTUAL TABLE documents_fts USING fts5(
                text_content,
                content='documents',
                content_rowid='id',
                tokenize='{}'
            )
            "#,
            tokenizer.trim()
        ))
        .execute(pool)
        .await?;
        // Pick up rows written before the index existed
        sqlx::query("INSERT INTO documents_fts(documents_fts) VALUES ('rebuild')")
            .execute(pool)
            .await?;
        tracing::debug!(tokenizer, "created documents_fts");
    }

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
            INSERT INTO documents_fts(rowid, text_content) VALUES (new.id, new.text_content);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, text_content)
            VALUES ('delete', old.id, old.text_content);
        END
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
            INSERT INTO documents_fts(documents_fts, rowid, text_content)
            VALUES ('delete', old.id, old.text_content);
            INSERT INTO documents_fts(rowid, text_content) VALUES (new.id, new.text_content);
        END
        "#,
    )
    .execute(pool)
    .await?;

    migrate_columns(pool).await?;

    let mut conn = pool.acquire().await?;
    set_meta_on(&mut conn, META_SCHEMA_VERSION, &SCHEMA_VERSION.to_string()).await?;

    Ok(())
}

/// Add any optional column the table is missing. Existing rows keep their data.
async fn migrate_columns(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query("PRAGMA table_info(documents)")
        .fetch_all(pool)
        .await?;
    let present: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();

    for (column, ty) in ADDITIVE_COLUMNS {
        if present.iter().any(|c| c == column) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE documents ADD COLUMN {} {}", column, ty))
            .execute(pool)
            .await?;
        tracing::debug!(column, "added documents column");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TOKENIZER: &str = "porter unicode61 remove_diacritics 2";

    fn doc(id: WorkId, text: &str) -> IndexedDocument {
        IndexedDocument {
            id,
            text_content: text.to_string(),
            word_count: crate::extract::count_words(text),
            extracted_at: 1,
            source_mtime: 1_000,
            source_size: text.len() as i64,
            headings: None,
            dateline: None,
        }
    }

    async fn fts_hits(store: &IndexStore, term: &str) -> i64 {
        let pool = store.pool().await.unwrap();
        sqlx::query_scalar("SELECT COUNT(*) FROM documents_fts WHERE documents_fts MATCH ?")
            .bind(term)
            .fetch_one(&pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_is_idempotent_and_meta_defaults_to_empty() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("nested/dir/index.sqlite"), TOKENIZER);
        assert!(!store.exists());
        store.open().await.unwrap();
        store.open().await.unwrap();
        assert!(store.exists());

        assert_eq!(store.get_meta("nope").await.unwrap(), "");
        assert_eq!(store.get_meta(META_SCHEMA_VERSION).await.unwrap(), "2");
        store.set_meta("k", "v1").await.unwrap();
        store.set_meta("k", "v2").await.unwrap();
        assert_eq!(store.get_meta("k").await.unwrap(), "v2");
    }

    #[tokio::test]
    async fn closed_store_reports_not_open() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), TOKENIZER);
        let err = store.get_meta("k").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::NotOpen)
        ));
        assert!(store.set_meta("k", "v").await.is_err());
    }

    #[tokio::test]
    async fn triggers_keep_fts_in_step_with_documents() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), TOKENIZER);
        store.open().await.unwrap();

        store.upsert(&doc(1, "harbor lights at dusk")).await.unwrap();
        assert_eq!(fts_hits(&store, "harbor").await, 1);

        store.upsert(&doc(1, "meadow grass at noon")).await.unwrap();
        assert_eq!(fts_hits(&store, "harbor").await, 0);
        assert_eq!(fts_hits(&store, "meadow").await, 1);
        assert_eq!(store.document_count().await.unwrap(), 1);

        let mut tx = store.begin().await.unwrap();
        clear_documents(&mut tx).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(fts_hits(&store, "meadow").await, 0);
        assert_eq!(store.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rolled_back_clear_leaves_rows() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), TOKENIZER);
        store.open().await.unwrap();
        store.upsert(&doc(1, "river stones")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        clear_documents(&mut tx).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.document_count().await.unwrap(), 1);
        assert_eq!(fts_hits(&store, "river").await, 1);
    }

    #[tokio::test]
    async fn old_schema_gains_columns_without_losing_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        {
            let options = SqliteConnectOptions::new()
                .filename(&path)
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await
                .unwrap();
            sqlx::query(
                "CREATE TABLE documents (id INTEGER PRIMARY KEY, text_content TEXT NOT NULL, word_count INTEGER NOT NULL DEFAULT 0, extracted_at INTEGER NOT NULL, source_mtime INTEGER NOT NULL, source_size INTEGER NOT NULL DEFAULT 0)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO documents (id, text_content, word_count, extracted_at, source_mtime) VALUES (5, 'old words', 2, 1, 1)",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let store = IndexStore::new(&path, TOKENIZER);
        store.open().await.unwrap();
        let content = store.get_document(5).await.unwrap().unwrap();
        assert_eq!(content.text_content, "old words");
        assert_eq!(content.dateline, None);
        assert_eq!(fts_hits(&store, "old").await, 1);

        let mut with_extras = doc(6, "new words");
        with_extras.headings = Some(vec!["One".into()]);
        with_extras.dateline = Some("Oslo, 2003".into());
        store.upsert(&with_extras).await.unwrap();
        let content = store.get_document(6).await.unwrap().unwrap();
        assert_eq!(content.headings, Some(vec!["One".to_string()]));
        assert_eq!(content.dateline.as_deref(), Some("Oslo, 2003"));
    }

    #[tokio::test]
    async fn delete_closes_and_removes_companions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.sqlite");
        let store = IndexStore::new(&path, TOKENIZER);
        store.open().await.unwrap();
        store.upsert(&doc(1, "text")).await.unwrap();

        store.delete().await.unwrap();
        assert!(!store.is_open().await);
        assert!(!path.exists());
        assert!(!tmp.path().join("index.sqlite-wal").exists());
        assert!(!tmp.path().join("index.sqlite-shm").exists());

        // Deleting again is harmless
        store.delete().await.unwrap();
    }

    #[tokio::test]
    async fn get_documents_skips_unknown_ids() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), TOKENIZER);
        store.open().await.unwrap();
        store.upsert(&doc(1, "one")).await.unwrap();
        store.upsert(&doc(3, "three")).await.unwrap();

        assert!(store.get_documents(&[]).await.unwrap().is_empty());
        let got = store.get_documents(&[3, 2, 1]).await.unwrap();
        let ids: Vec<WorkId> = got.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(store.get_document(2).await.unwrap().is_none());
        assert_eq!(store.indexed_ids().await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn get_documents_accepts_more_ids_than_sqlite_variables() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), TOKENIZER);
        store.open().await.unwrap();
        store.upsert(&doc(7, "seven")).await.unwrap();
        store.upsert(&doc(39_999, "last")).await.unwrap();

        let ids: Vec<WorkId> = (1..=40_000).collect();
        let got = store.get_documents(&ids).await.unwrap();
        let found: Vec<WorkId> = got.iter().map(|d| d.id).collect();
        assert_eq!(found, vec![7, 39_999]);
    }

    #[tokio::test]
    async fn upsert_waits_for_the_writer_lock() {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), TOKENIZER);
        store.open().await.unwrap();

        let guard = store.lock_writer().await;
        let blocked =
            tokio::time::timeout(Duration::from_millis(200), store.upsert(&doc(1, "held"))).await;
        assert!(blocked.is_err());
        assert_eq!(store.document_count().await.unwrap(), 0);

        drop(guard);
        store.upsert(&doc(1, "free")).await.unwrap();
        assert_eq!(store.document_count().await.unwrap(), 1);
    }
}
