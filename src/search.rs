//! Ranked full-text search over the index.
//!
//! Free text becomes an FTS5 query of quoted prefix terms, ANDed together.
//! Ranking uses FTS5's `bm25()`, where **lower is more relevant**; results
//! are sorted ascending by that score and `rank` is reported as-is.
//! Snippets come from FTS5's `snippet()` with configurable highlight and
//! ellipsis markers.
//!
//! Metadata filters are resolved to a set of ids through the
//! [`MetadataSource`] before the text query runs; titles and the like are
//! fetched for the returned page only, in one batch.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::HashMap;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::metadata::MetadataSource;
use crate::models::{DocumentContent, WorkFilter, WorkId, WorkInfo};
use crate::store::IndexStore;

/// A search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub filters: WorkFilter,
    /// Defaults to `search.default_limit`.
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
    /// Include the full extracted text in each result.
    #[serde(default)]
    pub include_content: bool,
}

impl Query {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// One ranked hit, enriched with metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: WorkId,
    pub title: String,
    #[serde(rename = "type")]
    pub work_type: String,
    pub year: Option<i32>,
    pub status: String,
    pub snippet: String,
    /// BM25 score; lower is more relevant.
    pub rank: f64,
    pub word_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Matches before `limit`/`offset` are applied.
    pub total_count: i64,
    pub query_time_ms: f64,
}

impl SearchResponse {
    fn empty(started: Instant) -> Self {
        Self {
            query_time_ms: elapsed_ms(started),
            ..Default::default()
        }
    }
}

/// Highlight markup for snippets.
#[derive(Debug, Clone)]
pub struct SnippetStyle {
    pub open: String,
    pub close: String,
    pub ellipsis: String,
    /// Maximum tokens per snippet (FTS5 allows 1..=64).
    pub max_tokens: i64,
}

impl From<&SearchConfig> for SnippetStyle {
    fn from(cfg: &SearchConfig) -> Self {
        Self {
            open: cfg.highlight_open.clone(),
            close: cfg.highlight_close.clone(),
            ellipsis: cfg.ellipsis.clone(),
            max_tokens: cfg.snippet_tokens,
        }
    }
}

pub struct Searcher<'a> {
    store: &'a IndexStore,
    source: &'a dyn MetadataSource,
    snippet: SnippetStyle,
    default_limit: i64,
}

impl<'a> Searcher<'a> {
    pub fn new(
        store: &'a IndexStore,
        source: &'a dyn MetadataSource,
        config: &SearchConfig,
    ) -> Self {
        Self {
            store,
            source,
            snippet: SnippetStyle::from(config),
            default_limit: config.default_limit,
        }
    }

    pub async fn search(&self, query: &Query) -> Result<SearchResponse> {
        let started = Instant::now();

        let Some(match_expr) = build_match_query(&query.text) else {
            return Ok(SearchResponse::empty(started));
        };

        let scope = if query.filters.is_empty() {
            None
        } else {
            let ids = self.resolve_filter(&query.filters).await?;
            if ids.is_empty() {
                // Never fall back to an unconstrained query
                return Ok(SearchResponse::empty(started));
            }
            // One JSON parameter regardless of how many ids the filter resolved to
            Some(serde_json::to_string(&ids)?)
        };

        let pool = self.store.pool().await?;
        let limit = query.limit.unwrap_or(self.default_limit).max(0);
        let offset = query.offset.unwrap_or(0).max(0);

        let mut count_qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*)");
        push_match_clause(&mut count_qb, &match_expr, scope.as_deref());
        let total_count: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&pool)
            .await?;

        if total_count == 0 || limit == 0 {
            return Ok(SearchResponse {
                results: Vec::new(),
                total_count,
                query_time_ms: elapsed_ms(started),
            });
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT d.id AS id, d.word_count AS word_count, bm25(documents_fts) AS score, snippet(documents_fts, 0, ",
        );
        qb.push_bind(self.snippet.open.clone());
        qb.push(", ");
        qb.push_bind(self.snippet.close.clone());
        qb.push(", ");
        qb.push_bind(self.snippet.ellipsis.clone());
        qb.push(", ");
        qb.push_bind(self.snippet.max_tokens);
        qb.push(") AS snippet");
        if query.include_content {
            qb.push(", d.text_content AS text_content");
        }
        push_match_clause(&mut qb, &match_expr, scope.as_deref());
        qb.push(" ORDER BY score ASC, d.id ASC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb.build().fetch_all(&pool).await?;

        let page_ids: Vec<WorkId> = rows.iter().map(|r| r.get::<WorkId, _>("id")).collect();
        let works: HashMap<WorkId, WorkInfo> = self
            .source
            .works_by_ids(&page_ids)
            .await?
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        let results = rows
            .iter()
            .map(|row| {
                let id: WorkId = row.get("id");
                let work = works.get(&id);
                SearchResult {
                    id,
                    title: work.map(|w| w.title.clone()).unwrap_or_default(),
                    work_type: work.map(|w| w.work_type.clone()).unwrap_or_default(),
                    year: work.and_then(|w| w.year),
                    status: work.map(|w| w.status.clone()).unwrap_or_default(),
                    snippet: row.get("snippet"),
                    rank: row.get("score"),
                    word_count: row.get("word_count"),
                    text_content: query
                        .include_content
                        .then(|| row.get::<String, _>("text_content")),
                }
            })
            .collect();

        Ok(SearchResponse {
            results,
            total_count,
            query_time_ms: elapsed_ms(started),
        })
    }

    /// Raw extracted content for one work, or `None` if it is not indexed.
    pub async fn get_document_content(&self, id: WorkId) -> Result<Option<DocumentContent>> {
        self.store.get_document(id).await
    }

    /// Raw extracted content for the indexed subset of `ids`.
    pub async fn batch_get_content(&self, ids: &[WorkId]) -> Result<Vec<DocumentContent>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.store.get_documents(ids).await
    }

    async fn resolve_filter(&self, filters: &WorkFilter) -> Result<Vec<WorkId>> {
        if !filters.ids.is_empty() {
            return Ok(filters.ids.clone());
        }
        self.source.filter_work_ids(filters).await
    }
}

/// Turn free text into an FTS5 query: each whitespace-separated token becomes
/// a quoted prefix term, and terms are implicitly ANDed.
///
/// Returns `None` when nothing searchable remains.
pub fn build_match_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .map(|t| format!("\"{}\"*", t.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

/// `scope` is a JSON array of ids, expanded with `json_each`.
fn push_match_clause(qb: &mut QueryBuilder<'_, Sqlite>, match_expr: &str, scope: Option<&str>) {
    qb.push(
        " FROM documents_fts JOIN documents d ON d.id = documents_fts.rowid WHERE documents_fts MATCH ",
    );
    qb.push_bind(match_expr.to_string());
    if let Some(ids_json) = scope {
        qb.push(" AND d.id IN (SELECT value FROM json_each(");
        qb.push_bind(ids_json.to_string());
        qb.push("))");
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
