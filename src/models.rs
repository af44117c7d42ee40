//! Core data models shared by the extractor, store, builder, and searcher.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a work, as assigned by the metadata store.
pub type WorkId = i64;

/// A work record as seen from the metadata store. Read-only input to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkInfo {
    pub id: WorkId,
    pub title: String,
    /// Kind of work ("poem", "story", ...). Not to be confused with [`doc_type`](Self::doc_type).
    #[serde(rename = "type", default)]
    pub work_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default)]
    pub status: String,
    /// File format, which selects the extraction strategy.
    pub doc_type: String,
    /// Path relative to the library base directory.
    pub path: String,
    /// Denormalized copy of the last extracted word count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<i64>,
}

/// File formats the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    Docx,
    Markdown,
    Text,
}

impl DocType {
    /// Guess the document type from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        ext.parse().ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Docx => "docx",
            DocType::Markdown => "md",
            DocType::Text => "txt",
        }
    }
}

impl FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "docx" => Ok(DocType::Docx),
            "md" | "markdown" => Ok(DocType::Markdown),
            "txt" | "text" => Ok(DocType::Text),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the document table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub id: WorkId,
    pub text_content: String,
    pub word_count: i64,
    /// Unix seconds.
    pub extracted_at: i64,
    /// Source file modification time, Unix milliseconds.
    pub source_mtime: i64,
    pub source_size: i64,
    pub headings: Option<Vec<String>>,
    pub dateline: Option<String>,
}

/// Raw extracted content for one document, without ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    pub id: WorkId,
    pub text_content: String,
    pub word_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dateline: Option<String>,
}

/// Metadata-based filter. Empty vectors mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkFilter {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub years: Vec<i32>,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub ids: Vec<WorkId>,
}

impl WorkFilter {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.years.is_empty()
            && self.statuses.is_empty()
            && self.ids.is_empty()
    }

    /// Whether a work satisfies the type/year/status constraints.
    /// The explicit id list is not consulted here.
    pub fn matches(&self, work: &WorkInfo) -> bool {
        (self.types.is_empty() || self.types.iter().any(|t| t == &work.work_type))
            && (self.years.is_empty() || work.year.is_some_and(|y| self.years.contains(&y)))
            && (self.statuses.is_empty() || self.statuses.iter().any(|s| s == &work.status))
    }
}
