//! Typed errors for the index and the content extractor.
//!
//! Most library functions return [`anyhow::Result`]; these enums exist so
//! callers can tell an unavailable index apart from a single bad document.

use thiserror::Error;

/// The index cannot serve the request at all.
#[derive(Debug, Error)]
pub enum IndexError {
    /// An operation was attempted before [`IndexStore::open`](crate::store::IndexStore::open).
    #[error("index is not open")]
    NotOpen,

    /// The index directory or database could not be created or opened.
    #[error("failed to open index at {path}: {reason}")]
    Open { path: String, reason: String },
}

/// A single document could not be turned into text.
///
/// The builder records these per document and keeps going.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported document type: {0}")]
    UnsupportedType(String),

    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a valid document archive: {0}")]
    Archive(String),

    #[error("archive has no {0} part")]
    MissingPart(String),

    #[error("malformed document XML: {0}")]
    Xml(String),
}
