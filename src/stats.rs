//! Index statistics and health overview.
//!
//! A quick summary of what is indexed: document and word counts, file size,
//! schema version, and when the index was last built or updated.

use anyhow::Result;
use serde::Serialize;

use crate::store::{self, IndexStore};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub exists: bool,
    pub path: String,
    pub size_bytes: u64,
    pub document_count: i64,
    pub word_count: i64,
    pub schema_version: String,
    pub last_full_build: Option<String>,
    pub last_incremental_update: Option<String>,
}

/// Gather statistics. A missing index yields `exists: false` and zero counts
/// without creating the file.
pub async fn index_stats(store: &IndexStore) -> Result<IndexStats> {
    let mut stats = IndexStats {
        path: store.path().display().to_string(),
        ..Default::default()
    };
    if !store.exists() {
        return Ok(stats);
    }

    store.open().await?;
    stats.exists = true;
    stats.size_bytes = std::fs::metadata(store.path())
        .map(|m| m.len())
        .unwrap_or(0);
    stats.document_count = store.document_count().await?;
    stats.word_count = store.total_words().await?;
    stats.schema_version = store.get_meta(store::META_SCHEMA_VERSION).await?;
    stats.last_full_build = non_empty(store.get_meta(store::META_LAST_FULL_BUILD).await?);
    stats.last_incremental_update =
        non_empty(store.get_meta(store::META_LAST_INCREMENTAL).await?);
    Ok(stats)
}

/// Print the stats summary to stdout.
pub fn print_stats(stats: &IndexStats) {
    println!("Works Index Stats");
    println!("=================");
    println!();
    println!("  Index:       {}", stats.path);
    if !stats.exists {
        println!("  Status:      not built");
        println!();
        return;
    }
    println!("  Size:        {}", format_bytes(stats.size_bytes));
    println!("  Schema:      v{}", stats.schema_version);
    println!();
    println!("  Documents:   {}", stats.document_count);
    println!("  Words:       {}", stats.word_count);
    println!(
        "  Full build:  {}",
        stats
            .last_full_build
            .as_deref()
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Last update: {}",
        stats
            .last_incremental_update
            .as_deref()
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp as a relative time string (e.g. "3 hours ago").
fn format_relative(rfc3339: &str) -> String {
    let Ok(then) = chrono::DateTime::parse_from_rfc3339(rfc3339) else {
        return rfc3339.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - then.timestamp();

    if delta < 0 {
        then.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        then.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_time_falls_back_on_garbage() {
        assert_eq!(format_relative("yesterday"), "yesterday");
        let now = chrono::Utc::now().to_rfc3339();
        assert_eq!(format_relative(&now), "just now");
    }

    #[tokio::test]
    async fn missing_index_is_not_created() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = IndexStore::new(tmp.path().join("index.sqlite"), "unicode61");
        let stats = index_stats(&store).await.unwrap();
        assert!(!stats.exists);
        assert_eq!(stats.document_count, 0);
        assert!(!store.exists());
    }
}
