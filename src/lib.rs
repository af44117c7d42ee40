//! # Works Index
//!
//! A local full-text index over a writer's library of works: stories, poems
//! and essays kept as `.docx`, Markdown, or plain-text files.
//!
//! The index holds only derived data (extracted text, word counts, source
//! file fingerprints). Titles, types, years, and statuses live in an external
//! metadata store reached through the [`metadata::MetadataSource`] trait; the
//! index can always be deleted and rebuilt from the files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ MetadataSource│──▶│ IndexBuilder │──▶│  IndexStore   │
//! │   (catalog)   │   │  + extract   │   │ SQLite + FTS5 │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!                                        ┌────▼─────┐
//!                                        │ Searcher │
//!                                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! works-index init                 # create the index
//! works-index build --full         # extract every work
//! works-index search "morning tide" --year 1998
//! works-index check                # what is stale or missing
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed index and extraction errors |
//! | [`models`] | Core data types |
//! | [`metadata`] | Metadata source trait and TOML catalog |
//! | [`extract`] | Text extraction from docx, Markdown, and text |
//! | [`store`] | SQLite/FTS5 index storage |
//! | [`builder`] | Full, incremental, and single-work indexing |
//! | [`progress`] | Build progress reporting |
//! | [`search`] | Ranked search and content retrieval |
//! | [`stats`] | Index statistics |

pub mod builder;
pub mod config;
pub mod error;
pub mod extract;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod search;
pub mod stats;
pub mod store;
