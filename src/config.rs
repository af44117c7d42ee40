use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    pub library: LibraryConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub path: PathBuf,
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

fn default_tokenizer() -> String {
    "porter unicode61 remove_diacritics 2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub base_dir: PathBuf,
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.docx".to_string(),
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: i64,
    #[serde(default = "default_snippet_tokens")]
    pub snippet_tokens: i64,
    #[serde(default = "default_highlight_open")]
    pub highlight_open: String,
    #[serde(default = "default_highlight_close")]
    pub highlight_close: String,
    #[serde(default = "default_ellipsis")]
    pub ellipsis: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            snippet_tokens: default_snippet_tokens(),
            highlight_open: default_highlight_open(),
            highlight_close: default_highlight_close(),
            ellipsis: default_ellipsis(),
        }
    }
}

fn default_limit() -> i64 {
    50
}
fn default_snippet_tokens() -> i64 {
    24
}
fn default_highlight_open() -> String {
    "<mark>".to_string()
}
fn default_highlight_close() -> String {
    "</mark>".to_string()
}
fn default_ellipsis() -> String {
    "…".to_string()
}

impl Config {
    /// Configuration rooted at `dir`: index under `dir/data`, works under `dir/works`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            index: IndexConfig {
                path: dir.join("data").join("works-index.sqlite"),
                tokenizer: default_tokenizer(),
            },
            library: LibraryConfig {
                base_dir: dir.join("works"),
                catalog: None,
                include_globs: default_include_globs(),
            },
            search: SearchConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Relative paths are resolved against the config file's directory
    if let Some(dir) = path.parent() {
        config.index.path = resolve(dir, &config.index.path);
        config.library.base_dir = resolve(dir, &config.library.base_dir);
        config.library.catalog = config.library.catalog.map(|c| resolve(dir, &c));
    }

    validate(&config)?;
    Ok(config)
}

fn resolve(dir: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        dir.join(p)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.search.default_limit < 1 {
        anyhow::bail!("search.default_limit must be >= 1");
    }

    if !(1..=64).contains(&config.search.snippet_tokens) {
        anyhow::bail!("search.snippet_tokens must be in [1, 64]");
    }

    let tokenizer = config.index.tokenizer.trim();
    if tokenizer.is_empty() {
        anyhow::bail!("index.tokenizer must not be empty");
    }
    // Interpolated into CREATE VIRTUAL TABLE, so keep it to a safe alphabet
    if !tokenizer
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_')
    {
        anyhow::bail!(
            "index.tokenizer contains unsupported characters: '{}'",
            tokenizer
        );
    }

    if config.library.include_globs.is_empty() {
        anyhow::bail!("library.include_globs must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("works-index.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults_and_resolves_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[index]
path = "data/index.sqlite"

[library]
base_dir = "works"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.index.path, tmp.path().join("data/index.sqlite"));
        assert_eq!(cfg.library.base_dir, tmp.path().join("works"));
        assert_eq!(cfg.search.default_limit, 50);
        assert_eq!(cfg.search.highlight_open, "<mark>");
        assert!(cfg.index.tokenizer.starts_with("porter"));
    }

    #[test]
    fn rejects_tokenizer_with_sql() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[index]
path = "i.sqlite"
tokenizer = "unicode61); DROP TABLE documents; --"

[library]
base_dir = "works"
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("tokenizer"));
    }

    #[test]
    fn rejects_zero_limit() {
        let mut cfg = Config::in_dir(Path::new("/tmp/x"));
        cfg.search.default_limit = 0;
        assert!(validate(&cfg).is_err());
    }
}
