//! Indexer configuration.
//!
//! Defaults are usable as-is. A project may override them with
//! `<root>/.camille/config.json`, and the environment overrides both.

use crate::cache::CACHE_DIR;
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.json";

/// Configuration for the indexing pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Worker count; `None` sizes the pool from available parallelism.
    pub workers: Option<usize>,
    /// Discovery skips files above this size; a watcher event for one fails its task.
    pub max_file_size: u64,
    /// Keep pending edges after a resolution pass so it can be replayed.
    pub retain_pending_edges: bool,
    /// Cache directory name, relative to the primary root.
    pub cache_dir: String,
    /// Globs that override the default excludes.
    pub include: Vec<String>,
    /// Additional exclude globs.
    pub exclude: Vec<String>,
    pub include_hidden: bool,
    pub watch_debounce_ms: u64,
    pub search: SearchConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_file_size: 2 * 1024 * 1024,
            retain_pending_edges: true,
            cache_dir: CACHE_DIR.to_string(),
            include: Vec::new(),
            exclude: Vec::new(),
            include_hidden: false,
            watch_debounce_ms: 200,
            search: SearchConfig::default(),
        }
    }
}

/// Search tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Nearest neighbours requested from the vector store per query.
    pub semantic_candidates: usize,
    /// Shortest bare token treated as a possible symbol name.
    pub min_token_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            semantic_candidates: 50,
            min_token_len: 3,
        }
    }
}

impl IndexConfig {
    /// Load `<root>/<cache_dir>/config.json` if present, then apply
    /// environment overrides.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CACHE_DIR).join(CONFIG_FILE);
        let mut config = if path.exists() {
            let data = fs::read(&path).map_err(|e| IndexError::io(&path, e))?;
            serde_json::from_slice(&data).map_err(|e| IndexError::Config {
                path: path.clone(),
                message: e.to_string(),
            })?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CAMILLE_*` overrides using the given lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(workers) = lookup("CAMILLE_WORKERS") {
            self.workers = Some(parse_env("CAMILLE_WORKERS", &workers)?);
        }
        if let Some(size) = lookup("CAMILLE_MAX_FILE_SIZE") {
            self.max_file_size = parse_env("CAMILLE_MAX_FILE_SIZE", &size)?;
        }
        if let Some(retain) = lookup("CAMILLE_RETAIN_PENDING") {
            self.retain_pending_edges = parse_env("CAMILLE_RETAIN_PENDING", &retain)?;
        }
        Ok(())
    }

    /// Number of ingestion workers: `clamp(cpus - 2, 4, 16)` unless set.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4);
                cpus.saturating_sub(2).clamp(4, 16)
            }
        }
    }

    pub fn cache_path(&self, root: &Path) -> PathBuf {
        root.join(&self.cache_dir)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| IndexError::Config {
        path: PathBuf::from(format!("${key}")),
        message: format!("cannot parse {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_worker_count_is_clamped() {
        let config = IndexConfig::default();
        let n = config.worker_count();
        assert!((4..=16).contains(&n));

        let pinned = IndexConfig {
            workers: Some(0),
            ..Default::default()
        };
        assert_eq!(pinned.worker_count(), 1);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CAMILLE_WORKERS", "3"),
            ("CAMILLE_RETAIN_PENDING", "false"),
        ]
        .into_iter()
        .collect();
        let mut config = IndexConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.workers, Some(3));
        assert!(!config.retain_pending_edges);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = IndexConfig::default();
        let err = config
            .apply_env(|k| (k == "CAMILLE_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, IndexError::Config { .. }));
    }

    #[test]
    fn test_load_partial_file() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join(CACHE_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(CONFIG_FILE),
            r#"{ "max_file_size": 1024, "search": { "default_limit": 5 } }"#,
        )
        .unwrap();

        let config = IndexConfig::load(temp.path()).unwrap();
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.search.semantic_candidates, 50);
        assert!(config.retain_pending_edges);
    }
}
