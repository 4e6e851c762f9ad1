//! Source file enumeration for watched roots.
//!
//! Walks a root with the `ignore` crate so .gitignore files apply, then
//! drops anything the compiled [`PathFilter`] rejects or that is larger
//! than the configured limit.

use crate::cache::CACHE_DIR;
use crate::config::IndexConfig;
use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{DirEntry, WalkBuilder};
use std::path::{Path, PathBuf};

/// Paths nobody wants in a code index: VCS metadata, dependency trees,
/// build output, lockfiles, declaration files and binary assets.
const BUILTIN_EXCLUDES: &[&str] = &[
    "**/.git/**",
    ".camille/**",
    "**/.camille/**",
    "**/target/**",
    "**/node_modules/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/coverage/**",
    "**/vendor/**",
    "**/.venv/**",
    "**/.next/**",
    "**/package-lock.json",
    "**/yarn.lock",
    "**/pnpm-lock.yaml",
    "**/Cargo.lock",
    "**/*.min.js",
    "**/*.min.css",
    "**/*.map",
    "**/*.d.ts",
    "**/*.{png,jpg,jpeg,gif,webp,pdf}",
    "**/*.{zip,gz,tar,wasm}",
    "**/*.{so,dylib,dll}",
];

/// Walks watched roots and yields the files worth parsing.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    filter: PathFilter,
    walk_hidden: bool,
    size_limit: u64,
}

impl Default for FileDiscovery {
    fn default() -> Self {
        // The builtin globs are static and always compile.
        Self::from_config(&IndexConfig::default()).unwrap_or_else(|_| Self {
            filter: PathFilter::empty(),
            walk_hidden: false,
            size_limit: IndexConfig::default().max_file_size,
        })
    }
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile the include/exclude globs from the indexer configuration.
    /// Fails on a malformed user pattern.
    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        let filter = PathFilter::compile(
            BUILTIN_EXCLUDES.iter().copied(),
            config.exclude.iter().map(String::as_str),
            config.include.iter().map(String::as_str),
        )?;
        Ok(Self {
            filter,
            walk_hidden: config.include_hidden,
            size_limit: config.max_file_size,
        })
    }

    /// The compiled filter, shared with the watcher for single-path checks.
    pub fn path_filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Every indexable file under `root`, in path order.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let mut walker = WalkBuilder::new(root);
        walker
            .hidden(!self.walk_hidden)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false);

        let mut files: Vec<PathBuf> = walker
            .build()
            .flatten()
            .filter(|entry| self.accepts(root, entry))
            .map(DirEntry::into_path)
            .collect();
        files.sort();
        Ok(files)
    }

    fn accepts(&self, root: &Path, entry: &DirEntry) -> bool {
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            return false;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if self.filter.is_excluded(relative) {
            return false;
        }
        // Unreadable metadata counts as too large.
        entry
            .metadata()
            .is_ok_and(|meta| meta.len() <= self.size_limit)
    }
}

/// Compiled exclude globs plus the include globs that override them.
#[derive(Debug, Clone)]
pub struct PathFilter {
    excludes: GlobSet,
    overrides: GlobSet,
}

impl PathFilter {
    fn compile<'a>(
        builtin: impl IntoIterator<Item = &'a str>,
        user: impl IntoIterator<Item = &'a str>,
        include: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        Ok(Self {
            excludes: glob_set(builtin.into_iter().chain(user))?,
            overrides: glob_set(include)?,
        })
    }

    fn empty() -> Self {
        Self {
            excludes: GlobSet::empty(),
            overrides: GlobSet::empty(),
        }
    }

    /// `path` is relative to the watched root.
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.is_match(path) && !self.overrides.is_match(path)
    }
}

fn glob_set<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut set = GlobSetBuilder::new();
    for pattern in patterns {
        set.add(Glob::new(pattern)?);
    }
    Ok(set.build()?)
}

/// True when `path` is the cache directory or inside it.
pub fn is_cache_path(path: &Path) -> bool {
    path.components().any(|c| c.as_os_str() == CACHE_DIR)
}
