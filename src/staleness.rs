//! Per-file staleness tracking.
//!
//! The tracker remembers a fingerprint for every file that was indexed
//! successfully and answers whether a file must be processed again. It never
//! schedules work itself.

use crate::cache::{load_json, manifest_path, save_json};
use crate::error::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::UNIX_EPOCH;

/// Content and filesystem signature of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Hex SHA-256 of the file contents.
    pub content_hash: String,
    pub mtime_ms: u64,
    pub size_bytes: u64,
}

impl FileFingerprint {
    pub fn compute(content: &[u8], metadata: Option<&fs::Metadata>) -> Self {
        Self {
            content_hash: content_hash(content),
            mtime_ms: metadata.map(mtime_ms).unwrap_or(0),
            size_bytes: metadata
                .map(|m| m.len())
                .unwrap_or(content.len() as u64),
        }
    }

    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        let content = fs::read(path)?;
        Ok(Self::compute(&content, Some(&metadata)))
    }
}

pub fn content_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn mtime_ms(metadata: &fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TrackedFile {
    fingerprint: FileFingerprint,
    complete: bool,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct StalenessManifest {
    tool_version: String,
    files: BTreeMap<String, TrackedFile>,
}

/// Persisted map of file fingerprints.
pub struct StalenessTracker {
    manifest: Option<PathBuf>,
    files: RwLock<HashMap<PathBuf, TrackedFile>>,
    dirty: AtomicBool,
    recovered: bool,
}

impl StalenessTracker {
    /// Open the tracker persisted under `cache_dir`.
    ///
    /// An unreadable manifest, or one written by another tool version, is
    /// discarded: every file is then considered stale.
    pub fn open(cache_dir: &Path) -> Self {
        let path = manifest_path(cache_dir);
        let (files, recovered) = match load_json::<StalenessManifest>(&path) {
            Ok(Some(manifest)) if manifest.tool_version == env!("CARGO_PKG_VERSION") => {
                let files = manifest
                    .files
                    .into_iter()
                    .map(|(k, v)| (PathBuf::from(k), v))
                    .collect();
                (files, false)
            }
            Ok(Some(manifest)) => {
                tracing::info!(
                    "Manifest written by version {}, reindexing everything",
                    manifest.tool_version
                );
                (HashMap::new(), true)
            }
            Ok(None) => (HashMap::new(), false),
            Err(e) => {
                tracing::warn!(
                    "Staleness manifest {} unreadable ({}), reindexing everything",
                    path.display(),
                    e
                );
                (HashMap::new(), true)
            }
        };

        Self {
            manifest: Some(path),
            files: RwLock::new(files),
            dirty: AtomicBool::new(recovered),
            recovered,
        }
    }

    /// A tracker that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            manifest: None,
            files: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            recovered: false,
        }
    }

    /// Whether the persisted manifest had to be discarded on open.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    /// Whether `path` must be indexed again.
    ///
    /// Unchanged mtime and size short-circuit to `false`; otherwise the
    /// content hash decides. Any I/O error answers `true`.
    pub fn needs_reindex(&self, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path) else {
            return true;
        };
        {
            let files = self.files.read();
            match files.get(path) {
                None => return true,
                Some(tracked) if !tracked.complete => return true,
                Some(tracked) => {
                    if tracked.fingerprint.mtime_ms == mtime_ms(&metadata)
                        && tracked.fingerprint.size_bytes == metadata.len()
                    {
                        return false;
                    }
                }
            }
        }
        match fs::read(path) {
            Ok(content) => self.needs_reindex_with(path, &FileFingerprint::compute(&content, Some(&metadata))),
            Err(_) => true,
        }
    }

    /// Same decision against an already computed fingerprint.
    pub fn needs_reindex_with(&self, path: &Path, fingerprint: &FileFingerprint) -> bool {
        match self.files.read().get(path) {
            None => true,
            Some(tracked) => {
                !tracked.complete || tracked.fingerprint.content_hash != fingerprint.content_hash
            }
        }
    }

    /// Mark the start of an indexing attempt.
    pub fn begin(&self, path: &Path) {
        if let Some(tracked) = self.files.write().get_mut(path) {
            tracked.complete = false;
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Record a successful index of `path`.
    pub fn record(&self, path: &Path, fingerprint: FileFingerprint) {
        self.files.write().insert(
            path.to_path_buf(),
            TrackedFile {
                fingerprint,
                complete: true,
            },
        );
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Mark a failed attempt; the file stays stale.
    pub fn invalidate(&self, path: &Path) {
        self.begin(path);
    }

    pub fn forget(&self, path: &Path) {
        if self.files.write().remove(path).is_some() {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Forget every file under `dir`, returning the forgotten paths.
    pub fn forget_under(&self, dir: &Path) -> Vec<PathBuf> {
        let mut files = self.files.write();
        let removed: Vec<PathBuf> = files
            .keys()
            .filter(|p| p.starts_with(dir))
            .cloned()
            .collect();
        for path in &removed {
            files.remove(path);
        }
        if !removed.is_empty() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// Files with a complete fingerprint.
    pub fn tracked_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .files
            .read()
            .iter()
            .filter(|(_, t)| t.complete)
            .map(|(p, _)| p.clone())
            .collect();
        files.sort();
        files
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Persist the manifest if anything changed since the last flush.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.manifest else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let manifest = StalenessManifest {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            files: self
                .files
                .read()
                .iter()
                .map(|(k, v)| (k.to_string_lossy().to_string(), v.clone()))
                .collect(),
        };
        if let Err(e) = save_json(path, &manifest) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}
