//! Per-generation buffer of pending edges, keyed by source file.
//!
//! Only the coordinator touches the buffer, so it needs no locking. Entries
//! are kept in path order, which makes every resolution pass visit files in
//! the same order.

use crate::types::{ExportDecl, ImportDecl, PendingEdge};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What one file contributed to the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntry {
    pub pending_edges: Vec<PendingEdge>,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportDecl>,
    /// Pending edges were dropped after a pass; the file's previously
    /// resolved edges stay authoritative until it is re-ingested.
    pub edges_discarded: bool,
}

#[derive(Debug, Default)]
pub struct PendingEdgeBuffer {
    files: BTreeMap<PathBuf, FileEntry>,
    dirty: bool,
}

impl PendingEdgeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything `file` contributed.
    pub fn replace(
        &mut self,
        file: PathBuf,
        pending_edges: Vec<PendingEdge>,
        imports: Vec<ImportDecl>,
        exports: Vec<ExportDecl>,
    ) {
        self.files.insert(
            file,
            FileEntry {
                pending_edges,
                imports,
                exports,
                edges_discarded: false,
            },
        );
        self.dirty = true;
    }

    pub fn remove_file(&mut self, file: &Path) -> bool {
        let removed = self.files.remove(file).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Drop entries for files under `dir` and pending edges from other files
    /// that explicitly target a file under it. Returns the removed files.
    pub fn remove_under(&mut self, dir: &Path) -> Vec<PathBuf> {
        let removed: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|f| f.starts_with(dir))
            .cloned()
            .collect();
        for file in &removed {
            self.files.remove(file);
        }

        let mut purged = 0;
        for entry in self.files.values_mut() {
            let before = entry.pending_edges.len();
            entry
                .pending_edges
                .retain(|e| !e.target_file.as_ref().is_some_and(|t| t.starts_with(dir)));
            purged += before - entry.pending_edges.len();
        }

        if !removed.is_empty() || purged > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn get(&self, file: &Path) -> Option<&FileEntry> {
        self.files.get(file)
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.files.contains_key(file)
    }

    /// Entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&PathBuf, &FileEntry)> {
        self.files.iter()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn pending_count(&self) -> usize {
        self.files.values().map(|e| e.pending_edges.len()).sum()
    }

    /// Something changed since the last resolution pass.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Drop pending edges but keep import/export declarations, which later
    /// passes still need to build import maps.
    pub fn discard_pending_edges(&mut self) {
        for entry in self.files.values_mut() {
            entry.pending_edges.clear();
            entry.edges_discarded = true;
        }
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.dirty = true;
    }
}
