//! Second pass of indexing: turn buffered pending edges into graph edges.
//!
//! Each pass snapshots every node in the graph, rebuilds import maps from
//! the buffer, and resolves each pending edge by the first step that yields
//! exactly one target:
//!
//! 1. the target file is known (explicit, or from the import specifier)
//! 2. the name (or its receiver) is bound by an import of the source file;
//!    an imported bare name that its file does not declare stops here
//! 3. the name is declared in the source file
//! 4. the name is unique across the graph
//!
//! Receiver hints narrow candidates at every step. References that stay
//! plural are counted as ambiguous and never written.

pub mod import_map;
pub mod symbols;

use crate::buffer::PendingEdgeBuffer;
use crate::error::Result;
use crate::store::{GraphStore, NodeQuery};
use crate::types::{
    EdgeKey, EdgeMetadata, NodeId, NodeKind, PendingEdge, ResolutionStats, ResolutionStrategy,
    ResolvedEdge,
};
use import_map::{Binding, ImportMaps};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use symbols::{Symbol, SymbolTable, narrow_by_hint};
use tracing::{debug, info};

/// Result of resolving one pending edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeOutcome {
    Resolved(NodeId, ResolutionStrategy),
    Unresolved,
    /// Number of equally plausible candidates left.
    Ambiguous(usize),
}

/// Everything a pass resolved, before it is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Unique by key, in buffer order.
    pub edges: Vec<ResolvedEdge>,
    /// Keys each source file resolved to.
    pub by_file: BTreeMap<PathBuf, BTreeSet<EdgeKey>>,
    pub stats: ResolutionStats,
    pub by_strategy: BTreeMap<ResolutionStrategy, usize>,
}

/// Summary of a completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub generation: u64,
    pub stats: ResolutionStats,
    pub by_strategy: BTreeMap<ResolutionStrategy, usize>,
    /// Edges that did not exist before this pass.
    pub edges_written: usize,
    /// Edges from an earlier pass that no longer resolve.
    pub edges_removed: usize,
    pub duration_ms: u64,
}

fn single(candidates: Vec<&Symbol>) -> Option<NodeId> {
    match candidates.as_slice() {
        [only] => Some(only.id.clone()),
        _ => None,
    }
}

fn via_exact_file(
    edge: &PendingEdge,
    source_file: &Path,
    symbols: &SymbolTable,
    maps: &ImportMaps,
) -> Option<NodeId> {
    let file = edge.target_file.clone().or_else(|| {
        edge.import_source
            .as_deref()
            .and_then(|s| maps.resolve_specifier(source_file, s))
    })?;
    if edge.target_kind == NodeKind::Module {
        return symbols.module_of(&file).map(|m| m.id.clone());
    }
    single(narrow_by_hint(
        symbols.in_file(&file, &edge.target_name, edge.target_kind),
        edge.receiver_hint.as_deref(),
    ))
}

fn via_import_map(
    edge: &PendingEdge,
    source_file: &Path,
    symbols: &SymbolTable,
    maps: &ImportMaps,
) -> Option<NodeId> {
    let kind = edge.target_kind;

    if let Some(hint) = edge.receiver_hint.as_deref() {
        match maps.binding(source_file, hint) {
            Some(Binding::Namespace { file }) => {
                if let Some(id) = single(symbols.in_file(file, &edge.target_name, kind)) {
                    return Some(id);
                }
            }
            Some(Binding::Symbol { file, name: owner }) => {
                let members: Vec<&Symbol> = symbols
                    .in_file(file, &edge.target_name, kind)
                    .into_iter()
                    .filter(|s| s.owner.as_deref() == Some(owner.as_str()))
                    .collect();
                if let Some(id) = single(members) {
                    return Some(id);
                }
            }
            None => {}
        }
    }

    match maps.binding(source_file, &edge.target_name)? {
        Binding::Symbol { file, name } => single(narrow_by_hint(
            symbols.in_file(file, name, kind),
            edge.receiver_hint.as_deref(),
        )),
        Binding::Namespace { file } if kind == NodeKind::Module => {
            symbols.module_of(file).map(|m| m.id.clone())
        }
        Binding::Namespace { .. } => None,
    }
}

/// Resolve one pending edge originating in `source_file`.
pub fn resolve_edge(
    edge: &PendingEdge,
    source_file: &Path,
    symbols: &SymbolTable,
    maps: &ImportMaps,
) -> EdgeOutcome {
    if let Some(id) = via_exact_file(edge, source_file, symbols, maps) {
        return EdgeOutcome::Resolved(id, ResolutionStrategy::ExactFile);
    }
    // A module import whose specifier did not resolve names something
    // outside the index; a same-named file elsewhere is not it.
    if edge.target_kind == NodeKind::Module && edge.import_source.is_some() {
        return EdgeOutcome::Unresolved;
    }

    if let Some(id) = via_import_map(edge, source_file, symbols, maps) {
        return EdgeOutcome::Resolved(id, ResolutionStrategy::ImportMap);
    }
    // A bare name bound by an import means that import, even when the
    // imported file does not declare it.
    if edge.receiver_hint.is_none() {
        if let Some(Binding::Symbol { file, name }) = maps.binding(source_file, &edge.target_name) {
            return match symbols.in_file(file, name, edge.target_kind).len() {
                n if n > 1 => EdgeOutcome::Ambiguous(n),
                _ => EdgeOutcome::Unresolved,
            };
        }
    }

    let hint = edge.receiver_hint.as_deref();
    if let Some(id) = single(narrow_by_hint(
        symbols.in_file(source_file, &edge.target_name, edge.target_kind),
        hint,
    )) {
        return EdgeOutcome::Resolved(id, ResolutionStrategy::SameFile);
    }

    let global = symbols.global(&edge.target_name, edge.target_kind);
    if global.is_empty() {
        return EdgeOutcome::Unresolved;
    }
    let narrowed = narrow_by_hint(global, hint);
    match narrowed.len() {
        1 => EdgeOutcome::Resolved(narrowed[0].id.clone(), ResolutionStrategy::Global),
        n => EdgeOutcome::Ambiguous(n),
    }
}

/// Resolve every pending edge in the buffer against a symbol snapshot.
///
/// Pure: the same buffer and snapshot always produce the same resolution.
pub fn resolve_all(buffer: &PendingEdgeBuffer, symbols: &SymbolTable, maps: &ImportMaps) -> Resolution {
    let mut resolution = Resolution::default();
    let mut seen = HashSet::new();

    for (file, entry) in buffer.entries() {
        for edge in &entry.pending_edges {
            if symbols.get(&edge.source_id).is_none() {
                resolution.stats.unresolved += 1;
                continue;
            }
            match resolve_edge(edge, file, symbols, maps) {
                EdgeOutcome::Resolved(target_id, strategy) => {
                    resolution.stats.resolved += 1;
                    *resolution.by_strategy.entry(strategy).or_default() += 1;
                    let resolved = ResolvedEdge {
                        source_id: edge.source_id.clone(),
                        target_id,
                        relationship: edge.relationship,
                        metadata: EdgeMetadata {
                            resolution: Some(strategy),
                            ..edge.metadata.clone()
                        },
                    };
                    let key = resolved.key();
                    resolution
                        .by_file
                        .entry(file.clone())
                        .or_default()
                        .insert(key.clone());
                    if seen.insert(key) {
                        resolution.edges.push(resolved);
                    }
                }
                EdgeOutcome::Unresolved => resolution.stats.unresolved += 1,
                EdgeOutcome::Ambiguous(candidates) => {
                    resolution.stats.ambiguous += 1;
                    debug!(
                        file = %file.display(),
                        target = %edge.target_name,
                        candidates,
                        "ambiguous reference dropped"
                    );
                }
            }
        }
    }
    resolution
}

/// Snapshot `nodes` and resolve the buffer against them.
pub fn resolve_snapshot(buffer: &PendingEdgeBuffer, nodes: Vec<crate::types::Node>) -> Resolution {
    let symbols = SymbolTable::from_nodes(nodes);
    let maps = ImportMaps::build(buffer, &symbols);
    resolve_all(buffer, &symbols, &maps)
}

/// Stateful driver: remembers what each file resolved to last time so a
/// pass can delete edges that no longer hold.
#[derive(Debug, Default)]
pub struct EdgeResolver {
    previous: BTreeMap<PathBuf, BTreeSet<EdgeKey>>,
    generation: u64,
    last_report: Option<ResolutionReport>,
}

impl EdgeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed passes.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_report(&self) -> Option<&ResolutionReport> {
        self.last_report.as_ref()
    }

    /// Forget edges recorded for files under `dir`. Their nodes, and with
    /// them the edges, are already gone from the store.
    pub fn forget_under(&mut self, dir: &Path) {
        self.previous.retain(|file, _| !file.starts_with(dir));
    }

    pub fn forget_file(&mut self, file: &Path) {
        self.previous.remove(file);
    }

    /// Run one pass and write its edges.
    pub async fn run(
        &mut self,
        buffer: &PendingEdgeBuffer,
        graph: &dyn GraphStore,
    ) -> Result<ResolutionReport> {
        let started = Instant::now();

        let nodes = graph.find_nodes(&NodeQuery::all()).await?;
        let symbols = SymbolTable::from_nodes(nodes);
        let maps = ImportMaps::build(buffer, &symbols);
        let mut resolution = resolve_all(buffer, &symbols, &maps);

        let mut stale = Vec::new();
        let mut next = BTreeMap::new();
        for (file, entry) in buffer.entries() {
            let previous = self.previous.get(file);
            if entry.edges_discarded {
                if let Some(previous) = previous {
                    next.insert(file.clone(), previous.clone());
                }
                continue;
            }
            let current = resolution.by_file.remove(file).unwrap_or_default();
            if let Some(previous) = previous {
                stale.extend(previous.difference(&current).cloned());
            }
            next.insert(file.clone(), current);
        }
        // An edge can be stale for one file and current for another.
        let current: HashSet<EdgeKey> = resolution.edges.iter().map(ResolvedEdge::key).collect();
        stale.retain(|key| !current.contains(key));
        stale.sort();
        stale.dedup();

        let edges_written = graph.add_edges(resolution.edges).await?;
        let edges_removed = if stale.is_empty() {
            0
        } else {
            graph.remove_edges(&stale).await?
        };

        self.previous = next;
        self.generation += 1;
        let report = ResolutionReport {
            generation: self.generation,
            stats: resolution.stats,
            by_strategy: resolution.by_strategy,
            edges_written,
            edges_removed,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            generation = report.generation,
            resolved = report.stats.resolved,
            unresolved = report.stats.unresolved,
            ambiguous = report.stats.ambiguous,
            written = report.edges_written,
            removed = report.edges_removed,
            duration_ms = report.duration_ms,
            "resolution pass complete"
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }
}
