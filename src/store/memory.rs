//! In-memory graph store.
//!
//! Nodes and edges live in a petgraph `StableGraph` (indices stay valid
//! across removals) guarded by a `RwLock`; `DashMap` side indexes map ids,
//! files and names to graph indices. Every mutation takes the graph write
//! lock before touching an index, and every read takes the graph read lock
//! first, so the two never deadlock.

use super::{GraphQuery, GraphStore, NameMatch, NodeQuery};
use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct EdgeData {
    relationship: RelationshipKind,
    metadata: EdgeMetadata,
}

type Graph = StableGraph<Node, EdgeData>;

/// Graph store held entirely in process memory.
#[derive(Default)]
pub struct MemoryGraphStore {
    graph: RwLock<Graph>,
    ids: DashMap<NodeId, NodeIndex>,
    files: DashMap<PathBuf, BTreeSet<NodeId>>,
    names: DashMap<String, BTreeSet<NodeId>>,
    edges: DashMap<EdgeKey, EdgeIndex>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_node(&self, graph: &mut Graph, node: Node) {
        let id = node.id.clone();
        if let Some(idx) = self.ids.get(&id).map(|r| *r) {
            if let Some(slot) = graph.node_weight_mut(idx) {
                *slot = node;
            }
            return;
        }
        self.files
            .entry(node.file.clone())
            .or_default()
            .insert(id.clone());
        self.names
            .entry(node.name.clone())
            .or_default()
            .insert(id.clone());
        let idx = graph.add_node(node);
        self.ids.insert(id, idx);
    }

    fn remove_node(&self, graph: &mut Graph, id: &NodeId) -> bool {
        let Some((_, idx)) = self.ids.remove(id) else {
            return false;
        };

        let view: &Graph = graph;
        let incident: Vec<EdgeKey> = [petgraph::Direction::Outgoing, petgraph::Direction::Incoming]
            .into_iter()
            .flat_map(|dir| view.edges_directed(idx, dir))
            .filter_map(|edge| {
                let source = view.node_weight(edge.source())?;
                let target = view.node_weight(edge.target())?;
                Some(EdgeKey {
                    source: source.id.clone(),
                    target: target.id.clone(),
                    relationship: edge.weight().relationship,
                })
            })
            .collect();
        for key in incident {
            self.edges.remove(&key);
        }

        if let Some(node) = graph.remove_node(idx) {
            let file_empty = self
                .files
                .get_mut(&node.file)
                .map(|mut ids| {
                    ids.remove(id);
                    ids.is_empty()
                })
                .unwrap_or(false);
            if file_empty {
                self.files.remove(&node.file);
            }
            let name_empty = self
                .names
                .get_mut(&node.name)
                .map(|mut ids| {
                    ids.remove(id);
                    ids.is_empty()
                })
                .unwrap_or(false);
            if name_empty {
                self.names.remove(&node.name);
            }
        }
        true
    }

    fn remove_ids(&self, graph: &mut Graph, ids: Vec<NodeId>) -> Vec<NodeId> {
        ids.into_iter()
            .filter(|id| self.remove_node(graph, id))
            .collect()
    }

    fn file_ids(&self, file: &Path) -> Vec<NodeId> {
        self.files
            .get(file)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn find_locked(&self, graph: &Graph, query: &NodeQuery) -> Vec<Node> {
        let candidates: Vec<NodeId> = match (&query.name, &query.file) {
            (Some(NameMatch::Exact(name)), _) => self
                .names
                .get(name)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default(),
            (_, Some(file)) => self.file_ids(file),
            _ => self.ids.iter().map(|entry| entry.key().clone()).collect(),
        };

        let mut nodes: Vec<Node> = candidates
            .iter()
            .filter_map(|id| self.ids.get(id).map(|idx| *idx))
            .filter_map(|idx| graph.node_weight(idx))
            .filter(|node| query.matches(node))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = query.limit {
            nodes.truncate(limit);
        }
        nodes
    }

    fn neighbours(
        &self,
        graph: &Graph,
        idx: NodeIndex,
        direction: Direction,
        relationship: Option<RelationshipKind>,
    ) -> Vec<(NodeIndex, Direction, EdgeData)> {
        let mut out = Vec::new();
        let directions: &[(petgraph::Direction, Direction)] = match direction {
            Direction::Outgoing => &[(petgraph::Direction::Outgoing, Direction::Outgoing)],
            Direction::Incoming => &[(petgraph::Direction::Incoming, Direction::Incoming)],
            Direction::Both => &[
                (petgraph::Direction::Outgoing, Direction::Outgoing),
                (petgraph::Direction::Incoming, Direction::Incoming),
            ],
        };
        for (pg_dir, dir) in directions {
            for edge in graph.edges_directed(idx, *pg_dir) {
                if relationship.is_some_and(|r| r != edge.weight().relationship) {
                    continue;
                }
                let other = match dir {
                    Direction::Incoming => edge.source(),
                    _ => edge.target(),
                };
                out.push((other, *dir, edge.weight().clone()));
            }
        }
        out
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn add_nodes(&self, nodes: Vec<Node>) -> Result<usize> {
        let mut graph = self.graph.write();
        let count = nodes.len();
        for node in nodes {
            self.insert_node(&mut graph, node);
        }
        Ok(count)
    }

    async fn replace_file_nodes(&self, file: &Path, nodes: Vec<Node>) -> Result<Vec<NodeId>> {
        let mut graph = self.graph.write();
        let keep: BTreeSet<&NodeId> = nodes.iter().map(|n| &n.id).collect();
        let stale: Vec<NodeId> = self
            .file_ids(file)
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();
        let removed = self.remove_ids(&mut graph, stale);
        for node in nodes {
            self.insert_node(&mut graph, node);
        }
        Ok(removed)
    }

    async fn remove_file(&self, file: &Path) -> Result<Vec<NodeId>> {
        let mut graph = self.graph.write();
        let ids = self.file_ids(file);
        Ok(self.remove_ids(&mut graph, ids))
    }

    async fn remove_under(&self, dir: &Path) -> Result<Vec<NodeId>> {
        let mut graph = self.graph.write();
        let mut ids: Vec<NodeId> = self
            .files
            .iter()
            .filter(|entry| entry.key().starts_with(dir))
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        ids.sort();
        Ok(self.remove_ids(&mut graph, ids))
    }

    async fn add_edges(&self, edges: Vec<ResolvedEdge>) -> Result<usize> {
        let mut graph = self.graph.write();
        let mut written = 0;
        for edge in edges {
            let key = edge.key();
            let source = self.ids.get(&edge.source_id).map(|r| *r);
            let target = self.ids.get(&edge.target_id).map(|r| *r);
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            let data = EdgeData {
                relationship: edge.relationship,
                metadata: edge.metadata,
            };
            if let Some(existing) = self.edges.get(&key).map(|r| *r) {
                if let Some(slot) = graph.edge_weight_mut(existing) {
                    *slot = data;
                }
                continue;
            }
            let idx = graph.add_edge(source, target, data);
            self.edges.insert(key, idx);
            written += 1;
        }
        Ok(written)
    }

    async fn remove_edges(&self, keys: &[EdgeKey]) -> Result<usize> {
        let mut graph = self.graph.write();
        let mut removed = 0;
        for key in keys {
            if let Some((_, idx)) = self.edges.remove(key) {
                if graph.remove_edge(idx).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>> {
        let graph = self.graph.read();
        let idx = self.ids.get(id).map(|r| *r);
        Ok(idx.and_then(|idx| graph.node_weight(idx)).cloned())
    }

    async fn find_nodes(&self, query: &NodeQuery) -> Result<Vec<Node>> {
        let graph = self.graph.read();
        Ok(self.find_locked(&graph, query))
    }

    async fn get_relationships(&self, id: &NodeId, direction: Direction) -> Result<Vec<RelatedNode>> {
        let graph = self.graph.read();
        let Some(idx) = self.ids.get(id).map(|r| *r) else {
            return Ok(Vec::new());
        };
        let mut related: Vec<RelatedNode> = self
            .neighbours(&graph, idx, direction, None)
            .into_iter()
            .filter_map(|(other, dir, data)| {
                graph.node_weight(other).map(|node| RelatedNode {
                    relationship: data.relationship,
                    direction: dir,
                    node: node.brief(),
                    metadata: data.metadata,
                })
            })
            .collect();
        related.sort_by(|a, b| {
            a.relationship
                .cmp(&b.relationship)
                .then_with(|| a.node.name.cmp(&b.node.name))
                .then_with(|| a.node.id.cmp(&b.node.id))
        });
        Ok(related)
    }

    async fn query(&self, query: &GraphQuery) -> Result<Vec<Node>> {
        let graph = self.graph.read();
        let mut frontier: BTreeSet<NodeIndex> = self
            .find_locked(&graph, &query.start)
            .iter()
            .filter_map(|node| self.ids.get(&node.id).map(|r| *r))
            .collect();

        for hop in &query.hops {
            frontier = frontier
                .iter()
                .flat_map(|idx| self.neighbours(&graph, *idx, hop.direction, hop.relationship))
                .map(|(other, _, _)| other)
                .collect();
        }

        let mut nodes: Vec<Node> = frontier
            .into_iter()
            .filter_map(|idx| graph.node_weight(idx).cloned())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = query.limit {
            nodes.truncate(limit);
        }
        Ok(nodes)
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.graph.read().node_count())
    }

    async fn edge_count(&self) -> Result<usize> {
        Ok(self.graph.read().edge_count())
    }

    async fn is_ready(&self) -> bool {
        true
    }
}
