//! Storage contracts for the graph and vector backends.
//!
//! The core only talks to `GraphStore` and `VectorStore`; the bundled
//! in-memory implementations live in `memory` and `vector`.

pub mod memory;
pub mod vector;

pub use memory::MemoryGraphStore;
pub use vector::HnswVectorStore;

use crate::error::Result;
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Graph Store
// ============================================================================

/// Name predicate for `NodeQuery`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    Exact(String),
    /// Case-insensitive substring.
    Contains(String),
    Prefix(String),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(s) => name == s,
            Self::Contains(s) => name.to_lowercase().contains(&s.to_lowercase()),
            Self::Prefix(s) => name.starts_with(s.as_str()),
        }
    }
}

/// Node lookup. Unset fields match everything; results are ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeQuery {
    pub kind: Option<NodeKind>,
    pub name: Option<NameMatch>,
    pub file: Option<PathBuf>,
    /// Matches files whose path ends with this suffix.
    pub file_suffix: Option<String>,
    pub limit: Option<usize>,
}

impl NodeQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(NameMatch::Exact(name.into())),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn in_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn file_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.file_suffix = Some(suffix.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if self.kind.is_some_and(|k| k != node.kind) {
            return false;
        }
        if self.name.as_ref().is_some_and(|m| !m.matches(&node.name)) {
            return false;
        }
        if self.file.as_ref().is_some_and(|f| f != &node.file) {
            return false;
        }
        if let Some(suffix) = &self.file_suffix {
            let file = node.file.to_string_lossy().replace('\\', "/");
            if !file.ends_with(suffix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// One traversal step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    /// `None` follows every relationship.
    pub relationship: Option<RelationshipKind>,
    pub direction: Direction,
}

impl Hop {
    pub fn outgoing(relationship: RelationshipKind) -> Self {
        Self {
            relationship: Some(relationship),
            direction: Direction::Outgoing,
        }
    }

    pub fn incoming(relationship: RelationshipKind) -> Self {
        Self {
            relationship: Some(relationship),
            direction: Direction::Incoming,
        }
    }
}

/// Declarative traversal: start nodes, then a fixed sequence of hops.
/// Returns the distinct nodes reached after the last hop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphQuery {
    pub start: NodeQuery,
    pub hops: Vec<Hop>,
    pub limit: Option<usize>,
}

impl GraphQuery {
    pub fn from(start: NodeQuery) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    pub fn hop(mut self, hop: Hop) -> Self {
        self.hops.push(hop);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Typed graph of code entities.
///
/// Implementations must be safe to call concurrently; the indexer writes
/// from worker tasks and the coordinator while searches read.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or update nodes by id.
    async fn add_nodes(&self, nodes: Vec<Node>) -> Result<usize>;

    /// Make `nodes` the complete node set of `file` in one step. Nodes that
    /// disappear are removed with their edges; surviving ids keep theirs.
    /// Returns the ids that were removed.
    async fn replace_file_nodes(&self, file: &Path, nodes: Vec<Node>) -> Result<Vec<NodeId>>;

    /// Remove every node of `file`. Returns the removed ids.
    async fn remove_file(&self, file: &Path) -> Result<Vec<NodeId>>;

    /// Remove every node whose file lies under `dir`. Returns the removed ids.
    async fn remove_under(&self, dir: &Path) -> Result<Vec<NodeId>>;

    /// Add resolved edges, skipping duplicates and edges whose endpoints do
    /// not exist. Returns the number of edges written.
    async fn add_edges(&self, edges: Vec<ResolvedEdge>) -> Result<usize>;

    async fn remove_edges(&self, keys: &[EdgeKey]) -> Result<usize>;

    async fn get_node(&self, id: &NodeId) -> Result<Option<Node>>;

    async fn find_nodes(&self, query: &NodeQuery) -> Result<Vec<Node>>;

    async fn get_relationships(&self, id: &NodeId, direction: Direction) -> Result<Vec<RelatedNode>>;

    async fn query(&self, query: &GraphQuery) -> Result<Vec<Node>>;

    async fn node_count(&self) -> Result<usize>;

    async fn edge_count(&self) -> Result<usize>;

    async fn is_ready(&self) -> bool;

    /// Startup health check; an error disables structural search.
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Vector Store
// ============================================================================

/// Handle returned by `VectorStore::index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VectorId(pub u64);

/// What a vector stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
}

impl VectorMetadata {
    pub fn for_node(node: &Node) -> Self {
        Self {
            node_id: node.id.clone(),
            kind: node.kind,
            name: node.name.clone(),
            file: node.file.clone(),
            line: node.line,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorFilter {
    pub kinds: Option<Vec<NodeKind>>,
    pub path_prefix: Option<PathBuf>,
}

impl VectorFilter {
    /// True when every vector passes.
    pub fn is_unrestricted(&self) -> bool {
        self.kinds.is_none() && self.path_prefix.is_none()
    }

    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&metadata.kind) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !metadata.file.starts_with(prefix) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: VectorId,
    /// Cosine similarity, higher is closer.
    pub similarity: f32,
    pub metadata: VectorMetadata,
}

/// Nearest-neighbour index over embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn index(&self, vector: Vec<f32>, metadata: VectorMetadata) -> Result<VectorId>;

    /// Best matches first.
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<VectorMatch>>;

    /// Returns whether the id existed.
    async fn delete(&self, id: VectorId) -> Result<bool>;

    async fn len(&self) -> Result<usize>;

    /// Startup health check; an error disables semantic search.
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Cosine similarity; zero for empty or zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, file: &str, line: u32) -> Node {
        Node::new(
            name,
            file,
            line,
            NodeMetadata::Function {
                signature: Signature::default(),
                exported: true,
            },
        )
    }

    #[test]
    fn test_node_query_matching() {
        let node = function("parseConfig", "/repo/src/config.ts", 3);
        assert!(NodeQuery::all().matches(&node));
        assert!(NodeQuery::named("parseConfig").matches(&node));
        assert!(!NodeQuery::named("parse").matches(&node));
        assert!(!NodeQuery::named("parseConfig").kind(NodeKind::Class).matches(&node));
        assert!(NodeQuery::all().file_suffix("src/config.ts").matches(&node));
        assert!(!NodeQuery::all().in_file("/repo/other.ts").matches(&node));

        let contains = NodeQuery {
            name: Some(NameMatch::Contains("CONFIG".to_string())),
            ..NodeQuery::default()
        };
        assert!(contains.matches(&node));
    }

    #[test]
    fn test_vector_filter() {
        let meta = VectorMetadata::for_node(&function("run", "/repo/src/app.ts", 1));
        assert!(VectorFilter::default().matches(&meta));

        let by_kind = VectorFilter {
            kinds: Some(vec![NodeKind::Class]),
            path_prefix: None,
        };
        assert!(!by_kind.matches(&meta));

        let by_path = VectorFilter {
            kinds: None,
            path_prefix: Some(PathBuf::from("/repo/src")),
        };
        assert!(by_path.matches(&meta));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
