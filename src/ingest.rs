//! Structural ingestion of a single file.
//!
//! Runs inside scheduler workers: read, parse, embed, write nodes. The
//! pending edges and declarations are handed back to the coordinator, which
//! is the only writer of the edge buffer and the structure ledger.

use crate::embedding::{EmbeddingProvider, name_text, summary_text};
use crate::error::TaskFailure;
use crate::parsing::ParserRegistry;
use crate::staleness::{FileFingerprint, StalenessTracker};
use crate::store::{GraphStore, VectorId, VectorMetadata, VectorStore};
use crate::types::{ExportDecl, ImportDecl, Node, PendingEdge};
use dashmap::DashMap;
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// File -> content hash whose structure is currently in the graph store.
#[derive(Debug, Default)]
pub struct StructureLedger {
    entries: DashMap<PathBuf, String>,
}

impl StructureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.entries.get(path).map(|h| h.clone())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    pub fn insert(&self, path: PathBuf, content_hash: String) {
        self.entries.insert(path, content_hash);
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.entries.remove(path).is_some()
    }

    pub fn remove_under(&self, dir: &Path) -> Vec<PathBuf> {
        let removed: Vec<PathBuf> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(dir))
            .map(|e| e.key().clone())
            .collect();
        for path in &removed {
            self.entries.remove(path);
        }
        removed
    }

    /// Sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.entries.iter().map(|e| e.key().clone()).collect();
        files.sort();
        files
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// What parsing a file produced for the resolver.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub pending_edges: Vec<PendingEdge>,
    pub imports: Vec<ImportDecl>,
    pub exports: Vec<ExportDecl>,
}

/// Result of one ingestion task.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub path: PathBuf,
    pub fingerprint: FileFingerprint,
    /// `None` when the structure was already materialised for this content.
    pub parsed: Option<ParsedFile>,
    pub node_count: usize,
    pub embedding_failures: usize,
}

/// Stores an ingestion task may write to. `None` means the capability is
/// unavailable and that part of the work is skipped.
#[derive(Clone)]
pub struct Stores {
    pub graph: Option<Arc<dyn GraphStore>>,
    pub vectors: Option<Arc<dyn VectorStore>>,
}

pub struct Ingestor {
    parsers: ParserRegistry,
    stores: Stores,
    embedder: Arc<dyn EmbeddingProvider>,
    tracker: Arc<StalenessTracker>,
    ledger: Arc<StructureLedger>,
    /// Vector entries written for each file, deleted on re-ingest.
    vector_ids: DashMap<PathBuf, Vec<VectorId>>,
    max_file_size: u64,
}

impl Ingestor {
    pub fn new(
        parsers: ParserRegistry,
        stores: Stores,
        embedder: Arc<dyn EmbeddingProvider>,
        tracker: Arc<StalenessTracker>,
        ledger: Arc<StructureLedger>,
        max_file_size: u64,
    ) -> Self {
        Self {
            parsers,
            stores,
            embedder,
            tracker,
            ledger,
            vector_ids: DashMap::new(),
            max_file_size,
        }
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.parsers.supports(path)
    }

    /// Ingest one file.
    pub async fn ingest(&self, path: PathBuf) -> Result<IngestOutcome, TaskFailure> {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| TaskFailure::Read(e.to_string()))?;
        if metadata.len() > self.max_file_size {
            return Err(TaskFailure::Oversized {
                size: metadata.len(),
                limit: self.max_file_size,
            });
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| TaskFailure::Read(e.to_string()))?;
        let fingerprint = FileFingerprint::compute(&bytes, Some(&metadata));

        if self.ledger.get(&path).as_deref() == Some(fingerprint.content_hash.as_str()) {
            debug!(path = %path.display(), "structure already current");
            return Ok(IngestOutcome {
                path,
                fingerprint,
                parsed: None,
                node_count: 0,
                embedding_failures: 0,
            });
        }

        let content = String::from_utf8(bytes).map_err(|_| TaskFailure::NotUtf8)?;
        let parser = self
            .parsers
            .parser_for(&path)
            .cloned()
            .ok_or(TaskFailure::Unsupported)?;

        self.tracker.begin(&path);

        let parse_path = path.clone();
        let output = tokio::task::spawn_blocking(move || parser.parse(&parse_path, &content))
            .await
            .map_err(|e| TaskFailure::Panicked(e.to_string()))?
            .map_err(|e| TaskFailure::Parse(e.to_string()))?;

        let (nodes, embedding_failures) = self.embed_nodes(output.nodes).await;
        if embedding_failures > 0 {
            warn!(
                path = %path.display(),
                failures = embedding_failures,
                "some nodes were stored without embeddings"
            );
        }
        let node_count = nodes.len();

        if let Some(graph) = &self.stores.graph {
            graph
                .replace_file_nodes(&path, nodes.clone())
                .await
                .map_err(|e| TaskFailure::Store(e.to_string()))?;
        }
        if let Some(vectors) = &self.stores.vectors {
            self.replace_vectors(vectors.as_ref(), &path, &nodes).await;
        }

        debug!(path = %path.display(), nodes = node_count, edges = output.pending_edges.len(), "ingested");

        Ok(IngestOutcome {
            path,
            fingerprint,
            parsed: Some(ParsedFile {
                pending_edges: output.pending_edges,
                imports: output.imports,
                exports: output.exports,
            }),
            node_count,
            embedding_failures,
        })
    }

    async fn embed_nodes(&self, nodes: Vec<Node>) -> (Vec<Node>, usize) {
        let embedded = join_all(nodes.into_iter().map(|mut node| async move {
            let name = self.embedder.embed(&name_text(&node)).await;
            let summary = self.embedder.embed(&summary_text(&node)).await;
            let failed = name.is_err() || summary.is_err();
            node.name_embedding = name.ok();
            node.summary_embedding = summary.ok();
            (node, failed)
        }))
        .await;

        let failures = embedded.iter().filter(|(_, failed)| *failed).count();
        (embedded.into_iter().map(|(node, _)| node).collect(), failures)
    }

    async fn replace_vectors(&self, vectors: &dyn VectorStore, path: &Path, nodes: &[Node]) {
        if let Some((_, old)) = self.vector_ids.remove(path) {
            for id in old {
                if let Err(err) = vectors.delete(id).await {
                    warn!(path = %path.display(), "vector delete failed: {err}");
                }
            }
        }

        let mut ids = Vec::new();
        for node in nodes {
            let Some(embedding) = &node.summary_embedding else {
                continue;
            };
            match vectors
                .index(embedding.clone(), VectorMetadata::for_node(node))
                .await
            {
                Ok(id) => ids.push(id),
                Err(err) => warn!(path = %path.display(), node = %node.name, "vector index failed: {err}"),
            }
        }
        if !ids.is_empty() {
            self.vector_ids.insert(path.to_path_buf(), ids);
        }
    }

    /// Remove one file's nodes and vectors.
    pub async fn evict_file(&self, path: &Path) -> usize {
        self.ledger.remove(path);
        let mut removed = 0;
        if let Some(graph) = &self.stores.graph {
            match graph.remove_file(path).await {
                Ok(ids) => removed = ids.len(),
                Err(err) => warn!(path = %path.display(), "graph eviction failed: {err}"),
            }
        }
        self.delete_vectors(|p| p == path).await;
        removed
    }

    /// Remove every node and vector for files under `dir`.
    pub async fn evict_under(&self, dir: &Path) -> usize {
        self.ledger.remove_under(dir);
        let mut removed = 0;
        if let Some(graph) = &self.stores.graph {
            match graph.remove_under(dir).await {
                Ok(ids) => removed = ids.len(),
                Err(err) => warn!(dir = %dir.display(), "graph eviction failed: {err}"),
            }
        }
        self.delete_vectors(|p| p.starts_with(dir)).await;
        removed
    }

    async fn delete_vectors(&self, matches: impl Fn(&Path) -> bool) {
        let Some(vectors) = &self.stores.vectors else {
            self.vector_ids.retain(|p, _| !matches(p));
            return;
        };
        let doomed: Vec<PathBuf> = self
            .vector_ids
            .iter()
            .filter(|e| matches(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for path in doomed {
            if let Some((_, ids)) = self.vector_ids.remove(&path) {
                for id in ids {
                    if let Err(err) = vectors.delete(id).await {
                        warn!(path = %path.display(), "vector delete failed: {err}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::{HnswVectorStore, MemoryGraphStore, NodeQuery};
    use crate::types::NodeKind;

    struct Fixture {
        _temp: tempfile::TempDir,
        root: PathBuf,
        graph: Arc<MemoryGraphStore>,
        vectors: Arc<HnswVectorStore>,
        ledger: Arc<StructureLedger>,
        ingestor: Ingestor,
    }

    fn fixture(max_file_size: u64) -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let graph = Arc::new(MemoryGraphStore::new());
        let vectors = Arc::new(HnswVectorStore::new());
        let ledger = Arc::new(StructureLedger::new());
        let ingestor = Ingestor::new(
            ParserRegistry::with_defaults(),
            Stores {
                graph: Some(graph.clone()),
                vectors: Some(vectors.clone()),
            },
            Arc::new(HashingEmbedder::default()),
            Arc::new(StalenessTracker::in_memory()),
            Arc::clone(&ledger),
            max_file_size,
        );
        Fixture {
            _temp: temp,
            root,
            graph,
            vectors,
            ledger,
            ingestor,
        }
    }

    #[tokio::test]
    async fn test_ingest_writes_nodes_and_vectors() {
        let f = fixture(1024 * 1024);
        let path = f.root.join("math.ts");
        std::fs::write(&path, "export function add(a: number) { return helper(a); }\n").unwrap();

        let outcome = f.ingestor.ingest(path.clone()).await.unwrap();
        let parsed = outcome.parsed.expect("file should be parsed");
        assert_eq!(outcome.node_count, 2);
        assert_eq!(outcome.embedding_failures, 0);
        assert!(parsed.pending_edges.iter().any(|e| e.target_name == "helper"));

        let nodes = f
            .graph
            .find_nodes(&NodeQuery::named("add").kind(NodeKind::Function))
            .await
            .unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].summary_embedding.is_some());
        assert_eq!(f.vectors.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_structure_is_skipped() {
        let f = fixture(1024 * 1024);
        let path = f.root.join("a.ts");
        std::fs::write(&path, "export const x = 1;\n").unwrap();

        let first = f.ingestor.ingest(path.clone()).await.unwrap();
        f.ledger.insert(path.clone(), first.fingerprint.content_hash.clone());

        let second = f.ingestor.ingest(path.clone()).await.unwrap();
        assert!(second.parsed.is_none());

        // Re-ingesting changed content replaces vectors instead of adding.
        std::fs::write(&path, "export const y = 2;\n").unwrap();
        let third = f.ingestor.ingest(path.clone()).await.unwrap();
        assert!(third.parsed.is_some());
        assert_eq!(f.vectors.len().await.unwrap(), 2);
        assert_eq!(f.graph.node_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_oversized_and_binary_files_fail() {
        let f = fixture(16);
        let big = f.root.join("big.ts");
        std::fs::write(&big, "export const value = 'this is longer than sixteen bytes';\n").unwrap();
        assert!(matches!(
            f.ingestor.ingest(big).await,
            Err(TaskFailure::Oversized { limit: 16, .. })
        ));

        let binary = f.root.join("bin.ts");
        std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        assert_eq!(f.ingestor.ingest(binary).await.unwrap_err(), TaskFailure::NotUtf8);
        assert_eq!(f.graph.node_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_evict_file() {
        let f = fixture(1024 * 1024);
        let path = f.root.join("gone.ts");
        std::fs::write(&path, "export class Gone {}\n").unwrap();
        f.ingestor.ingest(path.clone()).await.unwrap();

        assert_eq!(f.ingestor.evict_file(&path).await, 2);
        assert_eq!(f.graph.node_count().await.unwrap(), 0);
        assert_eq!(f.vectors.len().await.unwrap(), 0);
    }
}
