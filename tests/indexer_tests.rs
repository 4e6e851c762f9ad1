use async_trait::async_trait;
use camille_index::store::{GraphQuery, NodeQuery, VectorFilter, VectorId, VectorMatch, VectorMetadata};
use camille_index::{
    Direction, EdgeKey, GraphStore, HnswVectorStore, IncrementalIndexer, IndexConfig, IndexError,
    MatchTier, MemoryGraphStore, Node, NodeId, NodeKind, RelatedNode, ResolutionStrategy,
    ResolvedEdge, SearchOptions, Signal, VectorStore,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(&path, contents).expect("write file");
    path
}

fn project() -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().canonicalize().expect("canonical root");
    write(&root, "src/util.ts", "export function helper() {\n  return 1;\n}\n");
    write(&root, "src/other.ts", "export function helper() {\n  return 2;\n}\n");
    write(
        &root,
        "src/app.ts",
        "import { helper } from './util';\n\nexport function run() {\n  return helper();\n}\n",
    );
    (temp, root)
}

fn config() -> IndexConfig {
    IndexConfig {
        workers: Some(2),
        ..IndexConfig::default()
    }
}

struct Harness {
    indexer: IncrementalIndexer,
    graph: Arc<MemoryGraphStore>,
    vectors: Arc<HnswVectorStore>,
}

async fn start(root: &Path, config: IndexConfig) -> Harness {
    let graph = Arc::new(MemoryGraphStore::new());
    let vectors = Arc::new(HnswVectorStore::new());
    let indexer = IncrementalIndexer::builder(root)
        .config(config)
        .graph_store(graph.clone())
        .vector_store(vectors.clone())
        .build()
        .await
        .expect("build indexer");
    Harness {
        indexer,
        graph,
        vectors,
    }
}

async fn indexed(root: &Path) -> Harness {
    let harness = start(root, config()).await;
    harness.indexer.add_directory(root).await.expect("add directory");
    harness.indexer.wait_until_ready().await.expect("ready");
    harness
}

fn names_of(nodes: Vec<Node>) -> Vec<String> {
    let mut names: Vec<String> = nodes.into_iter().map(|n| n.name).collect();
    names.sort();
    names
}

#[tokio::test]
async fn import_resolves_to_the_imported_definition() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let callers = h.indexer.callers("helper").await.unwrap();
    assert_eq!(names_of(callers), vec!["run".to_string()]);

    let util_helper = h
        .graph
        .find_nodes(&NodeQuery::named("helper").in_file(root.join("src/util.ts")))
        .await
        .unwrap();
    assert_eq!(util_helper.len(), 1);
    let incoming = h
        .graph
        .get_relationships(&util_helper[0].id, Direction::Incoming)
        .await
        .unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].node.name, "run");

    let other_helper = h
        .graph
        .find_nodes(&NodeQuery::named("helper").in_file(root.join("src/other.ts")))
        .await
        .unwrap();
    let incoming = h
        .graph
        .get_relationships(&other_helper[0].id, Direction::Incoming)
        .await
        .unwrap();
    assert!(incoming.is_empty());

    let status = h.indexer.status().await;
    assert!(status.ready);
    assert_eq!(status.files_indexed, 3);
    assert_eq!(status.generation, 1);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn module_import_resolves_through_the_specifier() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let report = h.indexer.status().await.last_report.expect("a pass ran");
    assert!(report.by_strategy.get(&ResolutionStrategy::ExactFile).copied().unwrap_or(0) >= 1);

    let app = h
        .graph
        .find_nodes(&NodeQuery::named("app").kind(NodeKind::Module))
        .await
        .unwrap();
    assert_eq!(app.len(), 1);
    let outgoing = h
        .graph
        .get_relationships(&app[0].id, Direction::Outgoing)
        .await
        .unwrap();
    assert!(
        outgoing
            .iter()
            .any(|r| r.node.name == "util" && r.node.kind == NodeKind::Module),
        "expected app -> util import edge, got {outgoing:?}"
    );
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn reindexing_unchanged_files_is_idempotent() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let before = h.indexer.status().await;
    let mut ids_before: Vec<_> = h
        .graph
        .find_nodes(&NodeQuery::all())
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    ids_before.sort();

    assert_eq!(h.indexer.add_directory(&root).await.unwrap(), 0);
    let report = h.indexer.trigger_resolution(false).await.unwrap();
    assert_eq!(report.edges_written, 0);
    assert_eq!(report.edges_removed, 0);
    assert_eq!(report.generation, 2);

    let report = h.indexer.trigger_resolution(true).await.unwrap();
    assert_eq!(report.edges_written, 0);
    assert_eq!(report.edges_removed, 0);

    let after = h.indexer.status().await;
    assert_eq!(after.node_count, before.node_count);
    assert_eq!(after.edge_count, before.edge_count);
    let mut ids_after: Vec<_> = h
        .graph
        .find_nodes(&NodeQuery::all())
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    ids_after.sort();
    assert_eq!(ids_before, ids_after);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn changed_file_is_reingested() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let util = root.join("src/util.ts");
    assert!(!h.indexer.file_changed(&util));

    write(
        &root,
        "src/util.ts",
        "export function helper() {\n  return 1;\n}\n\nexport function added() {\n  return helper();\n}\n",
    );
    assert!(h.indexer.file_changed(&util));
    h.indexer.wait_until_ready().await.unwrap();

    let added = h.graph.find_nodes(&NodeQuery::named("added")).await.unwrap();
    assert_eq!(added.len(), 1);
    let callers = h.indexer.callers("helper").await.unwrap();
    assert_eq!(names_of(callers), vec!["added".to_string(), "run".to_string()]);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn removed_call_drops_its_edge() {
    let (_temp, root) = project();
    let h = indexed(&root).await;
    let edges_before = h.indexer.status().await.edge_count;

    let app = write(
        &root,
        "src/app.ts",
        "import { helper } from './util';\n\nexport function run() {\n  return 42;\n}\n",
    );
    assert!(h.indexer.file_changed(&app));
    h.indexer.wait_until_ready().await.unwrap();

    assert!(h.indexer.callers("helper").await.unwrap().is_empty());
    let status = h.indexer.status().await;
    assert_eq!(status.edge_count, edges_before - 1);
    assert_eq!(status.last_report.unwrap().edges_removed, 1);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn ambiguous_reference_is_not_guessed() {
    let (_temp, root) = project();
    write(
        &root,
        "src/loose.ts",
        "export function useHelper() {\n  return helper();\n}\n",
    );
    let h = indexed(&root).await;

    let callers = h.indexer.callers("helper").await.unwrap();
    assert_eq!(names_of(callers), vec!["run".to_string()]);
    let status = h.indexer.status().await;
    assert!(status.last_resolution.unwrap().ambiguous >= 1);
    assert!(status.readiness.ambiguous >= 1);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn namespace_import_and_reexport_resolve() {
    let (_temp, root) = project();
    write(&root, "src/index.ts", "export { helper } from './util';\n");
    write(
        &root,
        "src/ns.ts",
        "import * as util from './util';\n\nexport function viaNamespace() {\n  return util.helper();\n}\n",
    );
    write(
        &root,
        "src/barrel.ts",
        "import { helper } from './index';\n\nexport function viaBarrel() {\n  return helper();\n}\n",
    );
    let h = indexed(&root).await;

    let util_helper = h
        .graph
        .find_nodes(&NodeQuery::named("helper").in_file(root.join("src/util.ts")))
        .await
        .unwrap();
    let incoming = h
        .graph
        .get_relationships(&util_helper[0].id, Direction::Incoming)
        .await
        .unwrap();
    let mut callers: Vec<&str> = incoming.iter().map(|r| r.node.name.as_str()).collect();
    callers.sort();
    assert_eq!(callers, vec!["run", "viaBarrel", "viaNamespace"]);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn removing_a_directory_evicts_everything_under_it() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().canonicalize().unwrap();
    write(&root, "lib/util.ts", "export function helper() {\n  return 1;\n}\n");
    write(
        &root,
        "app/main.ts",
        "import { helper } from '../lib/util';\n\nexport function run() {\n  return helper();\n}\n",
    );

    let h = start(&root, config()).await;
    h.indexer.add_directory(root.join("lib")).await.unwrap();
    h.indexer.add_directory(root.join("app")).await.unwrap();
    h.indexer.wait_until_ready().await.unwrap();
    assert_eq!(names_of(h.indexer.callers("helper").await.unwrap()), vec!["run".to_string()]);

    let vectors_before = h.vectors.len().await.unwrap();
    let removed = h.indexer.remove_directory(root.join("lib")).await.unwrap();
    assert!(removed >= 2, "module and function removed, got {removed}");
    h.indexer.wait_until_ready().await.unwrap();

    assert!(h.graph.find_nodes(&NodeQuery::named("helper")).await.unwrap().is_empty());
    assert_eq!(h.graph.find_nodes(&NodeQuery::named("run")).await.unwrap().len(), 1);
    assert!(h.indexer.callers("helper").await.unwrap().is_empty());

    let vectors_left = h.vectors.len().await.unwrap();
    assert!(vectors_left > 0 && vectors_left < vectors_before);

    let status = h.indexer.status().await;
    assert_eq!(status.watched_roots, vec![root.join("app")]);
    assert_eq!(status.files_indexed, 1);

    h.indexer.remove_directory(root.join("app")).await.unwrap();
    let status = h.indexer.status().await;
    assert_eq!(status.node_count, 0);
    assert_eq!(status.edge_count, 0);
    assert_eq!(h.vectors.len().await.unwrap(), 0);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn deleted_file_is_evicted() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let util = root.join("src/util.ts");
    fs::remove_file(&util).unwrap();
    assert!(h.indexer.file_removed(&util).await.unwrap() >= 2);
    h.indexer.wait_until_ready().await.unwrap();

    assert!(h.indexer.callers("helper").await.unwrap().is_empty());
    assert_eq!(h.indexer.status().await.files_indexed, 2);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn exact_names_rank_above_semantic_matches() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let response = h
        .indexer
        .search("where is helper defined", &SearchOptions::default())
        .await;
    assert!(response.readiness.is_ready());
    assert!(response.readiness.degraded.is_empty());
    assert!(response.results.len() >= 2);
    assert_eq!(response.results[0].node.name, "helper");
    assert_eq!(response.results[0].tier, MatchTier::ExactName);
    assert_eq!(response.results[1].node.name, "helper");

    let tiers: Vec<MatchTier> = response.results.iter().map(|r| r.tier).collect();
    let mut sorted = tiers.clone();
    sorted.sort_by(|a, b| b.cmp(a));
    assert_eq!(tiers, sorted);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn capitalized_function_names_are_exact_matches() {
    let (_temp, root) = project();
    write(&root, "src/button.ts", "export function Button() {\n  return 1;\n}\n");
    write(&root, "src/widget.ts", "export class Widget {}\n");
    write(&root, "src/legacy.ts", "export function Widget() {}\n");
    let h = indexed(&root).await;

    let response = h.indexer.search("Button", &SearchOptions::default()).await;
    let top = &response.results[0];
    assert_eq!(top.node.name, "Button");
    assert_eq!(top.node.kind, NodeKind::Function);
    assert_eq!(top.tier, MatchTier::ExactName);

    // Both are exact matches; the class ranks first.
    let response = h.indexer.search("Widget", &SearchOptions::default()).await;
    let exact: Vec<NodeKind> = response
        .results
        .iter()
        .filter(|r| r.tier == MatchTier::ExactName)
        .map(|r| r.node.kind)
        .collect();
    assert_eq!(exact, vec![NodeKind::Class, NodeKind::Function]);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_mentions_and_filters() {
    let (_temp, root) = project();
    let h = indexed(&root).await;

    let response = h
        .indexer
        .search("what is in src/app.ts", &SearchOptions::default())
        .await;
    assert!(
        response
            .results
            .iter()
            .any(|r| r.node.name == "run" && r.tier == MatchTier::FileMention)
    );

    let options = SearchOptions {
        kinds: Some(vec![NodeKind::Module]),
        include_relationships: true,
        ..SearchOptions::with_limit(5)
    };
    let response = h.indexer.search("app", &options).await;
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|r| r.node.kind == NodeKind::Module));
    let app = response
        .results
        .iter()
        .find(|r| r.node.name == "app")
        .expect("app module");
    assert!(!app.relationships.is_empty());
    h.indexer.shutdown().await.unwrap();
}

struct UnreachableVectors;

#[async_trait]
impl VectorStore for UnreachableVectors {
    async fn index(&self, _vector: Vec<f32>, _metadata: VectorMetadata) -> camille_index::Result<VectorId> {
        Err(IndexError::Store("connection refused".to_string()))
    }

    async fn search(
        &self,
        _vector: &[f32],
        _limit: usize,
        _filter: Option<&VectorFilter>,
    ) -> camille_index::Result<Vec<VectorMatch>> {
        Err(IndexError::Store("connection refused".to_string()))
    }

    async fn delete(&self, _id: VectorId) -> camille_index::Result<bool> {
        Err(IndexError::Store("connection refused".to_string()))
    }

    async fn len(&self) -> camille_index::Result<usize> {
        Err(IndexError::Store("connection refused".to_string()))
    }

    async fn health(&self) -> camille_index::Result<()> {
        Err(IndexError::StoreUnavailable {
            store: "vector",
            message: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn unavailable_vector_store_degrades_to_structural_search() {
    let (_temp, root) = project();
    let indexer = IncrementalIndexer::builder(&root)
        .config(config())
        .vector_store(Arc::new(UnreachableVectors))
        .build()
        .await
        .unwrap();
    assert!(!indexer.capabilities().semantic);
    assert!(indexer.capabilities().structural);

    indexer.add_directory(&root).await.unwrap();
    indexer.wait_until_ready().await.unwrap();

    let response = indexer.search("helper", &SearchOptions::default()).await;
    assert_eq!(response.readiness.degraded, vec![Signal::Semantic]);
    assert_eq!(response.results.len(), 2);
    assert!(response.results.iter().all(|r| r.tier == MatchTier::ExactName));
    assert_eq!(names_of(indexer.callers("helper").await.unwrap()), vec!["run".to_string()]);
    indexer.shutdown().await.unwrap();
}

struct UnreachableGraph;

fn refused<T>() -> camille_index::Result<T> {
    Err(IndexError::Store("connection refused".to_string()))
}

#[async_trait]
impl GraphStore for UnreachableGraph {
    async fn add_nodes(&self, _nodes: Vec<Node>) -> camille_index::Result<usize> {
        refused()
    }

    async fn replace_file_nodes(&self, _file: &Path, _nodes: Vec<Node>) -> camille_index::Result<Vec<NodeId>> {
        refused()
    }

    async fn remove_file(&self, _file: &Path) -> camille_index::Result<Vec<NodeId>> {
        refused()
    }

    async fn remove_under(&self, _dir: &Path) -> camille_index::Result<Vec<NodeId>> {
        refused()
    }

    async fn add_edges(&self, _edges: Vec<ResolvedEdge>) -> camille_index::Result<usize> {
        refused()
    }

    async fn remove_edges(&self, _keys: &[EdgeKey]) -> camille_index::Result<usize> {
        refused()
    }

    async fn get_node(&self, _id: &NodeId) -> camille_index::Result<Option<Node>> {
        refused()
    }

    async fn find_nodes(&self, _query: &NodeQuery) -> camille_index::Result<Vec<Node>> {
        refused()
    }

    async fn get_relationships(
        &self,
        _id: &NodeId,
        _direction: Direction,
    ) -> camille_index::Result<Vec<RelatedNode>> {
        refused()
    }

    async fn query(&self, _query: &GraphQuery) -> camille_index::Result<Vec<Node>> {
        refused()
    }

    async fn node_count(&self) -> camille_index::Result<usize> {
        refused()
    }

    async fn edge_count(&self) -> camille_index::Result<usize> {
        refused()
    }

    async fn is_ready(&self) -> bool {
        false
    }

    async fn health(&self) -> camille_index::Result<()> {
        Err(IndexError::StoreUnavailable {
            store: "graph",
            message: "connection refused".to_string(),
        })
    }
}

#[tokio::test]
async fn resolution_without_a_graph_reports_store_unavailable() {
    let (_temp, root) = project();
    let indexer = IncrementalIndexer::builder(&root)
        .config(config())
        .graph_store(Arc::new(UnreachableGraph))
        .build()
        .await
        .unwrap();
    assert!(!indexer.capabilities().structural);

    let err = indexer.trigger_resolution(false).await.unwrap_err();
    assert!(
        matches!(err, IndexError::StoreUnavailable { store: "graph", .. }),
        "unexpected error: {err}"
    );
    indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_indexer_on_the_same_cache_is_refused() {
    let (_temp, root) = project();
    let first = start(&root, config()).await;

    let err = IncrementalIndexer::builder(&root)
        .config(config())
        .build()
        .await
        .err()
        .expect("lock should be held");
    assert!(matches!(err, IndexError::LockHeld { .. }));

    first.indexer.shutdown().await.unwrap();
    drop(first);
    let again = start(&root, config()).await;
    again.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn corrupt_manifest_reindexes_everything() {
    let (_temp, root) = project();
    {
        let h = indexed(&root).await;
        h.indexer.shutdown().await.unwrap();
    }
    assert!(root.join(".camille/manifest.json").exists());
    fs::write(root.join(".camille/manifest.json"), "{ not json").unwrap();

    let h = start(&root, config()).await;
    assert_eq!(h.indexer.add_directory(&root).await.unwrap(), 3);
    h.indexer.wait_until_ready().await.unwrap();
    assert_eq!(h.indexer.status().await.files_indexed, 3);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn discarded_pending_edges_keep_graph_edges() {
    let (_temp, root) = project();
    let config = IndexConfig {
        retain_pending_edges: false,
        ..config()
    };
    let h = start(&root, config).await;
    h.indexer.add_directory(&root).await.unwrap();
    h.indexer.wait_until_ready().await.unwrap();
    let edges = h.indexer.status().await.edge_count;
    assert!(edges > 0);

    let report = h.indexer.trigger_resolution(false).await.unwrap();
    assert_eq!(report.stats.total(), 0);
    assert_eq!(report.edges_removed, 0);
    assert_eq!(h.indexer.status().await.edge_count, edges);
    assert_eq!(names_of(h.indexer.callers("helper").await.unwrap()), vec!["run".to_string()]);

    // A re-parse brings the pending edges back.
    let report = h.indexer.trigger_resolution(true).await.unwrap();
    assert!(report.stats.resolved > 0);
    assert_eq!(h.indexer.status().await.edge_count, edges);
    h.indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn fresh_build_discards_the_manifest() {
    let (_temp, root) = project();
    {
        let h = indexed(&root).await;
        h.indexer.shutdown().await.unwrap();
    }
    let indexer = IncrementalIndexer::builder(&root)
        .config(config())
        .fresh(true)
        .build()
        .await
        .unwrap();
    assert!(!root.join(".camille/manifest.json").exists());
    assert_eq!(indexer.add_directory(&root).await.unwrap(), 3);
    indexer.wait_until_ready().await.unwrap();
    indexer.shutdown().await.unwrap();
}

#[tokio::test]
async fn oversized_file_stays_stale_without_blocking_the_rest() {
    let (_temp, root) = project();
    write(&root, "src/huge.ts", &"// filler\n".repeat(200));
    let config = IndexConfig {
        max_file_size: 1024,
        ..config()
    };
    let h = start(&root, config).await;
    h.indexer.add_directory(&root).await.unwrap();
    h.indexer.wait_until_ready().await.unwrap();

    let status = h.indexer.status().await;
    assert_eq!(status.files_indexed, 3);
    assert!(h.indexer.file_changed(&root.join("src/huge.ts")));
    h.indexer.wait_until_ready().await.unwrap();
    h.indexer.shutdown().await.unwrap();
}
