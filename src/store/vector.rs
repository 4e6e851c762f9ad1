//! In-memory vector store backed by an HNSW index.
//!
//! Vectors are kept in a map and the HNSW graph is rebuilt lazily on the
//! first search after a mutation. Every mutation bumps a generation counter
//! and each built graph is stamped with the generation it was copied at, so a
//! graph built while writes were landing is replaced on the next search.
//!
//! Filtered searches, and unfiltered ones the graph cannot fill, fall back
//! to an exact scan.

use super::{VectorFilter, VectorId, VectorMatch, VectorMetadata, VectorStore, cosine_similarity};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use instant_distance::{Builder, HnswMap, Point, Search};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Wrapper for f32 vector to implement Point trait
#[derive(Debug, Clone)]
struct Embedding(Vec<f32>);

impl Point for Embedding {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - cosine similarity
        1.0 - cosine_similarity(&self.0, &other.0)
    }
}

/// A built graph and the generation its input was copied at.
struct Snapshot {
    generation: u64,
    hnsw: HnswMap<Embedding, VectorId>,
}

/// HNSW approximate nearest-neighbour store.
#[derive(Default)]
pub struct HnswVectorStore {
    entries: DashMap<VectorId, (Embedding, VectorMetadata)>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Bumped after every insert or delete.
    generation: AtomicU64,
    next_id: AtomicU64,
}

impl HnswVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// A graph no older than the current generation, building one if needed.
    fn current_snapshot(&self) -> Option<Arc<Snapshot>> {
        let generation = self.generation.load(Ordering::SeqCst);
        if let Some(snapshot) = self.snapshot.read().as_ref() {
            if snapshot.generation == generation {
                return Some(Arc::clone(snapshot));
            }
        }

        // Copied after reading the generation: a write racing the copy leaves
        // this snapshot stamped older than the store, forcing a later rebuild.
        let mut entries: Vec<(VectorId, Embedding)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().0.clone()))
            .collect();
        if entries.is_empty() {
            return None;
        }
        // Stable input order keeps rebuilt indexes comparable across runs.
        entries.sort_by_key(|(id, _)| *id);
        let (ids, values): (Vec<VectorId>, Vec<Embedding>) = entries.into_iter().unzip();
        let built = Arc::new(Snapshot {
            generation,
            hnsw: Builder::default().build(values, ids),
        });

        let mut slot = self.snapshot.write();
        let newer_installed = slot.as_ref().is_some_and(|s| s.generation > generation);
        if !newer_installed {
            *slot = Some(Arc::clone(&built));
        }
        Some(built)
    }

    fn approximate(&self, snapshot: &Snapshot, vector: &[f32], limit: usize) -> Vec<VectorMatch> {
        let query = Embedding(vector.to_vec());
        let mut search = Search::default();
        snapshot
            .hnsw
            .search(&query, &mut search)
            .filter_map(|item| {
                let id = *item.value;
                let metadata = self.entries.get(&id)?.value().1.clone();
                Some(VectorMatch {
                    id,
                    similarity: 1.0 - item.distance,
                    metadata,
                })
            })
            .take(limit)
            .collect()
    }

    fn exact(&self, vector: &[f32], limit: usize, filter: Option<&VectorFilter>) -> Vec<VectorMatch> {
        let mut matches: Vec<VectorMatch> = self
            .entries
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches(&entry.value().1)))
            .map(|entry| VectorMatch {
                id: *entry.key(),
                similarity: cosine_similarity(vector, &entry.value().0.0),
                metadata: entry.value().1.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity).then(a.id.cmp(&b.id)));
        matches.truncate(limit);
        matches
    }
}

#[async_trait]
impl VectorStore for HnswVectorStore {
    async fn index(&self, vector: Vec<f32>, metadata: VectorMetadata) -> Result<VectorId> {
        let id = VectorId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.insert(id, (Embedding(vector), metadata));
        self.touch();
        Ok(id)
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<VectorMatch>> {
        if limit == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        let filter = filter.filter(|f| !f.is_unrestricted());
        if filter.is_some() {
            return Ok(self.exact(vector, limit, filter));
        }

        let Some(snapshot) = self.current_snapshot() else {
            return Ok(Vec::new());
        };
        let results = self.approximate(&snapshot, vector, limit);
        // The graph's candidate pool is bounded; larger requests scan.
        if results.len() < limit.min(self.entries.len()) {
            return Ok(self.exact(vector, limit, None));
        }
        Ok(results)
    }

    async fn delete(&self, id: VectorId) -> Result<bool> {
        let existed = self.entries.remove(&id).is_some();
        if existed {
            self.touch();
        }
        Ok(existed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, NodeKind};
    use std::path::PathBuf;

    fn meta(name: &str, kind: NodeKind, file: &str) -> VectorMetadata {
        VectorMetadata {
            node_id: NodeId::from(name),
            kind,
            name: name.to_string(),
            file: PathBuf::from(file),
            line: 1,
        }
    }

    #[tokio::test]
    async fn test_nearest_first() {
        let store = HnswVectorStore::new();
        store
            .index(vec![1.0, 0.0, 0.0], meta("east", NodeKind::Function, "/r/a.ts"))
            .await
            .unwrap();
        store
            .index(vec![0.0, 1.0, 0.0], meta("north", NodeKind::Function, "/r/b.ts"))
            .await
            .unwrap();

        let results = store.search(&[0.9, 0.1, 0.0], 2, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].metadata.name, "east");
        assert!(results[0].similarity > results[1].similarity);
    }

    #[tokio::test]
    async fn test_filter_and_delete() {
        let store = HnswVectorStore::new();
        let class_id = store
            .index(vec![1.0, 0.0], meta("Repo", NodeKind::Class, "/r/src/repo.ts"))
            .await
            .unwrap();
        store
            .index(vec![1.0, 0.1], meta("save", NodeKind::Method, "/r/lib/repo.ts"))
            .await
            .unwrap();

        let only_classes = VectorFilter {
            kinds: Some(vec![NodeKind::Class]),
            path_prefix: None,
        };
        let results = store.search(&[1.0, 0.0], 10, Some(&only_classes)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.name, "Repo");

        assert!(store.delete(class_id).await.unwrap());
        assert!(!store.delete(class_id).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store
            .search(&[1.0, 0.0], 10, Some(&only_classes))
            .await
            .unwrap()
            .is_empty());
    }

    fn spread(i: usize) -> Vec<f32> {
        vec![1.0, i as f32 * 0.001, 0.0]
    }

    #[tokio::test]
    async fn test_filter_reaches_past_nearest_pool() {
        let store = HnswVectorStore::new();
        for i in 0..300 {
            store
                .index(spread(i), meta(&format!("f{i}"), NodeKind::Function, "/r/a.ts"))
                .await
                .unwrap();
        }
        store
            .index(vec![0.0, 0.0, 1.0], meta("Far", NodeKind::Class, "/r/far.ts"))
            .await
            .unwrap();

        let classes = VectorFilter {
            kinds: Some(vec![NodeKind::Class]),
            path_prefix: None,
        };
        let results = store.search(&[1.0, 0.0, 0.0], 10, Some(&classes)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata.name, "Far");

        let under_far = VectorFilter {
            kinds: None,
            path_prefix: Some(PathBuf::from("/r/far.ts")),
        };
        let results = store.search(&[1.0, 0.0, 0.0], 10, Some(&under_far)).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_large_limit_is_not_capped() {
        let store = HnswVectorStore::new();
        for i in 0..300 {
            store
                .index(spread(i), meta(&format!("f{i}"), NodeKind::Function, "/r/a.ts"))
                .await
                .unwrap();
        }
        let results = store.search(&[1.0, 0.0, 0.0], 250, None).await.unwrap();
        assert_eq!(results.len(), 250);
        assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let unrestricted = VectorFilter::default();
        let all = store.search(&[1.0, 0.0, 0.0], 10_000, Some(&unrestricted)).await.unwrap();
        assert_eq!(all.len(), 300);
    }

    #[tokio::test]
    async fn test_write_after_build_invalidates_graph() {
        let store = HnswVectorStore::new();
        store.index(spread(0), meta("a", NodeKind::Function, "/r/a.ts")).await.unwrap();
        store.search(&[1.0, 0.0, 0.0], 1, None).await.unwrap();
        let built = store.snapshot.read().as_ref().map(|s| s.generation);

        let late = store
            .index(vec![0.0, 1.0, 0.0], meta("late", NodeKind::Function, "/r/b.ts"))
            .await
            .unwrap();
        let results = store.search(&[0.0, 1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(results[0].id, late);
        let rebuilt = store.snapshot.read().as_ref().map(|s| s.generation);
        assert!(rebuilt > built);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_are_visible_after_searches() {
        for _ in 0..20 {
            let store = Arc::new(HnswVectorStore::new());
            for i in 0..40 {
                store
                    .index(spread(i), meta(&format!("f{i}"), NodeKind::Function, "/r/a.ts"))
                    .await
                    .unwrap();
            }

            let writer = {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for i in 40..60 {
                        store
                            .index(spread(i), meta(&format!("f{i}"), NodeKind::Function, "/r/b.ts"))
                            .await
                            .unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            };
            let reader = {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for _ in 0..20 {
                        store.search(&[1.0, 0.0, 0.0], 5, None).await.unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            };
            writer.await.unwrap();
            reader.await.unwrap();

            store.search(&[1.0, 0.0, 0.0], 5, None).await.unwrap();
            let installed = store.snapshot.read().as_ref().map(|s| s.generation);
            assert_eq!(installed, Some(store.generation.load(Ordering::SeqCst)));
            assert_eq!(store.search(&[1.0, 0.0, 0.0], 10_000, None).await.unwrap().len(), 60);
        }
    }
}
