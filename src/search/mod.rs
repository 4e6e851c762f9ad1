//! Unified search over the graph and vector stores.
//!
//! Pipeline:
//! 1. Semantic signal: embed the query, nearest neighbours from the vector store
//! 2. Structural signal: names, kinds and file paths mentioned in the query,
//!    looked up directly in the graph store
//! 3. Merge by node id, rank by tier then similarity
//!
//! The two signals run concurrently. Either may fail or be disabled; the
//! other still answers and the failure is reported as degraded.

mod hints;

pub use hints::{KindHint, NameHint, QueryHints, extract_hints};

use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::state::Signal;
use crate::store::{GraphStore, NodeQuery, VectorFilter, VectorStore, cosine_similarity};
use crate::types::{Direction, Node, NodeBrief, NodeId, NodeKind, RelatedNode};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-query options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub limit: usize,
    /// Attach one-hop relationships to each result (display only).
    pub include_relationships: bool,
    /// Only return nodes of these kinds.
    pub kinds: Option<Vec<NodeKind>>,
    /// Only return nodes in files under this prefix.
    pub path_prefix: Option<PathBuf>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            include_relationships: false,
            kinds: None,
            path_prefix: None,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    fn filter(&self) -> VectorFilter {
        VectorFilter {
            kinds: self.kinds.clone(),
            path_prefix: self.path_prefix.clone(),
        }
    }

    fn accepts(&self, node: &Node) -> bool {
        self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&node.kind))
            && self
                .path_prefix
                .as_ref()
                .is_none_or(|prefix| node.file.starts_with(prefix))
    }
}

/// How a result was found. Higher tiers always rank first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Only similar to the query.
    Semantic,
    /// In a file the query mentions.
    FileMention,
    /// Named in the query.
    ExactName,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub node: NodeBrief,
    pub tier: MatchTier,
    /// Cosine similarity to the query, 0 when unknown.
    pub similarity: f32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<RelatedNode>,
}

/// Ranked results plus the signals that could not contribute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub degraded: Vec<Signal>,
}

#[derive(Debug, Clone)]
struct Candidate {
    node: NodeBrief,
    tier: MatchTier,
    /// Kind preferred by the name hint that found it.
    preferred: bool,
    similarity: f32,
}

impl Candidate {
    fn absorb(&mut self, other: Candidate) {
        self.tier = self.tier.max(other.tier);
        self.preferred |= other.preferred;
        self.similarity = self.similarity.max(other.similarity);
    }
}

fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.tier
        .cmp(&a.tier)
        .then_with(|| b.preferred.cmp(&a.preferred))
        .then_with(|| b.similarity.total_cmp(&a.similarity))
        .then_with(|| a.node.name.cmp(&b.node.name))
        .then_with(|| a.node.file.cmp(&b.node.file))
        .then_with(|| a.node.line.cmp(&b.node.line))
        .then_with(|| a.node.id.cmp(&b.node.id))
}

pub struct UnifiedSearchEngine {
    graph: Option<Arc<dyn GraphStore>>,
    vectors: Option<Arc<dyn VectorStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: SearchConfig,
}

impl UnifiedSearchEngine {
    pub fn new(
        graph: Option<Arc<dyn GraphStore>>,
        vectors: Option<Arc<dyn VectorStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
    ) -> Self {
        Self {
            graph,
            vectors,
            embedder,
            config,
        }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchOutcome {
        let mut degraded = Vec::new();

        let query_embedding = match self.embedder.embed(query).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                warn!("query embedding failed: {err}");
                None
            }
        };

        let (semantic, structural) = tokio::join!(
            self.semantic_signal(query_embedding.as_deref(), options),
            self.structural_signal(query, query_embedding.as_deref(), options),
        );

        let mut merged: HashMap<NodeId, Candidate> = HashMap::new();
        for signal in [semantic, structural] {
            match signal {
                Ok(candidates) => {
                    for candidate in candidates {
                        match merged.get_mut(&candidate.node.id) {
                            Some(existing) => existing.absorb(candidate),
                            None => {
                                merged.insert(candidate.node.id.clone(), candidate);
                            }
                        }
                    }
                }
                Err(signal) => degraded.push(signal),
            }
        }

        let mut ranked: Vec<Candidate> = merged.into_values().collect();
        ranked.sort_by(rank);
        ranked.truncate(options.limit);

        let mut results = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            let relationships = if options.include_relationships {
                self.relationships(&candidate.node.id).await
            } else {
                Vec::new()
            };
            results.push(SearchResult {
                node: candidate.node,
                tier: candidate.tier,
                similarity: candidate.similarity,
                relationships,
            });
        }

        debug!(query, results = results.len(), ?degraded, "search complete");
        SearchOutcome { results, degraded }
    }

    async fn semantic_signal(
        &self,
        query_embedding: Option<&[f32]>,
        options: &SearchOptions,
    ) -> Result<Vec<Candidate>, Signal> {
        let (Some(vectors), Some(embedding)) = (&self.vectors, query_embedding) else {
            return Err(Signal::Semantic);
        };
        let limit = self.config.semantic_candidates.max(options.limit);
        let filter = options.filter();
        let matches = vectors
            .search(embedding, limit, Some(&filter))
            .await
            .map_err(|err| {
                warn!("semantic search failed: {err}");
                Signal::Semantic
            })?;

        Ok(matches
            .into_iter()
            .map(|m| Candidate {
                node: NodeBrief {
                    id: m.metadata.node_id,
                    kind: m.metadata.kind,
                    name: m.metadata.name,
                    file: m.metadata.file,
                    line: m.metadata.line,
                },
                tier: MatchTier::Semantic,
                preferred: false,
                similarity: m.similarity,
            })
            .collect())
    }

    async fn structural_signal(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        options: &SearchOptions,
    ) -> Result<Vec<Candidate>, Signal> {
        let Some(graph) = &self.graph else {
            return Err(Signal::Structural);
        };
        let hints = extract_hints(query, self.config.min_token_len);
        if hints.is_empty() {
            return Ok(Vec::new());
        }

        let failed = |err: crate::error::IndexError| {
            warn!("structural search failed: {err}");
            Signal::Structural
        };

        let mut found: Vec<(Node, MatchTier, bool)> = Vec::new();
        for hint in &hints.names {
            let mut lookup = NodeQuery::named(hint.name.clone());
            if let KindHint::Exactly(kind) = hint.kind {
                lookup = lookup.kind(kind);
            }
            let nodes = graph.find_nodes(&lookup).await.map_err(failed)?;
            found.extend(
                nodes
                    .into_iter()
                    .filter(|n| hint.kind.accepts(n.kind))
                    .map(|n| {
                        let preferred = hint.kind.prefers(n.kind);
                        (n, MatchTier::ExactName, preferred)
                    }),
            );
        }
        for mention in &hints.files {
            let nodes = graph
                .find_nodes(&NodeQuery::all().file_suffix(mention.clone()))
                .await
                .map_err(failed)?;
            found.extend(nodes.into_iter().map(|n| (n, MatchTier::FileMention, false)));
        }

        Ok(found
            .into_iter()
            .filter(|(node, _, _)| options.accepts(node))
            .map(|(node, tier, preferred)| {
                let similarity = match (query_embedding, &node.summary_embedding) {
                    (Some(query), Some(summary)) => cosine_similarity(query, summary),
                    _ => 0.0,
                };
                Candidate {
                    node: node.brief(),
                    tier,
                    preferred,
                    similarity,
                }
            })
            .collect())
    }

    async fn relationships(&self, id: &NodeId) -> Vec<RelatedNode> {
        let Some(graph) = &self.graph else {
            return Vec::new();
        };
        graph
            .get_relationships(id, Direction::Both)
            .await
            .unwrap_or_else(|err| {
                warn!(node = %id, "relationship expansion failed: {err}");
                Vec::new()
            })
    }
}
