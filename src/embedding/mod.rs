//! Embedding providers.
//!
//! The indexer asks for two embeddings per node (name and summary) and one
//! per search query. Providers are wrapped in a `CachedEmbedder` so
//! unchanged text is never embedded twice, even across restarts.

pub mod hashing;

#[cfg(feature = "fastembed")]
pub mod fastembed;

pub use hashing::HashingEmbedder;

#[cfg(feature = "fastembed")]
pub use self::fastembed::FastEmbedProvider;

use crate::cache;
use crate::error::Result;
use crate::types::Node;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Turns text into a dense vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifies the model; vectors from different providers never mix.
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

// ============================================================================
// Embedding Text
// ============================================================================

/// Text for the name embedding: the identifier split into words.
pub fn name_text(node: &Node) -> String {
    split_identifier(&node.name).join(" ")
}

/// Text for the summary embedding: everything known about the node.
pub fn summary_text(node: &Node) -> String {
    let mut parts = Vec::new();

    parts.push(format!("{} {}", node.kind.as_str(), node.name));

    let words = split_identifier(&node.name);
    if words.len() > 1 {
        parts.push(words.join(" "));
    }

    if let Some(owner) = node.metadata.owner() {
        parts.push(format!("member of {owner}"));
    }

    if let Some(signature) = node.metadata.signature() {
        parts.push(signature.render(&node.name));
    }

    if let Some(doc) = &node.doc {
        parts.push(doc.clone());
    }

    if let Some(file_name) = node.file.file_name() {
        parts.push(format!("in {}", file_name.to_string_lossy()));
    }

    parts.join("\n")
}

/// Split `parseHTTPConfig_v2` into `["parse", "http", "config", "v2"]`.
pub fn split_identifier(ident: &str) -> Vec<String> {
    let mut words = Vec::new();
    for chunk in ident.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = chunk.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = i > 0
                && c.is_uppercase()
                && (chars[i - 1].is_lowercase()
                    || chars[i - 1].is_ascii_digit()
                    || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
            if boundary && !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            current.extend(c.to_lowercase());
        }
        if !current.is_empty() {
            words.push(current);
        }
    }
    words
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    provider: String,
    entries: Vec<(String, Vec<f32>)>,
}

/// Content-addressed cache in front of another provider.
///
/// Keys are `sha256(text)`; the cache file records the provider name and is
/// ignored when it was written by a different provider.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    entries: DashMap<String, Vec<f32>>,
    path: Option<PathBuf>,
    dirty: AtomicBool,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            path: None,
            dirty: AtomicBool::new(false),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Cache persisted under `cache_dir`. An unreadable file starts empty.
    pub fn persistent(inner: Arc<dyn EmbeddingProvider>, cache_dir: &std::path::Path) -> Self {
        let path = cache::embeddings_path(cache_dir);
        let mut embedder = Self::new(inner);

        match cache::load_bincode::<CacheFile>(&path) {
            Ok(Some(file)) if file.provider == embedder.inner.name() => {
                debug!(entries = file.entries.len(), "loaded embedding cache");
                embedder.entries = file.entries.into_iter().collect();
            }
            Ok(Some(file)) => {
                debug!(
                    cached = %file.provider,
                    current = %embedder.inner.name(),
                    "embedding cache belongs to another provider, starting empty"
                );
            }
            Ok(None) => {}
            Err(err) => warn!(path = %path.display(), "ignoring unreadable embedding cache: {err}"),
        }

        embedder.path = Some(path);
        embedder
    }

    fn key(text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Persist new entries, if any.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut entries: Vec<(String, Vec<f32>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let file = CacheFile {
            provider: self.inner.name().to_string(),
            entries,
        };
        if let Err(err) = cache::save_bincode(path, &file) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::key(text);
        if let Some(hit) = self.entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.inner.embed(text).await?;
        self.entries.insert(key, vector.clone());
        self.dirty.store(true, Ordering::SeqCst);
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::types::{NodeMetadata, Signature};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.is_empty() {
                return Err(IndexError::Embedding("empty text".to_string()));
            }
            Ok(vec![text.len() as f32])
        }
    }

    #[test]
    fn test_split_identifier() {
        assert_eq!(split_identifier("parseConfig"), vec!["parse", "config"]);
        assert_eq!(split_identifier("HTTPServer"), vec!["http", "server"]);
        assert_eq!(split_identifier("load_user_v2"), vec!["load", "user", "v2"]);
        assert_eq!(split_identifier("Repo"), vec!["repo"]);
    }

    #[test]
    fn test_summary_text() {
        let node = Node::new(
            "saveUser",
            "/repo/src/users.ts",
            4,
            NodeMetadata::Method {
                owner: "UserRepo".to_string(),
                signature: Signature {
                    params: vec!["user: User".to_string()],
                    return_type: Some("void".to_string()),
                    is_async: false,
                },
                is_static: false,
            },
        )
        .with_doc("Persists a user.");

        let text = summary_text(&node);
        assert!(text.contains("method saveUser"));
        assert!(text.contains("save user"));
        assert!(text.contains("member of UserRepo"));
        assert!(text.contains("saveUser(user: User): void"));
        assert!(text.contains("Persists a user."));
        assert!(text.contains("in users.ts"));
        assert_eq!(name_text(&node), "save user");
    }

    #[tokio::test]
    async fn test_cache_hits_skip_provider() {
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(inner.clone());

        let a = cached.embed("hello").await.unwrap();
        let b = cached.embed("hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.stats(), (1, 1));

        assert!(cached.embed("").await.is_err());
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_survives_restart() {
        let temp = tempfile::tempdir().unwrap();
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });

        let first = CachedEmbedder::persistent(inner.clone(), temp.path());
        first.embed("persist me").await.unwrap();
        first.flush().unwrap();

        let second = CachedEmbedder::persistent(inner.clone(), temp.path());
        assert_eq!(second.len(), 1);
        second.embed("persist me").await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_starts_empty() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(cache::embeddings_path(temp.path()), b"not bincode").unwrap();
        let inner = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::persistent(inner, temp.path());
        assert!(cached.is_empty());
    }
}
