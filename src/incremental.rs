//! Incremental indexing engine.
//!
//! `IncrementalIndexer` owns the pipeline: staleness checks feed the
//! scheduler, workers ingest files, and a single coordinator task applies
//! every outcome to the pending-edge buffer. When the scheduler drains and no
//! directory scan is still running, the coordinator runs a resolution pass.
//! Search may run at any time against the partially resolved store.

use crate::buffer::PendingEdgeBuffer;
use crate::cache;
use crate::config::IndexConfig;
use crate::discovery::{FileDiscovery, PathFilter};
use crate::embedding::{CachedEmbedder, EmbeddingProvider, HashingEmbedder};
use crate::error::{IndexError, Result};
use crate::ingest::{IngestOutcome, Ingestor, Stores, StructureLedger};
use crate::lock::IndexLock;
use crate::parsing::ParserRegistry;
use crate::resolver::{EdgeResolver, ResolutionReport};
use crate::scheduler::{Completion, IndexingScheduler, Job};
use crate::search::{SearchOptions, UnifiedSearchEngine};
use crate::staleness::StalenessTracker;
use crate::state::{Capabilities, IndexStatus, Readiness, ResolverPhase};
use crate::store::{GraphQuery, GraphStore, Hop, HnswVectorStore, MemoryGraphStore, NodeQuery, VectorStore};
use crate::types::{Node, RelationshipKind};
use crate::watcher::WatchEvent;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Search results with the readiness of the index that produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<crate::search::SearchResult>,
    pub readiness: Readiness,
}

enum Command {
    /// Drop everything known about `path` (a file or a directory).
    Evict {
        path: PathBuf,
        reply: oneshot::Sender<usize>,
    },
    Resolve {
        force_reparse: bool,
        reply: oneshot::Sender<Result<ResolutionReport>>,
    },
    /// A directory scan or change notification finished enqueuing.
    JobFinished,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// State shared by the handle and the coordinator.
struct Shared {
    config: IndexConfig,
    cache_dir: PathBuf,
    tracker: Arc<StalenessTracker>,
    ledger: Arc<StructureLedger>,
    ingestor: Arc<Ingestor>,
    scheduler: Arc<IndexingScheduler<IngestOutcome>>,
    stores: Stores,
    capabilities: Capabilities,
    search: UnifiedSearchEngine,
    embedder: Arc<CachedEmbedder>,
    discovery: FileDiscovery,
    phase: watch::Sender<ResolverPhase>,
    active_jobs: AtomicUsize,
    roots: RwLock<BTreeSet<PathBuf>>,
    last_report: RwLock<Option<ResolutionReport>>,
}

impl Shared {
    fn is_watched(&self, path: &Path) -> bool {
        self.roots.read().iter().any(|root| path.starts_with(root))
    }

    fn root_of(&self, path: &Path) -> Option<PathBuf> {
        self.roots
            .read()
            .iter()
            .find(|root| path.starts_with(root))
            .cloned()
    }

    fn is_quiescent(&self) -> bool {
        self.scheduler.is_idle() && self.active_jobs.load(Ordering::SeqCst) == 0
    }

    fn flush(&self) {
        if let Err(err) = self.tracker.flush() {
            warn!("failed to persist staleness manifest: {err}");
        }
        if let Err(err) = self.embedder.flush() {
            warn!("failed to persist embedding cache: {err}");
        }
    }
}

/// Marks an ingestion job (directory scan, change notification) as active.
/// Resolution waits for every job to finish.
struct JobGuard {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
        let _ = self.commands.send(Command::JobFinished);
    }
}

/// Builder for [`IncrementalIndexer`]. Unset stores and providers fall back
/// to the bundled in-memory stores and the hashing embedder.
pub struct IndexerBuilder {
    root: PathBuf,
    config: Option<IndexConfig>,
    graph: Option<Arc<dyn GraphStore>>,
    vectors: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    parsers: Option<ParserRegistry>,
    fresh: bool,
}

impl IndexerBuilder {
    /// Discard the persisted manifest and embedding cache once the lock is
    /// held, so every file is reindexed.
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn config(mut self, config: IndexConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn graph_store(mut self, graph: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn vector_store(mut self, vectors: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = Some(parsers);
        self
    }

    /// Acquire the lock, health-check the stores and start the coordinator.
    pub async fn build(self) -> Result<IncrementalIndexer> {
        let config = match self.config {
            Some(config) => config,
            None => IndexConfig::load(&self.root)?,
        };
        let cache_dir = config.cache_path(&self.root);
        let lock = IndexLock::acquire(&cache_dir)?;
        if self.fresh {
            cache::clear_cache(&cache_dir)?;
        }

        let tracker = Arc::new(StalenessTracker::open(&cache_dir));
        if tracker.recovered_from_corruption() {
            warn!("staleness manifest discarded, every file will be reindexed");
        }

        let inner: Arc<dyn EmbeddingProvider> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::default()),
        };
        let embedder = Arc::new(CachedEmbedder::persistent(inner, &cache_dir));

        let graph: Arc<dyn GraphStore> = match self.graph {
            Some(graph) => graph,
            None => Arc::new(MemoryGraphStore::new()),
        };
        let vectors: Arc<dyn VectorStore> = match self.vectors {
            Some(vectors) => vectors,
            None => Arc::new(HnswVectorStore::new()),
        };

        let graph = match graph.health().await {
            Ok(()) => Some(graph),
            Err(err) => {
                warn!("graph store unavailable, structural features disabled: {err}");
                None
            }
        };
        let vectors = match vectors.health().await {
            Ok(()) => Some(vectors),
            Err(err) => {
                warn!("vector store unavailable, semantic search disabled: {err}");
                None
            }
        };
        let capabilities = Capabilities {
            structural: graph.is_some(),
            semantic: vectors.is_some(),
        };
        let stores = Stores { graph, vectors };

        let ledger = Arc::new(StructureLedger::new());
        let ingestor = Arc::new(Ingestor::new(
            self.parsers.unwrap_or_else(ParserRegistry::with_defaults),
            stores.clone(),
            embedder.clone(),
            Arc::clone(&tracker),
            Arc::clone(&ledger),
            config.max_file_size,
        ));

        let job_ingestor = Arc::clone(&ingestor);
        let job: Job<IngestOutcome> = Arc::new(move |path| {
            let ingestor = Arc::clone(&job_ingestor);
            async move { ingestor.ingest(path).await }.boxed()
        });
        let (scheduler, completions) = IndexingScheduler::new(config.worker_count(), job);

        let discovery = FileDiscovery::from_config(&config).map_err(|e| IndexError::Config {
            path: cache_dir.clone(),
            message: e.to_string(),
        })?;

        let search = UnifiedSearchEngine::new(
            stores.graph.clone(),
            stores.vectors.clone(),
            embedder.clone(),
            config.search.clone(),
        );
        let (phase, _) = watch::channel(ResolverPhase::Idle);

        let shared = Arc::new(Shared {
            config,
            cache_dir,
            tracker,
            ledger,
            ingestor,
            scheduler: Arc::new(scheduler),
            stores,
            capabilities,
            search,
            embedder,
            discovery,
            phase,
            active_jobs: AtomicUsize::new(0),
            roots: RwLock::new(BTreeSet::new()),
            last_report: RwLock::new(None),
        });

        let (commands, command_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            shared: Arc::clone(&shared),
            buffer: PendingEdgeBuffer::new(),
            resolver: EdgeResolver::new(),
            completions,
            commands: command_rx,
            waiters: Vec::new(),
        };
        let handle = tokio::spawn(coordinator.run());

        info!(
            cache = %shared.cache_dir.display(),
            workers = shared.scheduler.workers(),
            structural = capabilities.structural,
            semantic = capabilities.semantic,
            "indexer started"
        );

        Ok(IncrementalIndexer {
            shared,
            commands,
            coordinator: Mutex::new(Some(handle)),
            _lock: lock,
        })
    }
}

/// Handle to a running indexer.
pub struct IncrementalIndexer {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    _lock: IndexLock,
}

impl IncrementalIndexer {
    /// Builder whose cache lives under `root`.
    pub fn builder(root: impl Into<PathBuf>) -> IndexerBuilder {
        IndexerBuilder {
            root: root.into(),
            config: None,
            graph: None,
            vectors: None,
            embedder: None,
            parsers: None,
            fresh: false,
        }
    }

    /// Open an indexer with the configuration found under `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(root).build().await
    }

    pub fn config(&self) -> &IndexConfig {
        &self.shared.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.capabilities
    }

    fn begin_job(&self) -> JobGuard {
        self.shared.active_jobs.fetch_add(1, Ordering::SeqCst);
        self.shared.phase.send_replace(ResolverPhase::Collecting);
        JobGuard {
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }

    fn wants_ingest(&self, path: &Path) -> bool {
        self.shared.tracker.needs_reindex(path) || !self.shared.ledger.contains(path)
    }

    /// Start watching `dir`: discover its files and queue the stale ones.
    /// Returns the number of files queued.
    pub async fn add_directory(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let root = dir.canonicalize().map_err(|e| IndexError::io(dir, e))?;
        let _job = self.begin_job();
        self.shared.roots.write().insert(root.clone());

        let discovery = self.shared.discovery.clone();
        let scan_root = root.clone();
        let files = tokio::task::spawn_blocking(move || discovery.discover(&scan_root))
            .await
            .map_err(|e| IndexError::Discovery {
                root: root.clone(),
                message: e.to_string(),
            })?
            .map_err(|e| IndexError::Discovery {
                root: root.clone(),
                message: e.to_string(),
            })?;

        // Files deleted while nobody was watching.
        let discovered: BTreeSet<&PathBuf> = files.iter().collect();
        for tracked in self.shared.tracker.tracked_files() {
            if tracked.starts_with(&root) && !discovered.contains(&tracked) {
                self.shared.tracker.forget(&tracked);
            }
        }

        let mut queued = 0;
        for file in &files {
            if !self.shared.ingestor.supports(file) || !self.wants_ingest(file) {
                continue;
            }
            if self.shared.scheduler.enqueue(file.clone()) {
                queued += 1;
            }
        }
        info!(
            root = %root.display(),
            discovered = files.len(),
            queued,
            "directory added"
        );
        Ok(queued)
    }

    /// Stop watching `dir` and evict its nodes, edges and pending entries.
    /// Returns the number of nodes removed.
    pub async fn remove_directory(&self, dir: impl AsRef<Path>) -> Result<usize> {
        let dir = dir.as_ref();
        let root = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        {
            let mut roots = self.shared.roots.write();
            roots.retain(|r| !r.starts_with(&root));
        }
        if self.shared.is_watched(&root) {
            debug!(dir = %root.display(), "still covered by another root, nothing evicted");
            return Ok(0);
        }
        let removed = self.evict(root.clone()).await?;
        info!(dir = %root.display(), nodes = removed, "directory removed");
        Ok(removed)
    }

    /// A file was created or modified. Returns whether it was queued.
    pub fn file_changed(&self, path: &Path) -> bool {
        let Some(root) = self.shared.root_of(path) else {
            return false;
        };
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let excluded = self.shared.discovery.path_filter().is_excluded(relative);
        if excluded || !self.shared.ingestor.supports(path) {
            return false;
        }
        let _job = self.begin_job();
        self.wants_ingest(path) && self.shared.scheduler.enqueue(path.to_path_buf())
    }

    /// A file (or directory) disappeared.
    pub async fn file_removed(&self, path: &Path) -> Result<usize> {
        if !self.shared.is_watched(path) {
            return Ok(0);
        }
        self.evict(path.to_path_buf()).await
    }

    async fn evict(&self, path: PathBuf) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Evict { path, reply })
            .map_err(|_| IndexError::ShutDown)?;
        rx.await.map_err(|_| IndexError::ShutDown)
    }

    /// Run a resolution pass once ingestion has drained. With
    /// `force_reparse`, every indexed file is parsed again first.
    pub async fn trigger_resolution(&self, force_reparse: bool) -> Result<ResolutionReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Resolve {
                force_reparse,
                reply,
            })
            .map_err(|_| IndexError::ShutDown)?;
        rx.await.map_err(|_| IndexError::ShutDown)?
    }

    /// Wait until ingestion has drained and the last pass has finished.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut phase = self.shared.phase.subscribe();
        loop {
            if *phase.borrow_and_update() == ResolverPhase::Idle && self.shared.is_quiescent() {
                return Ok(());
            }
            phase.changed().await.map_err(|_| IndexError::ShutDown)?;
        }
    }

    fn readiness(&self) -> Readiness {
        let last = self.shared.last_report.read().clone();
        Readiness::derive(
            *self.shared.phase.borrow(),
            self.shared.scheduler.size(),
            self.shared.ledger.len(),
            last.as_ref().map(|r| &r.stats),
            self.shared.capabilities,
        )
    }

    pub async fn status(&self) -> IndexStatus {
        let (node_count, edge_count) = match &self.shared.stores.graph {
            Some(graph) => (
                graph.node_count().await.unwrap_or_else(|err| {
                    warn!("node count failed: {err}");
                    0
                }),
                graph.edge_count().await.unwrap_or_else(|err| {
                    warn!("edge count failed: {err}");
                    0
                }),
            ),
            None => (0, 0),
        };
        let phase = *self.shared.phase.borrow();
        let queue_size = self.shared.scheduler.size();
        let last_report = self.shared.last_report.read().clone();

        IndexStatus {
            files_indexed: self.shared.ledger.len(),
            queue_size,
            node_count,
            edge_count,
            ready: phase == ResolverPhase::Idle && self.shared.is_quiescent(),
            last_resolution: last_report.as_ref().map(|r| r.stats),
            generation: last_report.as_ref().map_or(0, |r| r.generation),
            last_report,
            phase,
            capabilities: self.shared.capabilities,
            watched_roots: self.shared.roots.read().iter().cloned().collect(),
            readiness: self.readiness(),
        }
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> SearchResponse {
        let outcome = self.shared.search.search(query, options).await;
        let mut readiness = self.readiness();
        for signal in outcome.degraded {
            if !readiness.degraded.contains(&signal) {
                readiness.degraded.push(signal);
            }
        }
        readiness.degraded.sort();
        SearchResponse {
            query: query.to_string(),
            results: outcome.results,
            readiness,
        }
    }

    fn graph(&self) -> Result<&Arc<dyn GraphStore>> {
        self.shared
            .stores
            .graph
            .as_ref()
            .ok_or_else(|| IndexError::StoreUnavailable {
                store: "graph",
                message: "disabled at startup".to_string(),
            })
    }

    /// Nodes with a `calls` edge into any node named `name`.
    pub async fn callers(&self, name: &str) -> Result<Vec<Node>> {
        let query = GraphQuery::from(NodeQuery::named(name)).hop(Hop::incoming(RelationshipKind::Calls));
        self.graph()?.query(&query).await
    }

    /// Nodes called by any node named `name`.
    pub async fn callees(&self, name: &str) -> Result<Vec<Node>> {
        let query = GraphQuery::from(NodeQuery::named(name)).hop(Hop::outgoing(RelationshipKind::Calls));
        self.graph()?.query(&query).await
    }

    /// Route watcher events until the channel closes.
    pub async fn run_watch_loop(&self, mut events: mpsc::Receiver<WatchEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                WatchEvent::Changed(path) => {
                    if self.file_changed(&path) {
                        debug!(path = %path.display(), "queued changed file");
                    }
                }
                WatchEvent::Removed(path) => {
                    if let Err(err) = self.file_removed(&path).await {
                        warn!(path = %path.display(), "eviction failed: {err}");
                        return;
                    }
                }
            }
        }
    }

    /// Exclude rules for watcher events.
    pub fn path_filter(&self) -> PathFilter {
        self.shared.discovery.path_filter().clone()
    }

    pub fn watched_roots(&self) -> Vec<PathBuf> {
        self.shared.roots.read().iter().cloned().collect()
    }

    /// Abort in-flight work, persist the manifest and caches, and stop the
    /// coordinator. Files that were in flight stay stale.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
        let handle = self.coordinator.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| IndexError::Store(format!("coordinator task failed: {e}")))?;
        }
        Ok(())
    }
}

/// Single writer of the buffer and the ledger.
struct Coordinator {
    shared: Arc<Shared>,
    buffer: PendingEdgeBuffer,
    resolver: EdgeResolver,
    completions: mpsc::UnboundedReceiver<Completion<IngestOutcome>>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Callers waiting for the next pass.
    waiters: Vec<oneshot::Sender<Result<ResolutionReport>>>,
}

impl Coordinator {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(completion) = self.completions.recv() => {
                    self.on_completion(completion).await;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.stop();
                        break;
                    }
                },
            }
        }
        debug!("coordinator stopped");
    }

    fn stop(&mut self) {
        self.shared.scheduler.shutdown();
        self.shared.flush();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(IndexError::ShutDown));
        }
    }

    async fn on_completion(&mut self, completion: Completion<IngestOutcome>) {
        let Completion { path, result } = completion;
        match result {
            Ok(_) if !self.shared.is_watched(&path) => {
                debug!(path = %path.display(), "discarding result for unwatched file");
                self.shared.ingestor.evict_file(&path).await;
                self.shared.tracker.forget(&path);
            }
            Ok(outcome) => {
                self.shared.tracker.record(&path, outcome.fingerprint.clone());
                if let Some(parsed) = outcome.parsed {
                    self.shared
                        .ledger
                        .insert(path.clone(), outcome.fingerprint.content_hash);
                    self.buffer
                        .replace(path.clone(), parsed.pending_edges, parsed.imports, parsed.exports);
                }
            }
            Err(failure) => {
                self.shared.tracker.invalidate(&path);
                debug!(path = %path.display(), "left stale after failure: {failure}");
            }
        }
        self.shared.scheduler.complete(&path);
        self.maybe_resolve().await;
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Evict { path, reply } => {
                let removed = self.shared.ingestor.evict_under(&path).await;
                self.shared.tracker.forget_under(&path);
                self.buffer.remove_under(&path);
                self.resolver.forget_under(&path);
                let _ = reply.send(removed);
                self.maybe_resolve().await;
            }
            Command::Resolve {
                force_reparse,
                reply,
            } => {
                if force_reparse {
                    let mut files: BTreeSet<PathBuf> = self.shared.ledger.files().into_iter().collect();
                    files.extend(self.buffer.entries().map(|(f, _)| f.clone()));
                    self.shared.ledger.clear();
                    self.shared.phase.send_replace(ResolverPhase::Collecting);
                    let mut queued = 0;
                    for file in files.into_iter().filter(|f| self.shared.is_watched(f)) {
                        if self.shared.scheduler.enqueue(file) {
                            queued += 1;
                        }
                    }
                    info!(files = queued, "re-parsing every indexed file");
                }
                self.buffer.mark_dirty();
                self.waiters.push(reply);
                self.maybe_resolve().await;
            }
            Command::JobFinished => self.maybe_resolve().await,
            Command::Shutdown { .. } => {}
        }
    }

    /// Resolve once nothing is queued and no job is active.
    async fn maybe_resolve(&mut self) {
        if !self.shared.is_quiescent() {
            return;
        }
        if self.buffer.is_dirty() || !self.waiters.is_empty() {
            self.resolve().await;
        } else {
            // Always publish: a waiter may have observed a job start after
            // the phase last changed.
            self.shared.phase.send_replace(ResolverPhase::Idle);
        }
    }

    async fn resolve(&mut self) {
        self.shared.phase.send_replace(ResolverPhase::Resolving);

        let result = match &self.shared.stores.graph {
            Some(graph) => self.resolver.run(&self.buffer, graph.as_ref()).await,
            None => Err(IndexError::StoreUnavailable {
                store: "graph",
                message: "disabled at startup".to_string(),
            }),
        };

        match &result {
            Ok(report) => {
                self.buffer.mark_clean();
                if !self.shared.config.retain_pending_edges {
                    self.buffer.discard_pending_edges();
                }
                *self.shared.last_report.write() = Some(report.clone());
            }
            Err(err) => warn!("resolution pass failed: {err}"),
        }
        self.shared.flush();

        for waiter in self.waiters.drain(..) {
            let reply = match &result {
                Ok(report) => Ok(report.clone()),
                Err(err) => Err(err.duplicate()),
            };
            let _ = waiter.send(reply);
        }

        let next = if self.shared.is_quiescent() {
            ResolverPhase::Idle
        } else {
            ResolverPhase::Collecting
        };
        self.shared.phase.send_replace(next);
    }
}
