//! Observable state of the indexer: resolver phase, capabilities, status
//! and readiness reports.

use crate::resolver::ResolutionReport;
use crate::types::ResolutionStats;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolver state machine.
///
/// `Collecting` while files are being ingested, `Resolving` during a pass,
/// `Idle` once a pass has finished and nothing changed since.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverPhase {
    Collecting,
    Resolving,
    Idle,
}

/// Which store-backed capabilities are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Graph store reachable: structure, edges and structural search.
    pub structural: bool,
    /// Vector store reachable: semantic search.
    pub semantic: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            structural: true,
            semantic: true,
        }
    }
}

/// A search signal that could not contribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Semantic,
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// Every known file is ingested and resolved.
    Ready,
    /// Files are queued or being ingested.
    Indexing,
    /// A resolution pass is running or pending.
    Resolving,
    /// Nothing has been indexed.
    Empty,
}

/// Lets callers tell "no results" from "index not ready" from "results may
/// be incomplete".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub state: ReadinessState,
    /// Unresolved references in the last pass.
    pub unresolved: usize,
    /// References dropped as ambiguous in the last pass.
    pub ambiguous: usize,
    pub degraded: Vec<Signal>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.state == ReadinessState::Ready
    }

    /// Derive the readiness from the indexer's counters.
    pub fn derive(
        phase: ResolverPhase,
        queue_size: usize,
        files_indexed: usize,
        last: Option<&ResolutionStats>,
        capabilities: Capabilities,
    ) -> Self {
        let state = if queue_size > 0 {
            ReadinessState::Indexing
        } else if phase != ResolverPhase::Idle {
            if files_indexed == 0 && last.is_none() {
                ReadinessState::Empty
            } else {
                ReadinessState::Resolving
            }
        } else if files_indexed == 0 {
            ReadinessState::Empty
        } else {
            ReadinessState::Ready
        };

        let mut degraded = Vec::new();
        if !capabilities.semantic {
            degraded.push(Signal::Semantic);
        }
        if !capabilities.structural {
            degraded.push(Signal::Structural);
        }

        Self {
            state,
            unresolved: last.map_or(0, |s| s.unresolved),
            ambiguous: last.map_or(0, |s| s.ambiguous),
            degraded,
        }
    }
}

/// Snapshot returned by `IncrementalIndexer::status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStatus {
    /// Files whose structure is in the graph store.
    pub files_indexed: usize,
    /// Queued, running and unacknowledged tasks.
    pub queue_size: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub ready: bool,
    pub last_resolution: Option<ResolutionStats>,
    pub last_report: Option<ResolutionReport>,
    pub phase: ResolverPhase,
    /// Completed resolution passes.
    pub generation: u64,
    pub capabilities: Capabilities,
    pub watched_roots: Vec<PathBuf>,
    pub readiness: Readiness,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_states() {
        let caps = Capabilities::default();
        let stats = ResolutionStats {
            resolved: 4,
            unresolved: 2,
            ambiguous: 1,
        };

        let empty = Readiness::derive(ResolverPhase::Collecting, 0, 0, None, caps);
        assert_eq!(empty.state, ReadinessState::Empty);

        let indexing = Readiness::derive(ResolverPhase::Collecting, 3, 1, None, caps);
        assert_eq!(indexing.state, ReadinessState::Indexing);

        let resolving = Readiness::derive(ResolverPhase::Resolving, 0, 5, Some(&stats), caps);
        assert_eq!(resolving.state, ReadinessState::Resolving);

        let ready = Readiness::derive(ResolverPhase::Idle, 0, 5, Some(&stats), caps);
        assert!(ready.is_ready());
        assert_eq!((ready.unresolved, ready.ambiguous), (2, 1));
        assert!(ready.degraded.is_empty());
    }

    #[test]
    fn test_disabled_capability_is_degraded() {
        let caps = Capabilities {
            structural: true,
            semantic: false,
        };
        let readiness = Readiness::derive(ResolverPhase::Idle, 0, 1, None, caps);
        assert_eq!(readiness.degraded, vec![Signal::Semantic]);
    }
}
