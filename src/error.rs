//! Error types.
//!
//! `IndexError` covers failures surfaced to callers of the library.
//! `TaskFailure` covers failures of a single file task; those are logged and
//! counted but never propagate past the scheduler.

use std::path::PathBuf;
use thiserror::Error;

/// Library error.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("file discovery under {root} failed: {message}")]
    Discovery { root: PathBuf, message: String },

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("{store} store unavailable: {message}")]
    StoreUnavailable { store: &'static str, message: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("index at {path} is locked by running process {pid}")]
    LockHeld { pid: u32, path: PathBuf },

    #[error("invalid configuration in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("indexer has shut down")]
    ShutDown,
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// A copy with the same variant, for fanning one failure out to several
    /// waiters. I/O sources keep their kind and message.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Io { path, source } => Self::Io {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::Parse { path, message } => Self::Parse {
                path: path.clone(),
                message: message.clone(),
            },
            Self::Discovery { root, message } => Self::Discovery {
                root: root.clone(),
                message: message.clone(),
            },
            Self::Embedding(message) => Self::Embedding(message.clone()),
            Self::StoreUnavailable { store, message } => Self::StoreUnavailable {
                store: *store,
                message: message.clone(),
            },
            Self::Store(message) => Self::Store(message.clone()),
            Self::LockHeld { pid, path } => Self::LockHeld {
                pid: *pid,
                path: path.clone(),
            },
            Self::Config { path, message } => Self::Config {
                path: path.clone(),
                message: message.clone(),
            },
            Self::Serialization(message) => Self::Serialization(message.clone()),
            Self::ShutDown => Self::ShutDown,
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

/// Failure of one file task. The file stays stale and is retried later.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskFailure {
    #[error("read failed: {0}")]
    Read(String),

    #[error("file is {size} bytes, limit is {limit}")]
    Oversized { size: u64, limit: u64 },

    #[error("file is not valid UTF-8")]
    NotUtf8,

    #[error("no parser for file")]
    Unsupported,

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("store write failed: {0}")]
    Store(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}
