//! Debounced file watching over the watched roots.

use crate::discovery::{PathFilter, is_cache_path};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// A classified change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Created or modified; the path exists.
    Changed(PathBuf),
    /// The path (file or directory) no longer exists.
    Removed(PathBuf),
}

/// Keeps the OS watcher alive; dropping it stops watching.
pub struct WatcherHandle {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    _bridge_task: JoinHandle<()>,
}

/// Watch `roots` recursively, debouncing at `debounce`.
///
/// Events under the cache directory or matching the exclude rules are
/// dropped before they reach the returned channel.
pub fn start_watcher(
    roots: &[PathBuf],
    debounce: Duration,
    filter: PathFilter,
) -> anyhow::Result<(WatcherHandle, mpsc::Receiver<WatchEvent>)> {
    let (std_tx, std_rx) = std::sync::mpsc::channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(debounce, move |res| {
        let _ = std_tx.send(res);
    })?;
    for root in roots {
        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
    }

    let (tx, rx) = mpsc::channel::<WatchEvent>(256);
    let roots = roots.to_vec();
    let bridge_task = tokio::task::spawn_blocking(move || {
        while let Ok(result) = std_rx.recv() {
            match result {
                Ok(events) => {
                    for event in events {
                        let Some(event) = classify(&event.path, &roots, &filter) else {
                            continue;
                        };
                        if tx.blocking_send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => warn!("watcher error: {err:?}"),
            }
        }
    });

    Ok((
        WatcherHandle {
            _debouncer: debouncer,
            _bridge_task: bridge_task,
        },
        rx,
    ))
}

fn classify(path: &Path, roots: &[PathBuf], filter: &PathFilter) -> Option<WatchEvent> {
    if is_cache_path(path) {
        return None;
    }
    let root = roots.iter().find(|r| path.starts_with(r))?;
    let relative = path.strip_prefix(root).unwrap_or(path);
    if filter.is_excluded(relative) {
        return None;
    }

    if path.is_file() {
        Some(WatchEvent::Changed(path.to_path_buf()))
    } else if path.exists() {
        // Directory events carry no content change of their own.
        None
    } else {
        Some(WatchEvent::Removed(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::FileDiscovery;

    #[test]
    fn test_classify() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("a.ts"), "export const a = 1;").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.ts"), "").unwrap();
        let filter = FileDiscovery::new().path_filter().clone();
        let roots = vec![root.clone()];

        assert_eq!(
            classify(&root.join("a.ts"), &roots, &filter),
            Some(WatchEvent::Changed(root.join("a.ts")))
        );
        assert_eq!(
            classify(&root.join("gone.ts"), &roots, &filter),
            Some(WatchEvent::Removed(root.join("gone.ts")))
        );
        assert_eq!(classify(&root.join("node_modules/pkg/index.ts"), &roots, &filter), None);
        assert_eq!(classify(&root.join(".camille/manifest.json"), &roots, &filter), None);
        assert_eq!(classify(Path::new("/elsewhere/a.ts"), &roots, &filter), None);
    }
}
