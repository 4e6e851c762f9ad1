//! Liveness lock: one indexing process per store.

use crate::cache::{ensure_cache_dir, lock_path};
use crate::error::{IndexError, Result};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// A lock file without a pid younger than this belongs to a process that
/// has created it and not yet written its pid.
const UNWRITTEN_GRACE: Duration = Duration::from_secs(2);

/// Lock file holding the pid of the owning indexer.
///
/// Released when dropped.
#[derive(Debug)]
pub struct IndexLock {
    path: PathBuf,
    pid: u32,
}

/// Who owns an existing lock file.
enum Holder {
    Live(u32),
    Stale(Option<u32>),
}

impl IndexLock {
    /// Acquire the lock under `cache_dir`.
    ///
    /// The file is created exclusively, so of two processes racing for a free
    /// lock exactly one wins. Fails with [`IndexError::LockHeld`] if another
    /// live process owns it; a lock left behind by a dead process is removed
    /// and creation retried once.
    pub fn acquire(cache_dir: &Path) -> Result<Self> {
        ensure_cache_dir(cache_dir)?;
        let path = lock_path(cache_dir);
        let pid = std::process::id();

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(pid.to_string().as_bytes())
                        .map_err(|e| IndexError::io(&path, e))?;
                    debug!("Index lock acquired: {} (pid {})", path.display(), pid);
                    return Ok(Self { path, pid });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(IndexError::io(&path, e)),
            }

            match holder(&path) {
                Holder::Live(holder) => return Err(IndexError::LockHeld { pid: holder, path }),
                Holder::Stale(_) if attempt > 0 => break,
                Holder::Stale(holder) => {
                    warn!("Taking over stale index lock from process {:?}", holder);
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(IndexError::io(&path, e)),
                    }
                }
            }
        }

        // Someone else recreated the lock between our removal and retry.
        let holder = read_pid(&path).unwrap_or(0);
        Err(IndexError::LockHeld { pid: holder, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        // Only remove the file while it still names us.
        if read_pid(&self.path) == Some(self.pid) {
            let _ = fs::remove_file(&self.path);
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn holder(path: &Path) -> Holder {
    match read_pid(path) {
        Some(pid) if is_pid_running(pid) => Holder::Live(pid),
        Some(pid) => Holder::Stale(Some(pid)),
        None => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok());
            match age {
                // Vanished, or still being written by its creator.
                None => Holder::Live(0),
                Some(age) if age < UNWRITTEN_GRACE => Holder::Live(0),
                Some(_) => Holder::Stale(None),
            }
        }
    }
}

#[cfg(unix)]
fn is_pid_running(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_pid_running(pid: u32) -> bool {
    // Without a portable liveness check, only our own pid is known to be alive.
    pid == std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = tempfile::tempdir().unwrap();
        let lock = IndexLock::acquire(temp.path()).unwrap();
        assert_eq!(lock.pid(), std::process::id());

        let err = IndexLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(err, IndexError::LockHeld { .. }));

        drop(lock);
        assert!(!lock_path(temp.path()).exists());
        IndexLock::acquire(temp.path()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_lock_is_taken_over() {
        let temp = tempfile::tempdir().unwrap();
        // Above the Linux pid_max ceiling, so never a live process.
        fs::write(lock_path(temp.path()), "4194305").unwrap();

        let lock = IndexLock::acquire(temp.path()).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn test_racing_acquirers_have_one_winner() {
        use std::sync::{Arc, Barrier};

        for _ in 0..50 {
            let temp = tempfile::tempdir().unwrap();
            let barrier = Arc::new(Barrier::new(8));
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let dir = temp.path().to_path_buf();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        IndexLock::acquire(&dir)
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(
                results
                    .iter()
                    .filter_map(|r| r.as_ref().err())
                    .all(|e| matches!(e, IndexError::LockHeld { .. }))
            );
        }
    }

    #[test]
    fn test_fresh_unwritten_lock_is_respected() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(lock_path(temp.path()), "").unwrap();

        let err = IndexLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(err, IndexError::LockHeld { pid: 0, .. }));
    }
}
