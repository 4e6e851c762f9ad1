//! On-disk cache layout and persistence helpers.

use crate::error::{IndexError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_DIR: &str = ".camille";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const LOCK_FILE: &str = "index.lock";

pub fn ensure_cache_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| IndexError::io(dir, e))?;
    Ok(dir.to_path_buf())
}

pub fn manifest_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(MANIFEST_FILE)
}

pub fn embeddings_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(EMBEDDINGS_FILE)
}

pub fn lock_path(cache_dir: &Path) -> PathBuf {
    cache_dir.join(LOCK_FILE)
}

/// Read a JSON file. `Ok(None)` when it does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).map_err(|e| IndexError::io(path, e))?;
    let value = serde_json::from_slice(&data)?;
    Ok(Some(value))
}

pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

/// Read a bincode file. `Ok(None)` when it does not exist.
pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).map_err(|e| IndexError::io(path, e))?;
    let value = bincode::deserialize(&data)?;
    Ok(Some(value))
}

pub fn save_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = bincode::serialize(value)?;
    write_atomic(path, &data)
}

/// Write through a sibling temp file so readers never see a torn file.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_cache_dir(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).map_err(|e| IndexError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| IndexError::io(path, e))?;
    Ok(())
}

/// Delete the manifest and the embedding cache. The lock and the config
/// file are left alone.
pub fn clear_cache(cache_dir: &Path) -> Result<()> {
    for path in [manifest_path(cache_dir), embeddings_path(cache_dir)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IndexError::io(&path, e)),
        }
    }
    Ok(())
}
