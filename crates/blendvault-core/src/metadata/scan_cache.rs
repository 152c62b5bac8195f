//! Per-entry scan metadata cache.
//!
//! Lets the library scanner skip re-deriving a build's identity when the
//! directory's modification time is unchanged since the last pass. Strictly
//! opt-in state: deleting the cache file only costs one slower scan.

use crate::metadata::atomic::{atomic_read_json, atomic_write_json};
use crate::metadata::sidecar::BuildSidecar;
use crate::Result;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntry {
    /// Directory mtime (seconds since epoch) the identity was derived at.
    pub mtime_secs: u64,
    pub sidecar: BuildSidecar,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanCacheFile {
    #[serde(default)]
    entries: HashMap<String, CachedEntry>,
}

/// Mtime-keyed identity cache for library scans.
#[derive(Debug)]
pub struct ScanCache {
    path: PathBuf,
    entries: HashMap<String, CachedEntry>,
    dirty: bool,
}

impl ScanCache {
    /// Load the cache, starting empty when the file is missing or broken.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match atomic_read_json::<ScanCacheFile>(&path) {
            Ok(Some(file)) => file.entries,
            Ok(None) => HashMap::new(),
            Err(e) => {
                debug!("Resetting unreadable scan cache {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    /// Cached sidecar for `dir`, valid only while the mtime matches.
    pub fn lookup(&self, dir: &Path, mtime_secs: u64) -> Option<&BuildSidecar> {
        self.entries
            .get(&cache_key(dir))
            .filter(|cached| cached.mtime_secs == mtime_secs)
            .map(|cached| &cached.sidecar)
    }

    pub fn record(&mut self, dir: &Path, mtime_secs: u64, sidecar: BuildSidecar) {
        let entry = CachedEntry {
            mtime_secs,
            sidecar,
        };
        if self.entries.insert(cache_key(dir), entry.clone()) != Some(entry) {
            self.dirty = true;
        }
    }

    pub fn invalidate(&mut self, dir: &Path) {
        if self.entries.remove(&cache_key(dir)).is_some() {
            self.dirty = true;
        }
    }

    /// Persist the cache if it changed, serialized against concurrent
    /// writers with an advisory lock on a sibling lock file.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| crate::VaultError::io_with_path(e, parent))?;
        }
        let lock_path = self.path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| crate::VaultError::io_with_path(e, &lock_path))?;
        lock.lock_exclusive()
            .map_err(|e| crate::VaultError::io_with_path(e, &lock_path))?;

        let result = atomic_write_json(
            &self.path,
            &ScanCacheFile {
                entries: self.entries.clone(),
            },
        );
        let _ = fs2::FileExt::unlock(&lock);
        result?;
        self.dirty = false;
        Ok(())
    }
}

fn cache_key(dir: &Path) -> String {
    dir.to_string_lossy().into_owned()
}
