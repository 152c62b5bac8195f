//! On-disk catalog snapshot.
//!
//! Written only after a successful discovery pass, read at startup before
//! any network activity, and the sole catalog source in offline mode.
//! Writes are serialized with an advisory lock; readers always get the last
//! fully-written snapshot thanks to the atomic rename underneath.

use crate::metadata::{atomic_read_json, atomic_write_json};
use crate::models::Catalog;
use crate::Result;
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct CatalogCache {
    path: PathBuf,
}

impl CatalogCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Last persisted catalog, if any. Unreadable snapshots are discarded
    /// rather than surfaced: the cache is an optimization, not a source of
    /// truth.
    pub fn read(&self) -> Option<Catalog> {
        match atomic_read_json::<Catalog>(&self.path) {
            Ok(Some(catalog)) => {
                debug!(
                    "Loaded catalog cache ({} builds, fetched {:?})",
                    catalog.len(),
                    catalog.fetched_at
                );
                Some(catalog)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Discarding unreadable catalog cache: {e}");
                None
            }
        }
    }

    pub fn write(&self, catalog: &Catalog) -> Result<()> {
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

        let result = atomic_write_json(&self.path, catalog);
        let _ = FileExt::unlock(&lock);
        result
    }
}
