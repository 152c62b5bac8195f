//! Atomic JSON persistence.
//!
//! Writes go to a uniquely-named temp file, are synced to disk, then renamed
//! over the target so readers only ever see complete snapshots.

use crate::{Result, VaultError};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Read and parse a JSON file. `None` when the file doesn't exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).map_err(|e| VaultError::Io {
        message: format!("Failed to read {}", path.display()),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;

    let data: T = serde_json::from_str(&contents).map_err(|e| VaultError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize `data` and atomically replace `path` with it.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| VaultError::io_with_path(e, parent))?;
        }
    }

    // Unique per process and per call so concurrent writers never share a
    // temp file.
    let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));

    let serialized = serde_json::to_string_pretty(data).map_err(|e| VaultError::Json {
        message: format!("Failed to serialize data: {e}"),
        source: Some(e),
    })?;

    {
        let mut file =
            File::create(&temp_path).map_err(|e| VaultError::io_with_path(e, &temp_path))?;
        file.write_all(serialized.as_bytes())
            .map_err(|e| VaultError::io_with_path(e, &temp_path))?;
        file.sync_all()
            .map_err(|e| VaultError::io_with_path(e, &temp_path))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        VaultError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    Ok(())
}
