//! The `.bvinfo` sidecar marker written next to every installed build.
//!
//! The sidecar is what lets the scanner reconstruct a build's identity
//! without re-deriving it from directory heuristics, and what
//! disambiguates a valid build from scaffolding left behind by a failed
//! install. User-owned flags (favorite, custom name) ride along so they
//! survive rescans.

use crate::config::Lineage;
use crate::metadata::atomic::{atomic_read_json, atomic_write_json};
use crate::models::{BuildIdentity, BuildVersion};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Current sidecar schema version. Older files are still read; unknown
/// fields in newer files are ignored.
pub const SIDECAR_FILE_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSidecar {
    #[serde(default = "default_file_version")]
    pub file_version: u32,
    pub lineage: Lineage,
    pub version: BuildVersion,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub commit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub custom_executable: Option<String>,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
}

fn default_file_version() -> u32 {
    1
}

impl BuildSidecar {
    pub fn from_identity(identity: &BuildIdentity) -> Self {
        Self {
            file_version: SIDECAR_FILE_VERSION,
            lineage: identity.lineage,
            version: identity.version,
            content_hash: identity.content_hash.clone(),
            commit_time: identity.commit_time,
            custom_executable: identity.executable_name.clone(),
            custom_name: None,
            is_favorite: false,
        }
    }

    /// Reconstruct a build identity for the directory this sidecar sits in.
    pub fn to_identity(&self, dir: &Path) -> BuildIdentity {
        BuildIdentity {
            version: self.version,
            lineage: self.lineage,
            content_hash: self.content_hash.clone(),
            commit_time: self.commit_time,
            source_url: dir.to_string_lossy().into_owned(),
            executable_name: self.custom_executable.clone(),
            archive_sha256: None,
        }
    }
}

/// Read the sidecar from a build directory. A broken sidecar is treated as
/// absent so one corrupt file never hides an otherwise valid build.
pub fn read_sidecar(build_dir: &Path) -> Option<BuildSidecar> {
    let path = build_dir.join(crate::config::PathsConfig::SIDECAR_FILENAME);
    match atomic_read_json::<BuildSidecar>(&path) {
        Ok(sidecar) => sidecar,
        Err(e) => {
            warn!("Ignoring unreadable sidecar {}: {}", path.display(), e);
            None
        }
    }
}

/// Write the sidecar into a build directory.
pub fn write_sidecar(build_dir: &Path, sidecar: &BuildSidecar) -> Result<()> {
    let path = build_dir.join(crate::config::PathsConfig::SIDECAR_FILENAME);
    atomic_write_json(&path, sidecar)
}
