//! Installed-build library types.

use crate::config::Lineage;
use crate::models::build::{BuildIdentity, ResolvedVersion};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One build installed on local disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub path: PathBuf,
    /// Best-effort identity reconstructed from the sidecar marker or
    /// directory heuristics; `source_url` holds the directory path.
    pub identity: BuildIdentity,
    pub resolved: ResolvedVersion,
    /// Observed at runtime, never persisted.
    #[serde(skip)]
    pub running_instances: u32,
    /// Owned by the presentation layer, carried here for merge purposes.
    pub is_favorite: bool,
    pub is_custom: bool,
    /// User-assigned display name for custom builds.
    #[serde(default)]
    pub custom_name: Option<String>,
}

impl LibraryEntry {
    pub fn lineage(&self) -> Lineage {
        self.identity.lineage
    }

    /// Name shown for this entry: the custom name when set, the canonical
    /// version string otherwise.
    pub fn display_name(&self) -> String {
        match self.custom_name {
            Some(ref name) if !name.is_empty() => name.clone(),
            _ => self.identity.version_string(),
        }
    }
}
