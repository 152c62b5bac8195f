//! Buildbot source for automated daily/experimental/patch builds.
//!
//! The buildbot exposes one JSON document per branch listing every produced
//! archive with its platform, architecture, version and commit hash. Builds
//! are filtered for the running platform; when no architecture-specific
//! build exists the adapter falls back to any archive for the platform.

use crate::config::{EngineConfig, Lineage, NetworkConfig};
use crate::models::{parse_loose_version, BuildIdentity};
use crate::network::{retry_request, HttpClient, RetryConfig};
use crate::platform::{self, Arch, Platform};
use crate::sources::BuildSource;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

/// Automated build branches served by the buildbot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutomatedBranch {
    Daily,
    Experimental,
    Patch,
}

impl AutomatedBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutomatedBranch::Daily => "daily",
            AutomatedBranch::Experimental => "experimental",
            AutomatedBranch::Patch => "patch",
        }
    }

    fn lineage(&self) -> Lineage {
        match self {
            AutomatedBranch::Daily => Lineage::Daily,
            AutomatedBranch::Experimental | AutomatedBranch::Patch => Lineage::Experimental,
        }
    }
}

/// One entry of the buildbot listing.
#[derive(Debug, Clone, Deserialize)]
struct BuilderEntry {
    platform: String,
    #[serde(default)]
    architecture: Option<String>,
    file_name: String,
    /// Archive mtime, seconds since epoch.
    file_mtime: i64,
    version: String,
    #[serde(default)]
    hash: Option<String>,
    url: String,
}

/// Adapter for one buildbot branch.
pub struct AutomatedSource {
    branch: AutomatedBranch,
    include_archive: bool,
    platform: Platform,
    arch: Arch,
}

impl AutomatedSource {
    pub fn new(branch: AutomatedBranch, config: &EngineConfig) -> Self {
        Self {
            branch,
            include_archive: config.include_archive_builds,
            platform: Platform::current(),
            arch: Arch::current(),
        }
    }

    fn endpoint(&self) -> String {
        let mut path = self.branch.as_str().to_string();
        if self.include_archive {
            path.push_str("/archive");
        }
        format!(
            "{}/{}/?format=json&v=1",
            NetworkConfig::BUILDER_BASE_URL,
            path
        )
    }

    fn builds_from_listing(&self, entries: Vec<BuilderEntry>) -> Vec<BuildIdentity> {
        let filter = platform::archive_filter(self.platform);
        let platform_key = self.platform.json_key();
        let for_platform: Vec<BuilderEntry> = entries
            .into_iter()
            .filter(|e| e.platform == platform_key && filter.is_match(&e.file_name))
            .collect();

        let arch_specific: Vec<&BuilderEntry> = for_platform
            .iter()
            .filter(|e| {
                e.architecture
                    .as_deref()
                    .map(|a| a.eq_ignore_ascii_case(self.arch.as_str()))
                    .unwrap_or(false)
            })
            .collect();

        let (selected, arch_matched): (Vec<&BuilderEntry>, bool) = if arch_specific.is_empty() {
            warn!(
                "No {} builds for architecture {}, falling back to any architecture",
                self.branch.as_str(),
                self.arch.as_str()
            );
            (for_platform.iter().collect(), false)
        } else {
            (arch_specific, true)
        };

        selected
            .into_iter()
            .filter_map(|entry| self.build_from_entry(entry, arch_matched))
            .collect()
    }

    fn build_from_entry(&self, entry: &BuilderEntry, arch_matched: bool) -> Option<BuildIdentity> {
        let version = match parse_loose_version(&entry.version) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping buildbot entry {:?}: {e}", entry.file_name);
                return None;
            }
        };

        let lineage = self.branch.lineage();
        let mut identity = BuildIdentity::new(version, lineage, entry.url.clone());
        identity.content_hash = entry.hash.clone().filter(|h| !h.is_empty());
        identity.commit_time = DateTime::<Utc>::from_timestamp(entry.file_mtime, 0);

        // Cross-architecture fallback builds keep their architecture visible
        // through the executable name so the presentation layer can flag
        // them.
        if !arch_matched {
            if let Some(ref arch) = entry.architecture {
                identity.executable_name = Some(format!("blender ({arch})"));
            }
        }

        Some(identity)
    }
}

#[async_trait]
impl BuildSource for AutomatedSource {
    fn id(&self) -> &'static str {
        match self.branch {
            AutomatedBranch::Daily => "buildbot-daily",
            AutomatedBranch::Experimental => "buildbot-experimental",
            AutomatedBranch::Patch => "buildbot-patch",
        }
    }

    fn lineage(&self) -> Lineage {
        self.branch.lineage()
    }

    async fn scrape(&self, http: &HttpClient) -> Result<Vec<BuildIdentity>> {
        let url = self.endpoint();
        let entries: Vec<BuilderEntry> =
            retry_request(&RetryConfig::default(), || http.get_json(&url)).await?;
        Ok(self.builds_from_listing(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuildVersion;

    fn source(branch: AutomatedBranch) -> AutomatedSource {
        AutomatedSource {
            branch,
            include_archive: false,
            platform: Platform::Linux,
            arch: Arch::Amd64,
        }
    }

    fn listing() -> Vec<BuilderEntry> {
        serde_json::from_str(
            r#"[
                {
                    "platform": "linux",
                    "architecture": "amd64",
                    "file_name": "blender-4.3.0-alpha-linux-x64.tar.gz",
                    "file_mtime": 1722297600,
                    "version": "4.3.0",
                    "release_cycle": "alpha",
                    "branch": "main",
                    "hash": "cb886aba06d5",
                    "url": "https://builder/blender-4.3.0-alpha-linux-x64.tar.gz"
                },
                {
                    "platform": "linux",
                    "architecture": "arm64",
                    "file_name": "blender-4.3.0-alpha-linux-arm64.tar.gz",
                    "file_mtime": 1722297600,
                    "version": "4.3.0",
                    "hash": "cb886aba06d5",
                    "url": "https://builder/blender-4.3.0-alpha-linux-arm64.tar.gz"
                },
                {
                    "platform": "windows",
                    "architecture": "amd64",
                    "file_name": "blender-4.3.0-alpha-windows-x64.zip",
                    "file_mtime": 1722297600,
                    "version": "4.3.0",
                    "hash": "cb886aba06d5",
                    "url": "https://builder/blender-4.3.0-alpha-windows-x64.zip"
                }
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_selects_platform_and_arch() {
        let builds = source(AutomatedBranch::Daily).builds_from_listing(listing());
        assert_eq!(builds.len(), 1);
        let build = &builds[0];
        assert_eq!(build.lineage, Lineage::Daily);
        assert_eq!(build.version, BuildVersion::new(4, 3, 0));
        assert_eq!(build.content_hash.as_deref(), Some("cb886aba06d5"));
        assert!(build.commit_time.is_some());
        assert!(build.source_url.contains("linux-x64"));
    }

    #[test]
    fn test_arch_fallback_when_no_native_build() {
        let mut entries = listing();
        entries.retain(|e| e.architecture.as_deref() == Some("arm64"));
        let builds = source(AutomatedBranch::Daily).builds_from_listing(entries);
        assert_eq!(builds.len(), 1);
        // The fallback build carries its architecture marker.
        assert!(builds[0]
            .executable_name
            .as_deref()
            .unwrap()
            .contains("arm64"));
    }

    #[test]
    fn test_patch_branch_feeds_experimental_lineage() {
        let builds = source(AutomatedBranch::Patch).builds_from_listing(listing());
        assert!(builds.iter().all(|b| b.lineage == Lineage::Experimental));
    }

    #[test]
    fn test_archive_endpoint_path() {
        let mut src = source(AutomatedBranch::Daily);
        assert!(src.endpoint().contains("/daily/?"));
        src.include_archive = true;
        assert!(src.endpoint().contains("/daily/archive/?"));
    }
}
