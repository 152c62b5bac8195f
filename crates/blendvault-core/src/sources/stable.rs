//! Stable/LTS release source.
//!
//! Consumes the versioned JSON index of official releases. Each index entry
//! describes one release folder with its per-platform archive assets; the
//! adapter filters assets for the running platform and architecture and
//! applies the configured minimum-version floor.

use crate::config::{EngineConfig, Lineage, NetworkConfig};
use crate::models::{parse_loose_version, BuildIdentity, BuildVersion};
use crate::network::{retry_request, HttpClient, RetryConfig};
use crate::platform::{self, Arch, Platform};
use crate::sources::BuildSource;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

/// One archive asset within a release index entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StableAsset {
    file_name: String,
    url: String,
    #[serde(default)]
    sha256: Option<String>,
}

/// One release folder in the index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StableRelease {
    version: String,
    #[serde(default)]
    lts: bool,
    #[serde(default)]
    modified_date: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<StableAsset>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StableIndex {
    #[serde(default)]
    releases: Vec<StableRelease>,
}

/// Adapter for the official stable release index.
pub struct StableSource {
    index_url: String,
    min_version: Option<BuildVersion>,
    platform: Platform,
    arch: Arch,
}

impl StableSource {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            index_url: NetworkConfig::STABLE_INDEX_URL.to_string(),
            min_version: config.min_stable_version,
            platform: Platform::current(),
            arch: Arch::current(),
        }
    }

    #[cfg(test)]
    fn for_test(min_version: Option<BuildVersion>, platform: Platform, arch: Arch) -> Self {
        Self {
            index_url: String::new(),
            min_version,
            platform,
            arch,
        }
    }

    fn builds_from_index(&self, index: StableIndex) -> Vec<BuildIdentity> {
        let filter = platform::archive_filter(self.platform);
        let mut builds = Vec::new();

        for release in index.releases {
            let version = match parse_loose_version(&release.version) {
                Ok(v) => v,
                Err(e) => {
                    // One malformed entry never costs the rest.
                    warn!("Skipping stable release {:?}: {e}", release.version);
                    continue;
                }
            };
            if let Some(min) = self.min_version {
                if version < min {
                    continue;
                }
            }

            let lineage = if release.lts {
                Lineage::Lts
            } else {
                Lineage::Stable
            };

            for asset in release.assets {
                if !filter.is_match(&asset.file_name)
                    || !platform::matches_arch(&asset.file_name, self.arch)
                {
                    continue;
                }

                // Stable archives may spell a more precise version than the
                // release folder (e.g. a patch number only in the name).
                let asset_version =
                    parse_loose_version(&asset.file_name).unwrap_or(version);

                let mut identity = BuildIdentity::new(asset_version, lineage, asset.url);
                identity.commit_time = release.modified_date;
                identity.archive_sha256 = asset.sha256;
                builds.push(identity);
            }
        }

        debug!("Stable index yielded {} builds", builds.len());
        builds
    }
}

#[async_trait]
impl BuildSource for StableSource {
    fn id(&self) -> &'static str {
        "stable"
    }

    fn lineage(&self) -> Lineage {
        Lineage::Stable
    }

    async fn scrape(&self, http: &HttpClient) -> Result<Vec<BuildIdentity>> {
        let index: StableIndex = retry_request(&RetryConfig::default(), || {
            http.get_json(&self.index_url)
        })
        .await?;
        Ok(self.builds_from_index(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> StableIndex {
        serde_json::from_str(
            r#"{
                "releases": [
                    {
                        "version": "4.2",
                        "lts": true,
                        "modifiedDate": "2024-07-16T10:00:00Z",
                        "assets": [
                            {"fileName": "blender-4.2.0-linux-x64.tar.gz", "url": "https://dl/blender-4.2.0-linux-x64.tar.gz", "sha256": "aa"},
                            {"fileName": "blender-4.2.0-windows-x64.zip", "url": "https://dl/blender-4.2.0-windows-x64.zip"},
                            {"fileName": "blender-4.2.0-linux-x64.tar.gz.sha256", "url": "https://dl/ignore"}
                        ]
                    },
                    {
                        "version": "4.1",
                        "assets": [
                            {"fileName": "blender-4.1.1-linux-x64.tar.gz", "url": "https://dl/blender-4.1.1-linux-x64.tar.gz"}
                        ]
                    },
                    {
                        "version": "2.79",
                        "assets": [
                            {"fileName": "blender-2.79-linux-x64.tar.gz", "url": "https://dl/blender-2.79-linux-x64.tar.gz"}
                        ]
                    },
                    {
                        "version": "not-a-version",
                        "assets": [
                            {"fileName": "blender-9.9.9-linux-x64.tar.gz", "url": "https://dl/x"}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_filters_platform_and_floor() {
        let source = StableSource::for_test(
            Some(BuildVersion::new(3, 0, 0)),
            Platform::Linux,
            Arch::Amd64,
        );
        let builds = source.builds_from_index(index());

        // 2.79 is below the floor, the malformed release is skipped, and
        // the windows/sha256 assets never match the linux filter.
        assert_eq!(builds.len(), 2);
        assert!(builds
            .iter()
            .all(|b| b.source_url.ends_with(".tar.gz") && b.source_url.contains("linux")));
    }

    #[test]
    fn test_lts_flag_sets_lineage() {
        let source = StableSource::for_test(None, Platform::Linux, Arch::Amd64);
        let builds = source.builds_from_index(index());
        let lts = builds
            .iter()
            .find(|b| b.version == BuildVersion::new(4, 2, 0))
            .unwrap();
        assert_eq!(lts.lineage, Lineage::Lts);
        assert_eq!(lts.archive_sha256.as_deref(), Some("aa"));

        let plain = builds
            .iter()
            .find(|b| b.version == BuildVersion::new(4, 1, 1))
            .unwrap();
        assert_eq!(plain.lineage, Lineage::Stable);
    }

    #[test]
    fn test_stable_builds_have_no_content_hash() {
        let source = StableSource::for_test(None, Platform::Linux, Arch::Amd64);
        let builds = source.builds_from_index(index());
        assert!(!builds.is_empty());
        assert!(builds.iter().all(|b| b.content_hash.is_none()));
    }

    #[test]
    fn test_asset_version_overrides_folder_version() {
        let source = StableSource::for_test(None, Platform::Linux, Arch::Amd64);
        let builds = source.builds_from_index(index());
        // The 4.1 folder carries a 4.1.1 archive.
        assert!(builds
            .iter()
            .any(|b| b.version == BuildVersion::new(4, 1, 1)));
    }
}
