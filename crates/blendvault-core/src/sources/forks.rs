//! Fork sources backed by GitHub releases: UPBGE (stable and weekly
//! channels) and Bforartists.
//!
//! Release listings are cached in memory and on disk with a TTL; when the
//! network is down a stale disk cache still serves, so fork lineages keep
//! working offline.

use crate::config::{EngineConfig, Lineage, NetworkConfig};
use crate::models::{parse_loose_version, BuildIdentity, BuildVersion};
use crate::network::{retry_request, HttpClient, RetryConfig};
use crate::platform::{self, Arch, Platform};
use crate::sources::BuildSource;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mini_moka::sync::Cache;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// GitHub release asset information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhAsset {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
}

/// GitHub release information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhRelease {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<GhAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleasesDiskCache {
    last_fetched: DateTime<Utc>,
    releases: Vec<GhRelease>,
}

#[derive(Debug, Clone, Deserialize)]
struct GhTagRef {
    object: GhTagObject,
}

#[derive(Debug, Clone, Deserialize)]
struct GhTagObject {
    sha: String,
}

/// Cached GitHub release listing for one repository.
///
/// Lookup order: in-memory cache, fresh disk cache, network, stale disk
/// cache as the offline fallback.
pub struct ReleaseFeed {
    repo: String,
    cache_dir: PathBuf,
    memory: Cache<String, Vec<GhRelease>>,
    ttl: Duration,
}

impl ReleaseFeed {
    pub fn new(repo: impl Into<String>, cache_dir: PathBuf) -> Self {
        Self {
            repo: repo.into(),
            cache_dir,
            memory: Cache::builder()
                .time_to_live(NetworkConfig::RELEASES_TTL)
                .max_capacity(4)
                .build(),
            ttl: NetworkConfig::RELEASES_TTL,
        }
    }

    pub async fn releases(&self, http: &HttpClient) -> Result<Vec<GhRelease>> {
        if let Some(releases) = self.memory.get(&self.repo) {
            debug!("Release feed cache hit (memory) for {}", self.repo);
            return Ok(releases);
        }

        let disk = self.read_disk();
        if let Some(ref cached) = disk {
            if Utc::now().signed_duration_since(cached.last_fetched).num_seconds()
                < self.ttl.as_secs() as i64
            {
                debug!("Release feed cache hit (disk) for {}", self.repo);
                self.memory.insert(self.repo.clone(), cached.releases.clone());
                return Ok(cached.releases.clone());
            }
        }

        let url = format!(
            "{}/repos/{}/releases?per_page=100",
            NetworkConfig::GITHUB_API_BASE,
            self.repo
        );
        match retry_request(&RetryConfig::default(), || {
            http.get_json::<Vec<GhRelease>>(&url)
        })
        .await
        {
            Ok(releases) => {
                self.memory.insert(self.repo.clone(), releases.clone());
                self.write_disk(&releases);
                Ok(releases)
            }
            Err(e) => {
                // Serve stale data rather than nothing when offline.
                if let Some(cached) = disk {
                    warn!(
                        "Release fetch failed for {}, serving stale cache: {e}",
                        self.repo
                    );
                    self.memory.insert(self.repo.clone(), cached.releases.clone());
                    return Ok(cached.releases);
                }
                Err(e)
            }
        }
    }

    /// Short commit hash behind a release tag. Best effort: a missing ref
    /// only costs the hash, not the build.
    pub async fn tag_hash(&self, http: &HttpClient, tag: &str) -> Option<String> {
        let url = format!(
            "{}/repos/{}/git/refs/tags/{}",
            NetworkConfig::GITHUB_API_BASE,
            self.repo,
            tag
        );
        match http.get_json::<GhTagRef>(&url).await {
            Ok(tag_ref) => Some(tag_ref.object.sha.chars().take(12).collect()),
            Err(e) => {
                debug!("Could not fetch hash for {} {tag}: {e}", self.repo);
                None
            }
        }
    }

    fn disk_path(&self) -> PathBuf {
        let safe = self.repo.replace('/', "-");
        self.cache_dir.join(format!("releases-{safe}.json"))
    }

    fn read_disk(&self) -> Option<ReleasesDiskCache> {
        match crate::metadata::atomic_read_json::<ReleasesDiskCache>(&self.disk_path()) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Ignoring unreadable release cache for {}: {e}", self.repo);
                None
            }
        }
    }

    fn write_disk(&self, releases: &[GhRelease]) {
        let cache = ReleasesDiskCache {
            last_fetched: Utc::now(),
            releases: releases.to_vec(),
        };
        if let Err(e) = crate::metadata::atomic_write_json(&self.disk_path(), &cache) {
            warn!("Failed to persist release cache for {}: {e}", self.repo);
        }
    }
}

/// UPBGE distribution channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpbgeChannel {
    Stable,
    Weekly,
}

const UPBGE_MINIMUM_VERSION: BuildVersion = BuildVersion::new(0, 30, 0);
const WEEKLY_TAG_PREFIX: &str = "weekly-build-";

fn upbge_asset_version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)upbge-([0-9.]+)").expect("static upbge version matcher"))
}

/// Adapter for one UPBGE channel.
pub struct UpbgeSource {
    channel: UpbgeChannel,
    feed: std::sync::Arc<ReleaseFeed>,
    platform: Platform,
    arch: Arch,
}

impl UpbgeSource {
    pub fn new(channel: UpbgeChannel, feed: std::sync::Arc<ReleaseFeed>) -> Self {
        Self {
            channel,
            feed,
            platform: Platform::current(),
            arch: Arch::current(),
        }
    }

    pub fn feed_for(config: &EngineConfig) -> std::sync::Arc<ReleaseFeed> {
        std::sync::Arc::new(ReleaseFeed::new(NetworkConfig::UPBGE_REPO, config.cache_dir()))
    }

    fn wants_release(&self, release: &GhRelease) -> bool {
        if release.draft {
            return false;
        }
        let is_weekly = release.tag_name.starts_with(WEEKLY_TAG_PREFIX);
        let has_alpha = release
            .assets
            .iter()
            .any(|a| a.name.to_lowercase().contains("-alpha"));
        match self.channel {
            // Stable skips weeklies and anything still carrying alpha
            // assets.
            UpbgeChannel::Stable => !is_weekly && !has_alpha,
            UpbgeChannel::Weekly => is_weekly && has_alpha,
        }
    }

    fn release_version(&self, release: &GhRelease, asset_name: &str) -> Option<BuildVersion> {
        let is_weekly = release.tag_name.starts_with(WEEKLY_TAG_PREFIX);
        if is_weekly {
            // Weekly archives embed their base version; the tag only
            // carries a build counter.
            if let Some(caps) = upbge_asset_version_re().captures(asset_name) {
                if let Ok(v) = parse_loose_version(&caps[1]) {
                    return Some(v);
                }
            }
            let counter = release.tag_name.trim_start_matches(WEEKLY_TAG_PREFIX);
            return counter
                .parse::<u64>()
                .ok()
                .map(|n| BuildVersion::new(0, 0, n));
        }

        match parse_loose_version(release.tag_name.trim_start_matches('v')) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Failed to parse UPBGE version {:?}: {e}", release.tag_name);
                None
            }
        }
    }

    fn builds_from_releases(
        &self,
        releases: &[GhRelease],
        hashes: &dyn Fn(&str) -> Option<String>,
    ) -> Vec<BuildIdentity> {
        let filter = platform::upbge_archive_filter(self.platform);
        let exe_name = match self.platform {
            Platform::Windows => Some("blender.exe"),
            Platform::Linux => Some("blender"),
            Platform::MacOs => None,
        };

        let mut builds = Vec::new();
        for release in releases {
            if !self.wants_release(release) {
                continue;
            }
            let is_weekly = release.tag_name.starts_with(WEEKLY_TAG_PREFIX);

            for asset in &release.assets {
                if !filter.is_match(&asset.name)
                    || !platform::matches_arch(&asset.name, self.arch)
                {
                    continue;
                }
                let Some(version) = self.release_version(release, &asset.name) else {
                    continue;
                };
                if !is_weekly && version < UPBGE_MINIMUM_VERSION {
                    debug!("Skipping old UPBGE release {}", release.tag_name);
                    continue;
                }

                let mut identity = BuildIdentity::new(
                    version,
                    self.lineage(),
                    asset.download_url.clone(),
                );
                identity.commit_time = release.published_at;
                identity.content_hash = hashes(&release.tag_name);
                identity.executable_name = exe_name.map(str::to_string);
                builds.push(identity);
            }
        }
        builds
    }
}

#[async_trait]
impl BuildSource for UpbgeSource {
    fn id(&self) -> &'static str {
        match self.channel {
            UpbgeChannel::Stable => "upbge-stable",
            UpbgeChannel::Weekly => "upbge-weekly",
        }
    }

    fn lineage(&self) -> Lineage {
        match self.channel {
            UpbgeChannel::Stable => Lineage::UpbgeStable,
            UpbgeChannel::Weekly => Lineage::UpbgeWeekly,
        }
    }

    async fn scrape(&self, http: &HttpClient) -> Result<Vec<BuildIdentity>> {
        let releases = self
            .feed
            .releases(http)
            .await
            .map_err(|e| e.source_scoped(self.id()))?;

        // Resolve tag hashes up front so identity construction stays
        // synchronous.
        let mut hashes = std::collections::HashMap::new();
        for release in releases.iter().filter(|r| self.wants_release(r)) {
            if let Some(hash) = self.feed.tag_hash(http, &release.tag_name).await {
                hashes.insert(release.tag_name.clone(), hash);
            }
        }

        Ok(self.builds_from_releases(&releases, &|tag| hashes.get(tag).cloned()))
    }
}

/// Adapter for Bforartists releases.
pub struct BforartistsSource {
    feed: std::sync::Arc<ReleaseFeed>,
    platform: Platform,
    arch: Arch,
}

impl BforartistsSource {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            feed: std::sync::Arc::new(ReleaseFeed::new(
                NetworkConfig::BFORARTISTS_REPO,
                config.cache_dir(),
            )),
            platform: Platform::current(),
            arch: Arch::current(),
        }
    }

    fn builds_from_releases(
        &self,
        releases: &[GhRelease],
        hashes: &dyn Fn(&str) -> Option<String>,
    ) -> Vec<BuildIdentity> {
        let filter = platform::bforartists_archive_filter(self.platform);
        let exe_name = match self.platform {
            Platform::Windows => Some("bforartists.exe"),
            Platform::Linux => Some("bforartists"),
            Platform::MacOs => None,
        };

        let mut builds = Vec::new();
        for release in releases {
            if release.draft || release.prerelease {
                continue;
            }
            let Ok(version) = parse_loose_version(release.tag_name.trim_start_matches('v'))
            else {
                warn!("Skipping Bforartists release {:?}", release.tag_name);
                continue;
            };

            for asset in &release.assets {
                if !filter.is_match(&asset.name)
                    || !platform::matches_arch(&asset.name, self.arch)
                {
                    continue;
                }
                let mut identity = BuildIdentity::new(
                    version,
                    Lineage::Bforartists,
                    asset.download_url.clone(),
                );
                identity.commit_time = release.published_at;
                identity.content_hash = hashes(&release.tag_name);
                identity.executable_name = exe_name.map(str::to_string);
                builds.push(identity);
            }
        }
        builds
    }
}

#[async_trait]
impl BuildSource for BforartistsSource {
    fn id(&self) -> &'static str {
        "bforartists"
    }

    fn lineage(&self) -> Lineage {
        Lineage::Bforartists
    }

    async fn scrape(&self, http: &HttpClient) -> Result<Vec<BuildIdentity>> {
        let releases = self
            .feed
            .releases(http)
            .await
            .map_err(|e| e.source_scoped(self.id()))?;

        let mut hashes = std::collections::HashMap::new();
        for release in releases.iter().filter(|r| !r.draft && !r.prerelease) {
            if let Some(hash) = self.feed.tag_hash(http, &release.tag_name).await {
                hashes.insert(release.tag_name.clone(), hash);
            }
        }

        Ok(self.builds_from_releases(&releases, &|tag| hashes.get(tag).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn release(tag: &str, assets: &[&str], draft: bool) -> GhRelease {
        GhRelease {
            tag_name: tag.to_string(),
            draft,
            prerelease: false,
            published_at: Some(Utc::now()),
            assets: assets
                .iter()
                .map(|name| GhAsset {
                    name: name.to_string(),
                    size: 1,
                    download_url: format!("https://github.test/{tag}/{name}"),
                })
                .collect(),
        }
    }

    fn upbge_source(channel: UpbgeChannel) -> UpbgeSource {
        let dir = TempDir::new().unwrap();
        UpbgeSource {
            channel,
            feed: Arc::new(ReleaseFeed::new("UPBGE/upbge", dir.path().to_path_buf())),
            platform: Platform::Windows,
            arch: Arch::Amd64,
        }
    }

    fn no_hashes(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_stable_channel_skips_weekly_and_alpha() {
        let releases = vec![
            release("v0.36.1", &["upbge-0.36.1-windows-x86_64.zip"], false),
            release(
                "weekly-build-61",
                &["upbge-0.45.0-alpha-windows-x86_64.zip"],
                false,
            ),
            release("v0.40.0", &["upbge-0.40.0-windows-x86_64.zip"], true),
        ];
        let builds = upbge_source(UpbgeChannel::Stable).builds_from_releases(&releases, &no_hashes);
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].version, BuildVersion::new(0, 36, 1));
        assert_eq!(builds[0].lineage, Lineage::UpbgeStable);
        assert_eq!(builds[0].executable_name.as_deref(), Some("blender.exe"));
    }

    #[test]
    fn test_weekly_channel_takes_only_weeklies() {
        let releases = vec![
            release("v0.36.1", &["upbge-0.36.1-windows-x86_64.zip"], false),
            release(
                "weekly-build-61",
                &["upbge-0.45.0-alpha-windows-x86_64.zip"],
                false,
            ),
        ];
        let builds = upbge_source(UpbgeChannel::Weekly).builds_from_releases(&releases, &no_hashes);
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].version, BuildVersion::new(0, 45, 0));
        assert_eq!(builds[0].lineage, Lineage::UpbgeWeekly);
    }

    #[test]
    fn test_old_stable_releases_are_dropped() {
        let releases = vec![release(
            "v0.2.5",
            &["upbge-0.2.5-windows-x86_64.zip"],
            false,
        )];
        let builds = upbge_source(UpbgeChannel::Stable).builds_from_releases(&releases, &no_hashes);
        assert!(builds.is_empty());
    }

    #[test]
    fn test_hash_lookup_is_attached() {
        let releases = vec![release("v0.36.1", &["upbge-0.36.1-windows-x86_64.zip"], false)];
        let builds = upbge_source(UpbgeChannel::Stable)
            .builds_from_releases(&releases, &|_| Some("abc123def456".into()));
        assert_eq!(builds[0].content_hash.as_deref(), Some("abc123def456"));
    }

    #[test]
    fn test_bforartists_filters_platform_assets() {
        let dir = TempDir::new().unwrap();
        let source = BforartistsSource {
            feed: Arc::new(ReleaseFeed::new(
                "Bforartists/Bforartists",
                dir.path().to_path_buf(),
            )),
            platform: Platform::Windows,
            arch: Arch::Amd64,
        };
        let releases = vec![release(
            "v4.5.2",
            &[
                "bforartists-4.5.2-windows-x86_64.zip",
                "bforartists-4.5.2-linux-x86_64.tar.gz",
            ],
            false,
        )];
        let builds = source.builds_from_releases(&releases, &no_hashes);
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].version, BuildVersion::new(4, 5, 2));
        assert!(builds[0].source_url.contains("windows"));
    }

    #[test]
    fn test_release_feed_serves_stale_disk_cache() {
        let dir = TempDir::new().unwrap();
        let feed = ReleaseFeed::new("UPBGE/upbge", dir.path().to_path_buf());

        // Seed an expired disk cache.
        let cache = ReleasesDiskCache {
            last_fetched: Utc::now() - chrono::Duration::days(2),
            releases: vec![release("v0.36.1", &[], false)],
        };
        crate::metadata::atomic_write_json(&feed.disk_path(), &cache).unwrap();

        let read = feed.read_disk().expect("disk cache readable");
        assert_eq!(read.releases.len(), 1);
        assert_eq!(read.releases[0].tag_name, "v0.36.1");
    }
}
