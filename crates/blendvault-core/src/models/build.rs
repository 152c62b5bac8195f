//! Build identity, catalog, and resolution types.

use crate::config::Lineage;
use crate::models::version::BuildVersion;
use crate::{Result, VaultError};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Immutable identity of one discoverable or installed build.
///
/// `(lineage, version, content_hash)` is the uniqueness key within a
/// discovery pass; two identities differing only in `commit_time` are the
/// same build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildIdentity {
    pub version: BuildVersion,
    pub lineage: Lineage,
    /// Short build hash; absent only for stable releases.
    #[serde(default)]
    pub content_hash: Option<String>,
    /// Tertiary ordering key, also used for display.
    #[serde(default)]
    pub commit_time: Option<DateTime<Utc>>,
    /// Where to fetch the archive from; the directory path for installed
    /// builds.
    pub source_url: String,
    /// Platform-specific binary filename, when it differs from the lineage
    /// default.
    #[serde(default)]
    pub executable_name: Option<String>,
    /// Archive checksum published by the source, verified after download.
    #[serde(default)]
    pub archive_sha256: Option<String>,
}

fn version_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d+)\.(\d+)\.(\d+)(?:-([a-z][a-z0-9-]*))?(?:\+([0-9a-zA-Z]+))?(?:@(.+))?$",
        )
        .expect("static version string grammar")
    })
}

impl BuildIdentity {
    pub fn new(version: BuildVersion, lineage: Lineage, source_url: impl Into<String>) -> Self {
        Self {
            version,
            lineage,
            content_hash: None,
            commit_time: None,
            source_url: source_url.into(),
            executable_name: None,
            archive_sha256: None,
        }
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_commit_time(mut self, time: DateTime<Utc>) -> Self {
        self.commit_time = Some(time);
        self
    }

    pub fn with_executable(mut self, name: impl Into<String>) -> Self {
        self.executable_name = Some(name.into());
        self
    }

    /// Deduplication key: `(lineage, version, content_hash)`.
    pub fn dedup_key(&self) -> (Lineage, BuildVersion, Option<String>) {
        (self.lineage, self.version, self.content_hash.clone())
    }

    /// Canonical version string:
    /// `<major>.<minor>.<patch>[-<lineage>][+<hash>][@<commitTime>]`.
    pub fn version_string(&self) -> String {
        let mut s = format!("{}-{}", self.version, self.lineage);
        if let Some(ref hash) = self.content_hash {
            s.push('+');
            s.push_str(hash);
        }
        if let Some(time) = self.commit_time {
            s.push('@');
            s.push_str(&time.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        s
    }

    /// Parse the version string grammar back into an identity.
    ///
    /// Fails with `MalformedVersion` on missing numeric components; the
    /// optional fields default to absent, an absent lineage to `custom`.
    pub fn parse_version_string(s: &str, source_url: impl Into<String>) -> Result<Self> {
        let malformed = || VaultError::MalformedVersion {
            input: s.to_string(),
        };
        let caps = version_string_re().captures(s.trim()).ok_or_else(malformed)?;
        let num = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .ok_or_else(malformed)
        };
        let version = BuildVersion::new(num(1)?, num(2)?, num(3)?);
        let lineage = match caps.get(4) {
            Some(m) => Lineage::from_str(m.as_str()).ok_or_else(malformed)?,
            None => Lineage::Custom,
        };
        let content_hash = caps.get(5).map(|m| m.as_str().to_string());
        let commit_time = match caps.get(6) {
            Some(m) => Some(
                DateTime::parse_from_rfc3339(m.as_str())
                    .map_err(|_| malformed())?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            version,
            lineage,
            content_hash,
            commit_time,
            source_url: source_url.into(),
            executable_name: None,
            archive_sha256: None,
        })
    }

    /// Total order over identities: numeric version, then lineage rank, then
    /// commit time, with the remaining fields as deterministic tie-breaks
    /// (never comparison semantics). Sorting descending yields the catalog
    /// display order: newest version first, stable before daily, newer
    /// commits first.
    pub fn cmp_ranked(&self, other: &Self, rank: impl Fn(Lineage) -> u8) -> Ordering {
        self.version
            .cmp(&other.version)
            .then_with(|| rank(self.lineage).cmp(&rank(other.lineage)))
            .then_with(|| self.lineage.cmp(&other.lineage))
            .then_with(|| self.commit_time.cmp(&other.commit_time))
            .then_with(|| self.content_hash.cmp(&other.content_hash))
            .then_with(|| self.source_url.cmp(&other.source_url))
            .then_with(|| self.executable_name.cmp(&other.executable_name))
            .then_with(|| self.archive_sha256.cmp(&other.archive_sha256))
    }
}

impl Ord for BuildIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_ranked(other, |l| l.default_rank())
    }
}

impl PartialOrd for BuildIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The common-lineage version a build maps to.
///
/// `Unresolved` builds remain listed but are excluded from cross-fork
/// compatibility features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "version")]
pub enum ResolvedVersion {
    Resolved(BuildVersion),
    Unresolved,
}

impl ResolvedVersion {
    pub fn resolved(&self) -> Option<BuildVersion> {
        match self {
            ResolvedVersion::Resolved(v) => Some(*v),
            ResolvedVersion::Unresolved => None,
        }
    }
}

/// One build in the catalog with its resolved common-lineage version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogBuild {
    pub identity: BuildIdentity,
    pub resolved: ResolvedVersion,
}

/// Per-source outcome of one discovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub source_id: String,
    pub lineage: Lineage,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub build_count: usize,
}

/// Normalized, deduplicated result of one discovery pass.
///
/// Created by the discovery coordinator, then frozen: consumers only ever
/// see complete snapshots behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    /// Per-lineage builds, ordered newest first.
    pub builds: BTreeMap<Lineage, Vec<CatalogBuild>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub sources: Vec<SourceStatus>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.builds.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.builds.values().all(Vec::is_empty)
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &CatalogBuild> {
        self.builds.values().flatten()
    }

    /// Newest candidate for a lineage, if any.
    pub fn newest(&self, lineage: Lineage) -> Option<&CatalogBuild> {
        self.builds.get(&lineage).and_then(|v| v.first())
    }

    /// True when at least one enabled source failed this pass.
    pub fn is_degraded(&self) -> bool {
        self.sources.iter().any(|s| !s.ok)
    }

    /// Lineages whose discovery failed this pass.
    pub fn degraded_lineages(&self) -> Vec<Lineage> {
        self.sources
            .iter()
            .filter(|s| !s.ok)
            .map(|s| s.lineage)
            .collect()
    }
}
