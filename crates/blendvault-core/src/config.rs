//! Centralized configuration for the blendvault engine.
//!
//! Constants live in const-holder structs; runtime options live in an
//! immutable [`EngineConfig`] snapshot that is threaded into every component
//! at construction time. Components never read ambient global state, so a
//! discovery pass or pipeline task is reproducible given its inputs.

use crate::models::BuildVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const MAX_RETRIES: u32 = 3;
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const GITHUB_API_BASE: &'static str = "https://api.github.com";
    pub const RELEASES_TTL: Duration = Duration::from_secs(3600);
    pub const STABLE_INDEX_URL: &'static str =
        "https://download.blender.org/release/index.json";
    pub const BUILDER_BASE_URL: &'static str = "https://builder.blender.org/download";
    pub const UPBGE_REPO: &'static str = "UPBGE/upbge";
    pub const BFORARTISTS_REPO: &'static str = "Bforartists/Bforartists";
}

/// Shared directory and file name configuration.
pub struct PathsConfig;

impl PathsConfig {
    pub const CACHE_DIR_NAME: &'static str = "cache";
    pub const STAGING_DIR_NAME: &'static str = ".staging";
    pub const DOWNLOADS_DIR_NAME: &'static str = "downloads";
    pub const SIDECAR_FILENAME: &'static str = ".bvinfo";
    pub const CATALOG_CACHE_FILENAME: &'static str = "catalog.json";
    pub const SCAN_CACHE_FILENAME: &'static str = "scan-cache.json";
    pub const FORK_MAP_FILENAME: &'static str = "fork-versions.json";
}

/// A build family with its own versioning and distribution source.
///
/// The lineage of a build never mutates after creation. LTS builds share the
/// stable lineage's library subdirectory but keep their own identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lineage {
    Stable,
    Lts,
    Daily,
    Experimental,
    Bforartists,
    UpbgeStable,
    UpbgeWeekly,
    Custom,
}

impl Lineage {
    pub const ALL: [Lineage; 8] = [
        Lineage::Stable,
        Lineage::Lts,
        Lineage::Daily,
        Lineage::Experimental,
        Lineage::Bforartists,
        Lineage::UpbgeStable,
        Lineage::UpbgeWeekly,
        Lineage::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Lineage::Stable => "stable",
            Lineage::Lts => "lts",
            Lineage::Daily => "daily",
            Lineage::Experimental => "experimental",
            Lineage::Bforartists => "bforartists",
            Lineage::UpbgeStable => "upbge-stable",
            Lineage::UpbgeWeekly => "upbge-weekly",
            Lineage::Custom => "custom",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stable" => Some(Lineage::Stable),
            "lts" => Some(Lineage::Lts),
            "daily" => Some(Lineage::Daily),
            "experimental" | "patch" => Some(Lineage::Experimental),
            "bforartists" => Some(Lineage::Bforartists),
            "upbge-stable" => Some(Lineage::UpbgeStable),
            "upbge-weekly" => Some(Lineage::UpbgeWeekly),
            "custom" => Some(Lineage::Custom),
            _ => None,
        }
    }

    /// Library subdirectory this lineage installs into. LTS builds live in
    /// the stable subdirectory.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Lineage::Stable | Lineage::Lts => "stable",
            Lineage::Daily => "daily",
            Lineage::Experimental => "experimental",
            Lineage::Bforartists => "bforartists",
            Lineage::UpbgeStable => "upbge-stable",
            Lineage::UpbgeWeekly => "upbge-weekly",
            Lineage::Custom => "custom",
        }
    }

    /// Default ordering rank among builds with equal numeric version.
    /// Higher sorts first: stable > daily > experimental > custom.
    pub fn default_rank(&self) -> u8 {
        match self {
            Lineage::Stable => 70,
            Lineage::Lts => 65,
            Lineage::Daily => 50,
            Lineage::Experimental => 40,
            Lineage::Bforartists => 30,
            Lineage::UpbgeStable => 25,
            Lineage::UpbgeWeekly => 20,
            Lineage::Custom => 10,
        }
    }

    /// Whether this lineage is a fork of the common version lineage.
    pub fn is_fork(&self) -> bool {
        matches!(
            self,
            Lineage::Bforartists | Lineage::UpbgeStable | Lineage::UpbgeWeekly
        )
    }
}

impl std::fmt::Display for Lineage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happens to the superseded build once an update install succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStrategy {
    /// The new install replaces the superseded entry after success.
    ReplaceInPlace,
    /// Both builds are retained; the most recent becomes the quick-launch
    /// default.
    InstallAlongside,
}

/// How far afield an update candidate may be from the installed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateScope {
    /// Any newer version qualifies.
    Major,
    /// Same major only.
    Minor,
    /// Same major.minor only.
    Patch,
}

/// Proxy settings forwarded to the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://host:port` or `socks5h://host:port`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// TLS trust overrides forwarded to the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub accept_invalid_certs: bool,
    /// Extra PEM-encoded root certificate appended to the trust store.
    pub extra_root_cert: Option<PathBuf>,
}

/// Immutable configuration snapshot for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the on-disk build library.
    pub library_root: PathBuf,
    /// Lineages enabled for discovery.
    pub enabled_lineages: BTreeSet<Lineage>,
    /// Bounded worker count for the discovery pool.
    pub discovery_workers: usize,
    /// Bounded worker count for the install pool, sized independently so a
    /// burst of discovery cannot starve or be starved by ongoing installs.
    pub install_workers: usize,
    /// Skip discovery entirely and serve only the catalog cache.
    pub offline: bool,
    /// Builds older than this are dropped from the stable source.
    pub min_stable_version: Option<BuildVersion>,
    /// Include the buildbot archive listings for daily/experimental.
    pub include_archive_builds: bool,
    /// Lineages update checking is enabled for.
    pub update_check: BTreeSet<Lineage>,
    /// Per-lineage update strategy; `update_strategy_default` fills the gaps.
    pub update_strategies: BTreeMap<Lineage, UpdateStrategy>,
    pub update_strategy_default: UpdateStrategy,
    /// Per-lineage update scope; `update_scope_default` fills the gaps.
    pub update_scopes: BTreeMap<Lineage, UpdateScope>,
    pub update_scope_default: UpdateScope,
    /// Optional override for lineage ordering ranks.
    pub lineage_ranks: Option<BTreeMap<Lineage, u8>>,
    /// Bearer token injected into GitHub API requests.
    pub github_token: Option<String>,
    pub proxy: Option<ProxyConfig>,
    pub tls: TlsConfig,
    pub user_agent: String,
}

impl EngineConfig {
    /// Configuration rooted at an explicit library directory with every
    /// other knob at its default.
    pub fn with_library_root(root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: root.into(),
            ..Self::default()
        }
    }

    /// Cache directory under the library root.
    pub fn cache_dir(&self) -> PathBuf {
        self.library_root.join(PathsConfig::CACHE_DIR_NAME)
    }

    /// Staging directory for in-flight installs.
    pub fn staging_dir(&self) -> PathBuf {
        self.library_root.join(PathsConfig::STAGING_DIR_NAME)
    }

    pub fn catalog_cache_path(&self) -> PathBuf {
        self.cache_dir().join(PathsConfig::CATALOG_CACHE_FILENAME)
    }

    pub fn scan_cache_path(&self) -> PathBuf {
        self.cache_dir().join(PathsConfig::SCAN_CACHE_FILENAME)
    }

    pub fn update_strategy(&self, lineage: Lineage) -> UpdateStrategy {
        self.update_strategies
            .get(&lineage)
            .copied()
            .unwrap_or(self.update_strategy_default)
    }

    pub fn update_scope(&self, lineage: Lineage) -> UpdateScope {
        self.update_scopes
            .get(&lineage)
            .copied()
            .unwrap_or(self.update_scope_default)
    }

    pub fn lineage_rank(&self, lineage: Lineage) -> u8 {
        self.lineage_ranks
            .as_ref()
            .and_then(|ranks| ranks.get(&lineage).copied())
            .unwrap_or_else(|| lineage.default_rank())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let library_root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blendvault");
        Self {
            library_root,
            enabled_lineages: [
                Lineage::Stable,
                Lineage::Lts,
                Lineage::Daily,
                Lineage::Experimental,
            ]
            .into_iter()
            .collect(),
            discovery_workers: 4,
            install_workers: 2,
            offline: false,
            min_stable_version: None,
            include_archive_builds: false,
            update_check: Lineage::ALL.into_iter().collect(),
            update_strategies: BTreeMap::new(),
            update_strategy_default: UpdateStrategy::InstallAlongside,
            update_scopes: BTreeMap::new(),
            update_scope_default: UpdateScope::Major,
            lineage_ranks: None,
            github_token: None,
            proxy: None,
            tls: TlsConfig::default(),
            user_agent: format!("blendvault/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
