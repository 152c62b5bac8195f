//! blendvault core - headless catalog and synchronization engine for
//! Blender-family build libraries.
//!
//! The engine discovers available remote builds across independent origins
//! (official stable/daily/experimental lineages plus the Bforartists and
//! UPBGE forks), reconciles them against the local installed-build library,
//! resolves cross-fork version compatibility, and hands normalized
//! snapshots to whoever is presenting them.
//!
//! The install pipeline (download, verify, extract, fixup, finalize) lives
//! in the `blendvault-installer` crate.
//!
//! # Example
//!
//! ```rust,ignore
//! use blendvault_core::{EngineConfig, VaultEngine};
//!
//! #[tokio::main]
//! async fn main() -> blendvault_core::Result<()> {
//!     let engine = VaultEngine::new(EngineConfig::with_library_root("/data/builds"))?;
//!
//!     // Serve the cached catalog immediately, then refresh.
//!     let cancel = blendvault_core::CancelToken::new();
//!     let catalog = engine.refresh(&cancel).await?;
//!     println!("{} builds available", catalog.len());
//!
//!     for entry in engine.scan_library()? {
//!         println!("installed: {}", entry.display_name());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod catalog_cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod library;
pub mod metadata;
pub mod models;
pub mod network;
pub mod platform;
pub mod resolver;
pub mod sources;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{EngineConfig, Lineage, PathsConfig, UpdateScope, UpdateStrategy};
pub use error::{Result, VaultError};
pub use events::{EngineEvent, EventBus};
pub use library::{annotate_running_instances, LibraryScanner};
pub use models::{
    BuildIdentity, BuildVersion, Catalog, CatalogBuild, LibraryEntry, ResolvedVersion,
    TaskSnapshot, TaskState, VersionSearchQuery,
};
pub use network::{ArchiveDownloader, HttpClient};
pub use resolver::VersionResolver;

use discovery::DiscoveryCoordinator;
use std::path::Path;
use std::sync::Arc;

/// Main entry point tying configuration, discovery, and the library
/// scanner together.
pub struct VaultEngine {
    config: EngineConfig,
    http: Arc<HttpClient>,
    resolver: Arc<VersionResolver>,
    discovery: DiscoveryCoordinator,
    scanner: Arc<LibraryScanner>,
    events: EventBus,
}

impl VaultEngine {
    /// Build an engine from a configuration snapshot. Reads the fork
    /// mapping table and the catalog cache from under the library root;
    /// performs no network activity.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let http = Arc::new(HttpClient::from_config(&config)?);
        let resolver = Arc::new(VersionResolver::from_json_file(
            &config.cache_dir().join(PathsConfig::FORK_MAP_FILENAME),
        )?);
        let events = EventBus::new();
        let scanner = Arc::new(LibraryScanner::new(&config, resolver.clone()));
        let discovery = DiscoveryCoordinator::new(
            config.clone(),
            http.clone(),
            resolver.clone(),
            events.clone(),
        );
        let engine = Self {
            config,
            http,
            resolver,
            discovery,
            scanner,
            events,
        };
        engine.discovery.load_cached();
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn http(&self) -> Arc<HttpClient> {
        self.http.clone()
    }

    pub fn resolver(&self) -> Arc<VersionResolver> {
        self.resolver.clone()
    }

    pub fn scanner(&self) -> Arc<LibraryScanner> {
        self.scanner.clone()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Current catalog snapshot (the cached one until a pass completes).
    pub fn catalog(&self) -> Arc<Catalog> {
        self.discovery.catalog()
    }

    /// Run a discovery pass (or serve the cache in offline mode).
    pub async fn refresh(&self, cancel: &CancelToken) -> Result<Arc<Catalog>> {
        self.discovery.run_pass(cancel).await
    }

    /// Fresh snapshot of the installed library, with running-instance
    /// counts attached.
    pub fn scan_library(&self) -> Result<Vec<LibraryEntry>> {
        let mut entries = self.scanner.scan()?;
        annotate_running_instances(&mut entries);
        Ok(entries)
    }

    /// Pick the quick-launch default: the newest installed build matching
    /// `query`, preferring favorites.
    pub fn quick_launch<'a>(
        &self,
        entries: &'a [LibraryEntry],
        query: &VersionSearchQuery,
    ) -> Option<&'a LibraryEntry> {
        let identities: Vec<&BuildIdentity> = entries.iter().map(|e| &e.identity).collect();
        let matched = query.matches(&identities);
        entries
            .iter()
            .filter(|e| matched.iter().any(|m| std::ptr::eq(*m, &e.identity)))
            .max_by(|a, b| {
                a.is_favorite
                    .cmp(&b.is_favorite)
                    .then_with(|| a.identity.cmp(&b.identity))
            })
    }

    /// Library subdirectory a lineage installs into.
    pub fn lineage_dir(&self, lineage: Lineage) -> std::path::PathBuf {
        self.config.library_root.join(lineage.dir_name())
    }
}

/// Convenience constructor rooted at an explicit library directory.
impl VaultEngine {
    pub fn at_library_root(root: impl AsRef<Path>) -> Result<Self> {
        Self::new(EngineConfig::with_library_root(root.as_ref()))
    }
}
