//! Discovery coordinator: fans out to enabled source adapters, merges and
//! deduplicates their results, applies the version resolver, and swaps the
//! frozen catalog in atomically.

use crate::cancel::CancelToken;
use crate::catalog_cache::CatalogCache;
use crate::config::{EngineConfig, Lineage};
use crate::events::{EngineEvent, EventBus};
use crate::models::{BuildIdentity, Catalog, CatalogBuild, SourceStatus};
use crate::network::HttpClient;
use crate::resolver::VersionResolver;
use crate::sources::{
    AutomatedBranch, AutomatedSource, BforartistsSource, BuildSource, StableSource, UpbgeChannel,
    UpbgeSource,
};
use crate::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Runs discovery passes and owns the current catalog snapshot.
///
/// The catalog is single-writer (this coordinator) and multi-reader via
/// copy-on-swap: readers hold an `Arc` to a frozen pass result and never
/// observe a half-built catalog.
pub struct DiscoveryCoordinator {
    config: EngineConfig,
    http: Arc<HttpClient>,
    resolver: Arc<VersionResolver>,
    cache: CatalogCache,
    events: EventBus,
    /// Current catalog plus the sequence number of the pass that built it.
    current: RwLock<(u64, Arc<Catalog>)>,
    pass_seq: std::sync::atomic::AtomicU64,
}

impl DiscoveryCoordinator {
    pub fn new(
        config: EngineConfig,
        http: Arc<HttpClient>,
        resolver: Arc<VersionResolver>,
        events: EventBus,
    ) -> Self {
        let cache = CatalogCache::new(config.catalog_cache_path());
        Self {
            config,
            http,
            resolver,
            cache,
            events,
            current: RwLock::new((0, Arc::new(Catalog::default()))),
            pass_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Snapshot of the current catalog.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.current.read().expect("catalog lock poisoned").1.clone()
    }

    /// Load the persisted catalog from the last successful pass, before any
    /// network activity. Serves stale-but-usable data at startup and is the
    /// only catalog source in offline mode.
    pub fn load_cached(&self) -> Option<Arc<Catalog>> {
        let catalog = self.cache.read()?;
        let catalog = Arc::new(catalog);
        let mut current = self.current.write().expect("catalog lock poisoned");
        // A completed pass always beats the startup cache.
        if current.0 == 0 {
            current.1 = catalog.clone();
        }
        Some(catalog)
    }

    /// The source adapters enabled by the configuration.
    pub fn enabled_sources(&self) -> Vec<Box<dyn BuildSource>> {
        let config = &self.config;
        let enabled = &config.enabled_lineages;
        let mut sources: Vec<Box<dyn BuildSource>> = Vec::new();

        if enabled.contains(&Lineage::Stable) || enabled.contains(&Lineage::Lts) {
            sources.push(Box::new(StableSource::from_config(config)));
        }
        if enabled.contains(&Lineage::Daily) {
            sources.push(Box::new(AutomatedSource::new(AutomatedBranch::Daily, config)));
        }
        if enabled.contains(&Lineage::Experimental) {
            sources.push(Box::new(AutomatedSource::new(
                AutomatedBranch::Experimental,
                config,
            )));
            sources.push(Box::new(AutomatedSource::new(AutomatedBranch::Patch, config)));
        }
        let wants_upbge = enabled.contains(&Lineage::UpbgeStable)
            || enabled.contains(&Lineage::UpbgeWeekly);
        if wants_upbge {
            let feed = UpbgeSource::feed_for(config);
            if enabled.contains(&Lineage::UpbgeStable) {
                sources.push(Box::new(UpbgeSource::new(UpbgeChannel::Stable, feed.clone())));
            }
            if enabled.contains(&Lineage::UpbgeWeekly) {
                sources.push(Box::new(UpbgeSource::new(UpbgeChannel::Weekly, feed)));
            }
        }
        if enabled.contains(&Lineage::Bforartists) {
            sources.push(Box::new(BforartistsSource::new(config)));
        }

        sources
    }

    /// Run one discovery pass over the enabled sources.
    ///
    /// In offline mode the persisted catalog is served unmodified. The
    /// returned catalog is the pass result even when a concurrent newer
    /// pass won the swap.
    pub async fn run_pass(&self, cancel: &CancelToken) -> Result<Arc<Catalog>> {
        if self.config.offline {
            info!("Offline mode: serving cached catalog without discovery");
            return Ok(self
                .load_cached()
                .unwrap_or_else(|| Arc::new(Catalog::default())));
        }

        let seq = self
            .pass_seq
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        let sources = self.enabled_sources();
        info!("Discovery pass {seq} over {} sources", sources.len());

        let catalog = self
            .collect(sources, cancel)
            .await;
        let catalog = Arc::new(catalog);

        // Most recently completed pass wins: a straggler from pass N-1 must
        // not overwrite pass N's result.
        {
            let mut current = self.current.write().expect("catalog lock poisoned");
            if seq > current.0 {
                *current = (seq, catalog.clone());
            } else {
                debug!("Pass {seq} superseded by pass {}, not swapping", current.0);
            }
        }

        // Persist only when at least one source succeeded, so a total
        // outage never clobbers the last good snapshot.
        if catalog.sources.iter().any(|s| s.ok) {
            if let Err(e) = self.cache.write(&catalog) {
                warn!("Failed to persist catalog cache: {e}");
            }
        }

        self.events.emit(EngineEvent::CatalogUpdated {
            fetched_at: catalog.fetched_at,
            build_count: catalog.len(),
            degraded: catalog.is_degraded(),
        });

        Ok(catalog)
    }

    /// Collect adapter results into a frozen catalog. Deduplication and
    /// resolution are pure functions of the merged set, so the catalog is
    /// deterministic given deterministic adapter outputs.
    async fn collect(&self, sources: Vec<Box<dyn BuildSource>>, cancel: &CancelToken) -> Catalog {
        let http = self.http.clone();
        let results: Vec<(String, Lineage, Result<Vec<BuildIdentity>>)> =
            stream::iter(sources.into_iter().map(|source| {
                let http = http.clone();
                let cancel = cancel.clone();
                async move {
                    let id = source.id().to_string();
                    let lineage = source.lineage();
                    // Coarse cancellation: stop issuing new adapter
                    // requests; in-flight ones drain on their own.
                    if cancel.is_cancelled() {
                        return (id, lineage, Ok(Vec::new()));
                    }
                    let result = source.scrape(&http).await;
                    (id, lineage, result)
                }
            }))
            .buffer_unordered(self.config.discovery_workers.max(1))
            .collect()
            .await;

        self.merge(results)
    }

    fn merge(&self, results: Vec<(String, Lineage, Result<Vec<BuildIdentity>>)>) -> Catalog {
        let mut catalog = Catalog {
            fetched_at: Some(Utc::now()),
            ..Catalog::default()
        };
        let mut seen: HashSet<_> = HashSet::new();

        // Deterministic merge order: adapters report in a fixed order per
        // configuration, so dedup keeps the same winner every pass.
        let mut results = results;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        for (source_id, lineage, result) in results {
            match result {
                Ok(builds) => {
                    let mut kept = 0;
                    for identity in builds {
                        // Later-arriving duplicates are dropped.
                        if !seen.insert(identity.dedup_key()) {
                            continue;
                        }
                        kept += 1;
                        let resolved = self.resolver.resolve(&identity);
                        catalog
                            .builds
                            .entry(identity.lineage)
                            .or_default()
                            .push(CatalogBuild { identity, resolved });
                    }
                    catalog.sources.push(SourceStatus {
                        source_id,
                        lineage,
                        ok: true,
                        error: None,
                        build_count: kept,
                    });
                }
                Err(e) => {
                    // A failed adapter degrades its lineage only.
                    warn!("Source {source_id} failed: {e}");
                    catalog.sources.push(SourceStatus {
                        source_id,
                        lineage,
                        ok: false,
                        error: Some(e.to_string()),
                        build_count: 0,
                    });
                }
            }
        }

        // Freeze each lineage newest-first under the configured ranks.
        let config = self.config.clone();
        for builds in catalog.builds.values_mut() {
            builds.sort_by(|a, b| {
                b.identity
                    .cmp_ranked(&a.identity, |l| config.lineage_rank(l))
            });
        }

        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BuildVersion;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedSource {
        id: &'static str,
        lineage: Lineage,
        builds: Vec<BuildIdentity>,
    }

    #[async_trait]
    impl BuildSource for FixedSource {
        fn id(&self) -> &'static str {
            self.id
        }

        fn lineage(&self) -> Lineage {
            self.lineage
        }

        async fn scrape(&self, _http: &HttpClient) -> Result<Vec<BuildIdentity>> {
            Ok(self.builds.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl BuildSource for FailingSource {
        fn id(&self) -> &'static str {
            "broken"
        }

        fn lineage(&self) -> Lineage {
            Lineage::Daily
        }

        async fn scrape(&self, _http: &HttpClient) -> Result<Vec<BuildIdentity>> {
            Err(crate::VaultError::SourceUnavailable {
                source_id: "broken".into(),
                message: "connection refused".into(),
            })
        }
    }

    fn coordinator(root: &std::path::Path) -> DiscoveryCoordinator {
        let config = EngineConfig::with_library_root(root);
        let http = Arc::new(HttpClient::from_config(&config).unwrap());
        DiscoveryCoordinator::new(
            config,
            http,
            Arc::new(VersionResolver::builtin()),
            EventBus::new(),
        )
    }

    fn build(version: &str, lineage: Lineage, url: &str) -> BuildIdentity {
        BuildIdentity::new(version.parse().unwrap(), lineage, url)
    }

    #[tokio::test]
    async fn test_failed_source_does_not_poison_pass() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(dir.path());

        let sources: Vec<Box<dyn BuildSource>> = vec![
            Box::new(FixedSource {
                id: "stable",
                lineage: Lineage::Stable,
                builds: vec![build("4.2.0", Lineage::Stable, "https://dl/a")],
            }),
            Box::new(FailingSource),
        ];

        let catalog = coordinator.collect(sources, &CancelToken::new()).await;
        assert_eq!(catalog.len(), 1);
        assert!(catalog.is_degraded());
        assert_eq!(catalog.degraded_lineages(), vec![Lineage::Daily]);
        let stable_status = catalog
            .sources
            .iter()
            .find(|s| s.source_id == "stable")
            .unwrap();
        assert!(stable_status.ok);
        assert_eq!(stable_status.build_count, 1);
    }

    #[tokio::test]
    async fn test_duplicates_across_sources_collapse() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(dir.path());

        let duplicate = build("4.3.0", Lineage::Daily, "https://dl/dup").with_hash("aab");
        let sources: Vec<Box<dyn BuildSource>> = vec![
            Box::new(FixedSource {
                id: "a-first",
                lineage: Lineage::Daily,
                builds: vec![duplicate.clone()],
            }),
            Box::new(FixedSource {
                id: "b-second",
                lineage: Lineage::Daily,
                builds: vec![duplicate.clone()],
            }),
        ];

        let catalog = coordinator.collect(sources, &CancelToken::new()).await;
        assert_eq!(catalog.len(), 1);
        let statuses: Vec<usize> = catalog.sources.iter().map(|s| s.build_count).collect();
        assert_eq!(statuses, vec![1, 0]);
    }

    #[tokio::test]
    async fn test_resolver_applied_to_fork_builds() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(dir.path());

        let sources: Vec<Box<dyn BuildSource>> = vec![Box::new(FixedSource {
            id: "upbge-stable",
            lineage: Lineage::UpbgeStable,
            builds: vec![
                build("0.40.0", Lineage::UpbgeStable, "https://dl/upbge").with_hash("abc123"),
            ],
        })];

        let catalog = coordinator.collect(sources, &CancelToken::new()).await;
        let fork = catalog.newest(Lineage::UpbgeStable).unwrap();
        assert_eq!(
            fork.resolved,
            crate::models::ResolvedVersion::Resolved(BuildVersion::new(4, 0, 0))
        );
    }

    #[tokio::test]
    async fn test_lineage_sorted_newest_first() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(dir.path());

        let sources: Vec<Box<dyn BuildSource>> = vec![Box::new(FixedSource {
            id: "stable",
            lineage: Lineage::Stable,
            builds: vec![
                build("4.1.0", Lineage::Stable, "https://dl/41"),
                build("4.2.0", Lineage::Stable, "https://dl/42"),
                build("3.6.14", Lineage::Stable, "https://dl/36"),
            ],
        })];

        let catalog = coordinator.collect(sources, &CancelToken::new()).await;
        let versions: Vec<BuildVersion> = catalog.builds[&Lineage::Stable]
            .iter()
            .map(|b| b.identity.version)
            .collect();
        assert_eq!(
            versions,
            vec![
                BuildVersion::new(4, 2, 0),
                BuildVersion::new(4, 1, 0),
                BuildVersion::new(3, 6, 14)
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_pass_issues_no_requests() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(dir.path());
        let cancel = CancelToken::new();
        cancel.cancel();

        let sources: Vec<Box<dyn BuildSource>> = vec![Box::new(FixedSource {
            id: "stable",
            lineage: Lineage::Stable,
            builds: vec![build("4.2.0", Lineage::Stable, "https://dl/a")],
        })];

        let catalog = coordinator.collect(sources, &cancel).await;
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_offline_pass_serves_cache_unmodified() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_library_root(dir.path());
        config.offline = true;
        let http = Arc::new(HttpClient::from_config(&config).unwrap());
        let coordinator = DiscoveryCoordinator::new(
            config.clone(),
            http,
            Arc::new(VersionResolver::builtin()),
            EventBus::new(),
        );

        // Seed the cache file directly.
        let mut cached = Catalog {
            fetched_at: Some(Utc::now()),
            ..Catalog::default()
        };
        cached.builds.insert(
            Lineage::Stable,
            vec![CatalogBuild {
                identity: build("4.2.0", Lineage::Stable, "https://dl/a"),
                resolved: crate::models::ResolvedVersion::Resolved(BuildVersion::new(4, 2, 0)),
            }],
        );
        CatalogCache::new(config.catalog_cache_path())
            .write(&cached)
            .unwrap();

        let served = coordinator.run_pass(&CancelToken::new()).await.unwrap();
        assert_eq!(*served, cached);
    }

    #[tokio::test]
    async fn test_enabled_sources_follow_config() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::with_library_root(dir.path());
        config.enabled_lineages =
            [Lineage::Stable, Lineage::UpbgeStable].into_iter().collect();
        let http = Arc::new(HttpClient::from_config(&config).unwrap());
        let coordinator = DiscoveryCoordinator::new(
            config,
            http,
            Arc::new(VersionResolver::builtin()),
            EventBus::new(),
        );

        let ids: Vec<&str> = coordinator
            .enabled_sources()
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(ids, vec!["stable", "upbge-stable"]);
    }
}
