//! Update decision engine.
//!
//! Pure comparison of installed entries against the current catalog; no
//! I/O. Fork lineages compare in resolved common-version space, so an
//! installed UPBGE build resolved to `4.0` sees an update in a fork build
//! resolving to `4.5` regardless of the fork's native numbering. Builds
//! without a resolved version are excluded entirely.

use blendvault_core::models::CatalogBuild;
use blendvault_core::{
    BuildIdentity, Catalog, EngineConfig, LibraryEntry, UpdateScope, UpdateStrategy,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;

/// One "update available" fact for an installed entry, ready for the
/// presentation layer to render.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAdvice {
    /// The installed entry the update applies to.
    pub entry_path: PathBuf,
    /// The catalog build to install.
    pub candidate: BuildIdentity,
    /// What happens to the superseded entry after a successful install.
    pub strategy: UpdateStrategy,
}

/// Check every installed entry against the catalog.
pub fn check_updates(
    entries: &[LibraryEntry],
    catalog: &Catalog,
    config: &EngineConfig,
) -> Vec<UpdateAdvice> {
    let installed_hashes: HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.identity.content_hash.as_deref())
        .collect();

    entries
        .iter()
        .filter_map(|entry| check_entry(entry, &installed_hashes, catalog, config))
        .collect()
}

/// Check one installed entry. `installed_hashes` holds the content hashes
/// of every installed build, so a build already present under another
/// entry is never advised.
pub fn check_entry(
    entry: &LibraryEntry,
    installed_hashes: &HashSet<&str>,
    catalog: &Catalog,
    config: &EngineConfig,
) -> Option<UpdateAdvice> {
    let lineage = entry.lineage();
    if !config.update_check.contains(&lineage) {
        return None;
    }
    let entry_version = entry.resolved.resolved()?;
    let candidates = catalog.builds.get(&lineage)?;
    let scope = config.update_scope(lineage);

    let mut best: Option<(&CatalogBuild, blendvault_core::BuildVersion)> = None;
    for candidate in candidates {
        let Some(candidate_version) = candidate.resolved.resolved() else {
            continue;
        };
        if !in_scope(scope, entry_version, candidate_version) {
            continue;
        }
        if let Some(hash) = candidate.identity.content_hash.as_deref() {
            if installed_hashes.contains(hash) {
                continue;
            }
        }
        if !is_newer(entry, entry_version, candidate, candidate_version) {
            continue;
        }

        let better = match best {
            None => true,
            Some((current, current_version)) => {
                (candidate_version, candidate.identity.commit_time)
                    > (current_version, current.identity.commit_time)
            }
        };
        if better {
            best = Some((candidate, candidate_version));
        }
    }

    best.map(|(candidate, _)| UpdateAdvice {
        entry_path: entry.path.clone(),
        candidate: candidate.identity.clone(),
        strategy: config.update_strategy(lineage),
    })
}

fn in_scope(
    scope: UpdateScope,
    entry: blendvault_core::BuildVersion,
    candidate: blendvault_core::BuildVersion,
) -> bool {
    match scope {
        UpdateScope::Major => true,
        UpdateScope::Minor => candidate.same_major(&entry),
        UpdateScope::Patch => candidate.same_minor(&entry),
    }
}

/// A candidate is newer on a strictly greater resolved version, or at an
/// equal resolved version when it is a different build with a strictly
/// newer commit time (the daily same-version-newer-hash case).
fn is_newer(
    entry: &LibraryEntry,
    entry_version: blendvault_core::BuildVersion,
    candidate: &CatalogBuild,
    candidate_version: blendvault_core::BuildVersion,
) -> bool {
    if candidate_version > entry_version {
        return true;
    }
    if candidate_version < entry_version {
        return false;
    }
    match (entry.identity.commit_time, candidate.identity.commit_time) {
        (Some(installed), Some(available)) => {
            available > installed
                && candidate.identity.content_hash != entry.identity.content_hash
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blendvault_core::models::ResolvedVersion;
    use blendvault_core::{BuildVersion, Lineage};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn entry(
        version: &str,
        resolved: &str,
        lineage: Lineage,
        hash: Option<&str>,
    ) -> LibraryEntry {
        let mut identity = BuildIdentity::new(
            version.parse().unwrap(),
            lineage,
            format!("/lib/{}/{version}", lineage.dir_name()),
        );
        identity.content_hash = hash.map(str::to_string);
        identity.commit_time = Some(Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap());
        LibraryEntry {
            path: identity.source_url.clone().into(),
            identity,
            resolved: ResolvedVersion::Resolved(resolved.parse().unwrap()),
            running_instances: 0,
            is_favorite: false,
            is_custom: false,
            custom_name: None,
        }
    }

    fn candidate(
        version: &str,
        resolved: Option<&str>,
        lineage: Lineage,
        hash: Option<&str>,
        day: u32,
    ) -> CatalogBuild {
        let mut identity = BuildIdentity::new(
            version.parse().unwrap(),
            lineage,
            format!("https://dl/{version}"),
        );
        identity.content_hash = hash.map(str::to_string);
        identity.commit_time = Some(Utc.with_ymd_and_hms(2024, 7, day, 0, 0, 0).unwrap());
        CatalogBuild {
            identity,
            resolved: match resolved {
                Some(v) => ResolvedVersion::Resolved(v.parse().unwrap()),
                None => ResolvedVersion::Unresolved,
            },
        }
    }

    fn catalog_with(lineage: Lineage, builds: Vec<CatalogBuild>) -> Catalog {
        Catalog {
            builds: BTreeMap::from([(lineage, builds)]),
            fetched_at: Some(Utc::now()),
            sources: Vec::new(),
        }
    }

    #[test]
    fn test_fork_update_compares_in_resolved_space() {
        // Installed UPBGE 0.40.0 (resolves to 4.0.0); the catalog carries a
        // fork build at native 0.45.0 resolving to 4.5.0. Native version
        // space says 0.45 < 4.0; resolved space says update available.
        let installed = entry("0.40.0", "4.0.0", Lineage::UpbgeStable, Some("oldhash"));
        let catalog = catalog_with(
            Lineage::UpbgeStable,
            vec![candidate(
                "0.45.0",
                Some("4.5.0"),
                Lineage::UpbgeStable,
                Some("newhash"),
                20,
            )],
        );
        let config = EngineConfig::with_library_root("/lib");

        let advice = check_updates(&[installed], &catalog, &config);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].candidate.version, BuildVersion::new(0, 45, 0));
    }

    #[test]
    fn test_equal_resolved_version_is_up_to_date() {
        // A fork build resolving to the same common version is not an
        // update, whatever its native number looks like.
        let installed = entry("0.40.0", "4.0.0", Lineage::UpbgeStable, Some("oldhash"));
        let catalog = catalog_with(
            Lineage::UpbgeStable,
            vec![candidate(
                "0.41.0",
                Some("4.0.0"),
                Lineage::UpbgeStable,
                Some("newhash"),
                1,
            )],
        );
        let config = EngineConfig::with_library_root("/lib");

        assert!(check_updates(&[installed], &catalog, &config).is_empty());
    }

    #[test]
    fn test_unresolved_candidates_are_excluded() {
        let installed = entry("0.40.0", "4.0.0", Lineage::UpbgeStable, None);
        let catalog = catalog_with(
            Lineage::UpbgeStable,
            vec![candidate("0.99.0", None, Lineage::UpbgeStable, Some("h"), 20)],
        );
        let config = EngineConfig::with_library_root("/lib");

        assert!(check_updates(&[installed], &catalog, &config).is_empty());
    }

    #[test]
    fn test_installed_hash_is_never_advised() {
        let installed = entry("4.3.0", "4.3.0", Lineage::Daily, Some("aab"));
        let catalog = catalog_with(
            Lineage::Daily,
            vec![candidate("4.4.0", Some("4.4.0"), Lineage::Daily, Some("aab"), 20)],
        );
        let config = EngineConfig::with_library_root("/lib");

        assert!(check_updates(&[installed], &catalog, &config).is_empty());
    }

    #[test]
    fn test_same_version_newer_commit_advises_daily_rebuild() {
        let installed = entry("4.3.0", "4.3.0", Lineage::Daily, Some("aab"));
        let catalog = catalog_with(
            Lineage::Daily,
            vec![candidate("4.3.0", Some("4.3.0"), Lineage::Daily, Some("aac"), 20)],
        );
        let config = EngineConfig::with_library_root("/lib");

        let advice = check_updates(&[installed], &catalog, &config);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].candidate.content_hash.as_deref(), Some("aac"));
    }

    #[test]
    fn test_update_scope_minor_filters_major_bumps() {
        let installed = entry("4.1.0", "4.1.0", Lineage::Stable, None);
        let catalog = catalog_with(
            Lineage::Stable,
            vec![
                candidate("5.0.0", Some("5.0.0"), Lineage::Stable, None, 20),
                candidate("4.2.0", Some("4.2.0"), Lineage::Stable, None, 18),
            ],
        );
        let mut config = EngineConfig::with_library_root("/lib");
        config
            .update_scopes
            .insert(Lineage::Stable, UpdateScope::Minor);

        let advice = check_updates(&[installed], &catalog, &config);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].candidate.version, BuildVersion::new(4, 2, 0));
    }

    #[test]
    fn test_disabled_lineage_is_skipped() {
        let installed = entry("4.1.0", "4.1.0", Lineage::Stable, None);
        let catalog = catalog_with(
            Lineage::Stable,
            vec![candidate("4.2.0", Some("4.2.0"), Lineage::Stable, None, 20)],
        );
        let mut config = EngineConfig::with_library_root("/lib");
        config.update_check.remove(&Lineage::Stable);

        assert!(check_updates(&[installed], &catalog, &config).is_empty());
    }

    #[test]
    fn test_best_candidate_wins_among_many() {
        let installed = entry("4.1.0", "4.1.0", Lineage::Stable, None);
        let catalog = catalog_with(
            Lineage::Stable,
            vec![
                candidate("4.2.0", Some("4.2.0"), Lineage::Stable, None, 10),
                candidate("4.3.0", Some("4.3.0"), Lineage::Stable, None, 12),
                candidate("4.2.1", Some("4.2.1"), Lineage::Stable, None, 14),
            ],
        );
        let config = EngineConfig::with_library_root("/lib");

        let advice = check_updates(&[installed], &catalog, &config);
        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].candidate.version, BuildVersion::new(4, 3, 0));
    }

    #[test]
    fn test_strategy_comes_from_config() {
        let installed = entry("4.1.0", "4.1.0", Lineage::Stable, None);
        let catalog = catalog_with(
            Lineage::Stable,
            vec![candidate("4.2.0", Some("4.2.0"), Lineage::Stable, None, 20)],
        );
        let mut config = EngineConfig::with_library_root("/lib");
        config
            .update_strategies
            .insert(Lineage::Stable, UpdateStrategy::ReplaceInPlace);

        let advice = check_updates(&[installed], &catalog, &config);
        assert_eq!(advice[0].strategy, UpdateStrategy::ReplaceInPlace);
    }

    #[test]
    fn test_decision_is_pure() {
        let installed = entry("4.1.0", "4.1.0", Lineage::Stable, None);
        let catalog = catalog_with(
            Lineage::Stable,
            vec![candidate("4.2.0", Some("4.2.0"), Lineage::Stable, None, 20)],
        );
        let config = EngineConfig::with_library_root("/lib");

        let first = check_updates(std::slice::from_ref(&installed), &catalog, &config);
        for _ in 0..5 {
            assert_eq!(
                check_updates(std::slice::from_ref(&installed), &catalog, &config),
                first
            );
        }
    }
}
