//! Cross-fork version resolution.
//!
//! Forks version their builds on their own scheme (UPBGE `0.36` corresponds
//! to the common lineage's `3.6`). The resolver maps fork-native versions
//! onto the common lineage using a data-driven table so cross-fork features
//! (shared templates, update comparisons) operate in one version space.

use crate::config::Lineage;
use crate::metadata::atomic_read_json;
use crate::models::{BuildIdentity, BuildVersion, ResolvedVersion};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

/// One row of a fork mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkMapRow {
    /// Fork-native version this row starts applying at.
    pub fork: BuildVersion,
    /// Common-lineage version it maps to.
    pub common: BuildVersion,
    /// Platform-specific on-disk configuration folder used by builds in
    /// this range; exposed read-only to the settings layer.
    #[serde(default)]
    pub config_folder: Option<String>,
}

/// How one lineage's versions map onto the common lineage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "rule", content = "table")]
pub enum MappingRule {
    /// Official lineages already version on the common scheme.
    Identity,
    /// Piecewise table with "nearest version not greater than" fallback.
    Table(Vec<ForkMapRow>),
}

/// Serialized form of the mapping table file (`fork-versions.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkMapFile {
    #[serde(default)]
    rules: BTreeMap<Lineage, MappingRule>,
}

/// Maps fork-native versions onto the common version lineage.
///
/// Resolution is pure and deterministic, and never fails fatally: an
/// unmatched fork version yields [`ResolvedVersion::Unresolved`], logged
/// once per resolver instance and not retried.
pub struct VersionResolver {
    rules: BTreeMap<Lineage, MappingRule>,
    /// Fork versions already reported as unresolved this session.
    warned: Mutex<HashSet<(Lineage, BuildVersion)>>,
}

impl VersionResolver {
    /// Resolver with the compiled-in mapping table.
    pub fn builtin() -> Self {
        let upbge_table = vec![
            ForkMapRow {
                fork: BuildVersion::new(0, 30, 0),
                common: BuildVersion::new(3, 0, 0),
                config_folder: Some("3.0".into()),
            },
            ForkMapRow {
                fork: BuildVersion::new(0, 36, 0),
                common: BuildVersion::new(3, 6, 0),
                config_folder: Some("3.6".into()),
            },
            ForkMapRow {
                fork: BuildVersion::new(0, 40, 0),
                common: BuildVersion::new(4, 0, 0),
                config_folder: Some("4.0".into()),
            },
            ForkMapRow {
                fork: BuildVersion::new(0, 45, 0),
                common: BuildVersion::new(4, 5, 0),
                config_folder: Some("4.5".into()),
            },
        ];

        let mut rules: BTreeMap<Lineage, MappingRule> = BTreeMap::new();
        for lineage in Lineage::ALL {
            rules.insert(lineage, MappingRule::Identity);
        }
        rules.insert(Lineage::UpbgeStable, MappingRule::Table(upbge_table.clone()));
        rules.insert(Lineage::UpbgeWeekly, MappingRule::Table(upbge_table));

        Self::from_rules(rules)
    }

    /// Resolver from an explicit rule set. Tables are sorted by fork
    /// version so the nearest-not-greater lookup can scan in order.
    pub fn from_rules(mut rules: BTreeMap<Lineage, MappingRule>) -> Self {
        for rule in rules.values_mut() {
            if let MappingRule::Table(rows) = rule {
                rows.sort_by_key(|r| r.fork);
            }
        }
        Self {
            rules,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Load the mapping table from `fork-versions.json`, falling back to the
    /// compiled-in table when the file is absent. The file only needs to
    /// list fork lineages; everything else defaults to identity.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        match atomic_read_json::<ForkMapFile>(path)? {
            Some(file) => {
                debug!("Loaded fork mapping table from {}", path.display());
                let mut rules = Self::builtin().rules;
                rules.extend(file.rules);
                Ok(Self::from_rules(rules))
            }
            None => Ok(Self::builtin()),
        }
    }

    /// Resolve a build's version onto the common lineage.
    pub fn resolve(&self, identity: &BuildIdentity) -> ResolvedVersion {
        self.resolve_version(identity.lineage, identity.version)
    }

    pub fn resolve_version(&self, lineage: Lineage, version: BuildVersion) -> ResolvedVersion {
        match self.rules.get(&lineage) {
            None | Some(MappingRule::Identity) => ResolvedVersion::Resolved(version),
            Some(MappingRule::Table(rows)) => match nearest_not_greater(rows, version) {
                Some(row) => ResolvedVersion::Resolved(row.common),
                None => {
                    self.warn_once(lineage, version);
                    ResolvedVersion::Unresolved
                }
            },
        }
    }

    /// Configuration folder for a fork version, when the table knows one.
    pub fn config_folder(&self, lineage: Lineage, version: BuildVersion) -> Option<String> {
        match self.rules.get(&lineage) {
            Some(MappingRule::Table(rows)) => {
                nearest_not_greater(rows, version).and_then(|row| row.config_folder.clone())
            }
            _ => None,
        }
    }

    /// Read-only view of the rule table for the settings layer.
    pub fn rules(&self) -> &BTreeMap<Lineage, MappingRule> {
        &self.rules
    }

    fn warn_once(&self, lineage: Lineage, version: BuildVersion) {
        let mut warned = self.warned.lock().expect("resolver warn set poisoned");
        if warned.insert((lineage, version)) {
            warn!("No version mapping for {lineage} {version}, leaving unresolved");
        }
    }
}

/// The table row with the largest fork version not greater than `version`.
fn nearest_not_greater(rows: &[ForkMapRow], version: BuildVersion) -> Option<&ForkMapRow> {
    rows.iter().rev().find(|row| row.fork <= version)
}
