//! Library scanner: discovers installed builds on disk.
//!
//! One-level walk of each per-lineage subdirectory under the library root.
//! A directory counts as an installed build when it carries the sidecar
//! marker or a recognized executable; everything else is scaffolding. The
//! scan never mutates the library tree, is idempotent, and produces a fresh
//! snapshot every pass; the mtime-keyed scan cache is the only state that
//! carries across passes.

use crate::config::{EngineConfig, Lineage};
use crate::metadata::{read_sidecar, BuildSidecar, ScanCache};
use crate::models::{parse_loose_version, BuildIdentity, BuildVersion, LibraryEntry};
use crate::platform::{self, Platform};
use crate::resolver::VersionResolver;
use crate::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use walkdir::WalkDir;

fn dir_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-f]{12}\b").expect("static hash matcher"))
}

/// Scans the library root for installed builds.
pub struct LibraryScanner {
    root: PathBuf,
    resolver: Arc<VersionResolver>,
    platform: Platform,
    cache: Mutex<ScanCache>,
}

impl LibraryScanner {
    pub fn new(config: &EngineConfig, resolver: Arc<VersionResolver>) -> Self {
        Self {
            root: config.library_root.clone(),
            resolver,
            platform: Platform::current(),
            cache: Mutex::new(ScanCache::load(config.scan_cache_path())),
        }
    }

    /// Scan every lineage subdirectory. Entries come back sorted by path so
    /// two scans over an unchanged tree compare equal.
    pub fn scan(&self) -> Result<Vec<LibraryEntry>> {
        let mut entries = Vec::new();
        for (dir_name, lineage) in lineage_dirs() {
            self.scan_dir(&self.root.join(dir_name), lineage, &mut entries)?;
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        self.persist_cache();
        Ok(entries)
    }

    /// Targeted re-scan of one lineage subtree, e.g. after an install.
    pub fn scan_lineage(&self, lineage: Lineage) -> Result<Vec<LibraryEntry>> {
        let mut entries = Vec::new();
        self.scan_dir(&self.root.join(lineage.dir_name()), lineage, &mut entries)?;
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        self.persist_cache();
        Ok(entries)
    }

    /// Drop any cached identity for a directory, forcing re-derivation on
    /// the next pass. Used when an entry is removed or replaced.
    pub fn invalidate(&self, dir: &Path) {
        self.cache
            .lock()
            .expect("scan cache lock poisoned")
            .invalidate(dir);
    }

    fn scan_dir(
        &self,
        dir: &Path,
        lineage: Lineage,
        entries: &mut Vec<LibraryEntry>,
    ) -> Result<()> {
        if !dir.is_dir() {
            return Ok(());
        }

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let build_dir = entry.path();
            match self.read_entry(build_dir, lineage) {
                Some(library_entry) => entries.push(library_entry),
                None => debug!("Skipping unrecognized directory {}", build_dir.display()),
            }
        }
        Ok(())
    }

    fn read_entry(&self, build_dir: &Path, dir_lineage: Lineage) -> Option<LibraryEntry> {
        let has_sidecar = build_dir
            .join(crate::config::PathsConfig::SIDECAR_FILENAME)
            .is_file();
        let has_executable =
            platform::has_recognized_executable(build_dir, dir_lineage, self.platform);
        if !has_sidecar && !has_executable {
            return None;
        }

        let mtime = dir_mtime_secs(build_dir);
        let sidecar = self.identity_sidecar(build_dir, dir_lineage, mtime);

        let identity = sidecar.to_identity(build_dir);
        let resolved = self.resolver.resolve(&identity);
        Some(LibraryEntry {
            path: build_dir.to_path_buf(),
            is_custom: identity.lineage == Lineage::Custom,
            resolved,
            running_instances: 0,
            is_favorite: sidecar.is_favorite,
            custom_name: sidecar.custom_name.clone(),
            identity,
        })
    }

    /// Identity for a build directory, cheapest source first: the scan
    /// cache while the mtime is unchanged, then the sidecar marker, then
    /// directory-name heuristics.
    fn identity_sidecar(&self, build_dir: &Path, dir_lineage: Lineage, mtime: u64) -> BuildSidecar {
        {
            let cache = self.cache.lock().expect("scan cache lock poisoned");
            if let Some(cached) = cache.lookup(build_dir, mtime) {
                return cached.clone();
            }
        }

        let sidecar = match read_sidecar(build_dir) {
            Some(sidecar) => sidecar,
            None => self.derive_sidecar(build_dir, dir_lineage),
        };

        self.cache
            .lock()
            .expect("scan cache lock poisoned")
            .record(build_dir, mtime, sidecar.clone());
        sidecar
    }

    /// Heuristic identity for a directory with no sidecar: version and hash
    /// from the directory name, commit time from the mtime. The sidecar is
    /// only recorded in the scan cache, never written into the library.
    fn derive_sidecar(&self, build_dir: &Path, dir_lineage: Lineage) -> BuildSidecar {
        let name = build_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let version = parse_loose_version(&name).unwrap_or_else(|_| {
            warn!(
                "No version derivable from {}, recording 0.0.0",
                build_dir.display()
            );
            BuildVersion::default()
        });
        let content_hash = dir_hash_re()
            .find_iter(&name)
            .last()
            .map(|m| m.as_str().to_string());
        let commit_time: Option<DateTime<Utc>> = build_dir
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| DateTime::<Utc>::from_timestamp(d.as_secs() as i64, 0));

        let mut identity = BuildIdentity::new(
            version,
            dir_lineage,
            build_dir.to_string_lossy().into_owned(),
        );
        identity.content_hash = content_hash;
        identity.commit_time = commit_time;
        BuildSidecar::from_identity(&identity)
    }

    fn persist_cache(&self) {
        if let Err(e) = self.cache.lock().expect("scan cache lock poisoned").save() {
            warn!("Failed to persist scan cache: {e}");
        }
    }
}

/// Lineage subdirectories to walk, deduplicated (stable and LTS share one).
fn lineage_dirs() -> Vec<(&'static str, Lineage)> {
    let mut dirs = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for lineage in Lineage::ALL {
        if seen.insert(lineage.dir_name()) {
            dirs.push((lineage.dir_name(), lineage));
        }
    }
    dirs
}

fn dir_mtime_secs(dir: &Path) -> u64 {
    dir.metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
