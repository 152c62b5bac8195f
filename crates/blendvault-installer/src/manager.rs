//! Install manager: owns the task registry, the bounded install pool, and
//! path-level mutual exclusion over the library.

use crate::pipeline::{target_dir_name, TaskContext};
use blendvault_core::models::{PipelineStage, TaskSnapshot, TaskState};
use blendvault_core::network::ArchiveDownloader;
use blendvault_core::{
    BuildIdentity, CancelToken, EngineConfig, EngineEvent, EventBus, HttpClient, LibraryEntry,
    LibraryScanner, Lineage, Result, VaultError,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

struct TaskHandle {
    snapshot: Arc<Mutex<TaskSnapshot>>,
    cancel: CancelToken,
}

/// Drives install/update tasks against the library.
///
/// The install pool is sized independently of the discovery pool, so a
/// burst of discovery requests cannot starve ongoing installs or vice
/// versa. Exactly one active task may target a given final library path;
/// a second is rejected with `PathContention`, never queued silently.
pub struct InstallManager {
    config: EngineConfig,
    http: Arc<HttpClient>,
    events: EventBus,
    scanner: Option<Arc<LibraryScanner>>,
    semaphore: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<Uuid, TaskHandle>>>,
    path_locks: Arc<Mutex<HashSet<PathBuf>>>,
}

impl InstallManager {
    pub fn new(config: EngineConfig, http: Arc<HttpClient>, events: EventBus) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.install_workers.max(1)));
        Self {
            config,
            http,
            events,
            scanner: None,
            semaphore,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            path_locks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Attach a scanner so completed tasks trigger a targeted re-scan of
    /// the affected lineage subtree.
    pub fn with_scanner(mut self, scanner: Arc<LibraryScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Final library path a build installs into.
    pub fn target_path_for(&self, identity: &BuildIdentity) -> PathBuf {
        self.config
            .library_root
            .join(identity.lineage.dir_name())
            .join(target_dir_name(identity))
    }

    /// Queue an install task for a build. Returns the task id immediately;
    /// progress and state transitions arrive as `TaskChanged` events and
    /// through [`InstallManager::task`].
    pub fn install(&self, identity: BuildIdentity) -> Result<Uuid> {
        self.install_inner(identity, None)
    }

    /// Queue an install that, on success, removes the superseded entry
    /// (the replace-in-place update strategy).
    pub fn install_replacing(
        &self,
        identity: BuildIdentity,
        superseded: PathBuf,
    ) -> Result<Uuid> {
        self.install_inner(identity, Some(superseded))
    }

    fn install_inner(&self, identity: BuildIdentity, replace: Option<PathBuf>) -> Result<Uuid> {
        let target_path = self.target_path_for(&identity);

        // Path-level mutual exclusion: claim every path this task will
        // touch before any work starts.
        {
            let mut locks = self.path_locks.lock().expect("path lock set poisoned");
            if locks.contains(&target_path) {
                return Err(VaultError::PathContention(target_path));
            }
            if let Some(ref superseded) = replace {
                if locks.contains(superseded) {
                    return Err(VaultError::PathContention(superseded.clone()));
                }
                locks.insert(superseded.clone());
            }
            locks.insert(target_path.clone());
        }

        let id = Uuid::new_v4();
        let snapshot = Arc::new(Mutex::new(TaskSnapshot::new(
            id,
            identity.clone(),
            target_path.clone(),
        )));
        let cancel = CancelToken::new();
        self.tasks.lock().expect("task registry poisoned").insert(
            id,
            TaskHandle {
                snapshot: snapshot.clone(),
                cancel: cancel.clone(),
            },
        );

        let context = TaskContext {
            identity: identity.clone(),
            target_path: target_path.clone(),
            staging_root: self.config.staging_dir(),
            snapshot,
            cancel,
            events: self.events.clone(),
            downloader: ArchiveDownloader::new(self.http.clone()),
        };
        let semaphore = self.semaphore.clone();
        let path_locks = self.path_locks.clone();
        let scanner = self.scanner.clone();
        let events = self.events.clone();
        let lineage = identity.lineage;

        tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("install semaphore closed");

            let outcome = if context.cancel.is_cancelled() {
                Err((PipelineStage::Download, VaultError::DownloadCancelled))
            } else {
                context.run().await
            };

            let installed = outcome.is_ok();
            match outcome {
                Ok(()) => {
                    if let Some(ref superseded) = replace {
                        remove_superseded(superseded, scanner.as_deref());
                    }
                }
                Err((_, VaultError::DownloadCancelled)) => {
                    context.set_state(TaskState::Cancelled);
                }
                Err((stage, e)) => {
                    warn!("Install task failed at {stage:?}: {e}");
                    context.set_state(TaskState::Failed {
                        stage,
                        reason: e.to_string(),
                    });
                }
            }

            // Release the path claims whatever happened.
            {
                let mut locks = path_locks.lock().expect("path lock set poisoned");
                locks.remove(&context.target_path);
                if let Some(ref superseded) = replace {
                    locks.remove(superseded);
                }
            }

            if installed {
                if let Some(ref scanner) = scanner {
                    scanner.invalidate(&context.target_path);
                    if let Err(e) = scanner.scan_lineage(lineage) {
                        warn!("Post-install re-scan failed: {e}");
                    }
                }
                events.emit(EngineEvent::LibraryChanged {
                    lineage: Some(lineage),
                });
            }
        });

        Ok(id)
    }

    /// Snapshots of every known task.
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .values()
            .map(|h| h.snapshot.lock().expect("task snapshot poisoned").clone())
            .collect()
    }

    pub fn task(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .get(&id)
            .map(|h| h.snapshot.lock().expect("task snapshot poisoned").clone())
    }

    /// Request cancellation of a task. Returns false when the task is
    /// unknown or already past the point of no return.
    pub fn cancel(&self, id: Uuid) -> bool {
        let tasks = self.tasks.lock().expect("task registry poisoned");
        match tasks.get(&id) {
            Some(handle) => {
                let cancellable = handle
                    .snapshot
                    .lock()
                    .expect("task snapshot poisoned")
                    .state
                    .is_cancellable();
                if cancellable {
                    info!("Cancelling task {id}");
                    handle.cancel.cancel();
                }
                cancellable
            }
            None => false,
        }
    }

    /// Drop finished tasks from the registry.
    pub fn prune_terminal(&self) {
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .retain(|_, h| {
                !h.snapshot
                    .lock()
                    .expect("task snapshot poisoned")
                    .state
                    .is_terminal()
            });
    }

    /// Remove an installed build from the library.
    ///
    /// Refuses while an install task holds the entry's path, and while the
    /// build has running instances.
    pub fn uninstall(&self, entry: &LibraryEntry) -> Result<()> {
        if entry.running_instances > 0 {
            return Err(VaultError::Other(format!(
                "{} has {} running instance(s)",
                entry.path.display(),
                entry.running_instances
            )));
        }
        let _claim = self.claim_path(&entry.path)?;

        if !entry.path.exists() {
            return Err(VaultError::EntryNotFound(entry.path.clone()));
        }
        std::fs::remove_dir_all(&entry.path)
            .map_err(|e| VaultError::io_with_path(e, &entry.path))?;

        if let Some(ref scanner) = self.scanner {
            scanner.invalidate(&entry.path);
        }
        info!("Removed installed build {}", entry.path.display());
        self.events.emit(EngineEvent::LibraryChanged {
            lineage: Some(entry.lineage()),
        });
        Ok(())
    }

    /// Rename a custom build's directory. The new name is slugged the same
    /// way archives are: lowercased, spaces to dashes.
    pub fn rename_custom(&self, entry: &LibraryEntry, new_name: &str) -> Result<PathBuf> {
        let slug = slugify(new_name);
        if slug.is_empty() {
            return Err(VaultError::Config {
                message: format!("Unusable build name: {new_name:?}"),
            });
        }
        let parent = entry.path.parent().ok_or_else(|| {
            VaultError::EntryNotFound(entry.path.clone())
        })?;
        let destination = parent.join(&slug);
        if destination.exists() {
            return Err(VaultError::PathContention(destination));
        }

        let _claim = self.claim_path(&entry.path)?;
        std::fs::rename(&entry.path, &destination)
            .map_err(|e| VaultError::io_with_path(e, &entry.path))?;

        if let Some(ref scanner) = self.scanner {
            scanner.invalidate(&entry.path);
            scanner.invalidate(&destination);
        }
        self.events.emit(EngineEvent::LibraryChanged {
            lineage: Some(entry.lineage()),
        });
        Ok(destination)
    }

    /// Claim a path for the duration of a maintenance operation.
    fn claim_path(&self, path: &Path) -> Result<PathClaim<'_>> {
        let mut locks = self.path_locks.lock().expect("path lock set poisoned");
        if !locks.insert(path.to_path_buf()) {
            return Err(VaultError::PathContention(path.to_path_buf()));
        }
        Ok(PathClaim {
            locks: &self.path_locks,
            path: path.to_path_buf(),
        })
    }
}

/// RAII claim over a library path.
struct PathClaim<'a> {
    locks: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for PathClaim<'_> {
    fn drop(&mut self) {
        self.locks
            .lock()
            .expect("path lock set poisoned")
            .remove(&self.path);
    }
}

fn remove_superseded(path: &Path, scanner: Option<&LibraryScanner>) {
    if !path.exists() {
        return;
    }
    info!("Removing superseded build {}", path.display());
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("Failed to remove superseded build {}: {e}", path.display());
        return;
    }
    if let Some(scanner) = scanner {
        scanner.invalidate(path);
    }
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use blendvault_core::models::ResolvedVersion;
    use blendvault_core::BuildVersion;
    use tempfile::TempDir;

    fn manager(root: &Path) -> InstallManager {
        let config = EngineConfig::with_library_root(root);
        let http = Arc::new(HttpClient::from_config(&config).unwrap());
        InstallManager::new(config, http, EventBus::new())
    }

    fn identity(url: &str, lineage: Lineage) -> BuildIdentity {
        BuildIdentity::new(BuildVersion::new(4, 2, 0), lineage, url)
    }

    fn entry_at(path: PathBuf, lineage: Lineage) -> LibraryEntry {
        LibraryEntry {
            identity: BuildIdentity::new(
                BuildVersion::new(4, 2, 0),
                lineage,
                path.to_string_lossy().into_owned(),
            ),
            resolved: ResolvedVersion::Resolved(BuildVersion::new(4, 2, 0)),
            running_instances: 0,
            is_favorite: false,
            is_custom: lineage == Lineage::Custom,
            custom_name: None,
            path,
        }
    }

    #[test]
    fn test_target_path_groups_by_lineage() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let target = manager.target_path_for(&identity(
            "https://dl/blender-4.2.0-linux-x64.tar.gz",
            Lineage::Daily,
        ));
        assert_eq!(
            target,
            dir.path().join("daily").join("blender-4.2.0-linux-x64")
        );
    }

    #[tokio::test]
    async fn test_second_task_to_same_path_is_rejected() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        // An unsupported archive: the task fails without touching the
        // network, but only after the path claim is taken synchronously.
        let build = identity("http://127.0.0.1:1/blender-4.2.0-linux-x64.7z", Lineage::Daily);

        let first = manager.install(build.clone());
        assert!(first.is_ok());

        let second = manager.install(build.clone());
        assert!(matches!(second, Err(VaultError::PathContention(_))));
    }

    #[tokio::test]
    async fn test_path_released_after_task_fails() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let build = identity("http://127.0.0.1:1/blender-4.2.0-linux-x64.7z", Lineage::Daily);

        let id = manager.install(build.clone()).unwrap();

        // Wait for the task to reach a terminal state.
        for _ in 0..200 {
            if manager.task(id).map(|t| t.state.is_terminal()).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        let snapshot = manager.task(id).unwrap();
        assert!(
            matches!(snapshot.state, TaskState::Failed { stage: PipelineStage::Download, .. }),
            "unexpected state: {:?}",
            snapshot.state
        );

        // The claim is gone, a new task may target the same path.
        assert!(manager.install(build).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_before_start_ends_cancelled() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::with_library_root(dir.path());
        let http = Arc::new(HttpClient::from_config(&config).unwrap());
        // A single worker, occupied by a slow task, keeps the second task
        // queued long enough to cancel it first.
        let mut config = config;
        config.install_workers = 1;
        let manager = InstallManager::new(config, http, EventBus::new());

        let blocker = manager
            .install(identity("http://127.0.0.1:1/a.7z", Lineage::Daily))
            .unwrap();
        let queued = manager
            .install(identity("http://127.0.0.1:1/b.7z", Lineage::Daily))
            .unwrap();
        assert!(manager.cancel(queued));

        for _ in 0..200 {
            let done = manager
                .task(queued)
                .map(|t| t.state.is_terminal())
                .unwrap_or(false);
            if done {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        assert_eq!(manager.task(queued).unwrap().state, TaskState::Cancelled);
        let _ = blocker;
    }

    #[test]
    fn test_uninstall_removes_entry_dir() {
        let dir = TempDir::new().unwrap();
        let build_dir = dir.path().join("daily/blender-4.2.0");
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::write(build_dir.join("blender"), b"bin").unwrap();

        let manager = manager(dir.path());
        manager
            .uninstall(&entry_at(build_dir.clone(), Lineage::Daily))
            .unwrap();
        assert!(!build_dir.exists());
    }

    #[test]
    fn test_uninstall_refuses_running_build() {
        let dir = TempDir::new().unwrap();
        let build_dir = dir.path().join("daily/blender-4.2.0");
        std::fs::create_dir_all(&build_dir).unwrap();

        let manager = manager(dir.path());
        let mut entry = entry_at(build_dir.clone(), Lineage::Daily);
        entry.running_instances = 1;
        assert!(manager.uninstall(&entry).is_err());
        assert!(build_dir.exists());
    }

    #[test]
    fn test_uninstall_missing_entry_errors() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let result = manager.uninstall(&entry_at(dir.path().join("daily/gone"), Lineage::Daily));
        assert!(matches!(result, Err(VaultError::EntryNotFound(_))));
    }

    #[test]
    fn test_rename_custom_slugs_name() {
        let dir = TempDir::new().unwrap();
        let build_dir = dir.path().join("custom/old-name");
        std::fs::create_dir_all(&build_dir).unwrap();

        let manager = manager(dir.path());
        let renamed = manager
            .rename_custom(&entry_at(build_dir, Lineage::Custom), "My Studio Build")
            .unwrap();
        assert_eq!(renamed, dir.path().join("custom/my-studio-build"));
        assert!(renamed.is_dir());
    }

    #[test]
    fn test_rename_refuses_existing_destination() {
        let dir = TempDir::new().unwrap();
        let build_dir = dir.path().join("custom/old-name");
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::create_dir_all(dir.path().join("custom/taken")).unwrap();

        let manager = manager(dir.path());
        let result = manager.rename_custom(&entry_at(build_dir, Lineage::Custom), "taken");
        assert!(matches!(result, Err(VaultError::PathContention(_))));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Studio Build"), "my-studio-build");
        assert_eq!(slugify("  Build 4.2  "), "build-4.2");
        assert_eq!(slugify("weird/#name!"), "weirdname");
    }
}
