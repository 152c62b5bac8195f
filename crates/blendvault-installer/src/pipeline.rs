//! The per-task install pipeline: download, verify, extract, fix
//! structure, finalize.
//!
//! Each stage checks the cancel token before starting; failures are tagged
//! with the stage they happened in and never affect other tasks.

use crate::fixup;
use blendvault_core::metadata::{write_sidecar, BuildSidecar};
use blendvault_core::models::{PipelineStage, TaskSnapshot, TaskState};
use blendvault_core::network::{ArchiveDownloader, DownloadProgress};
use blendvault_core::platform::{archive_stem, file_name_from_url};
use blendvault_core::{
    BuildIdentity, CancelToken, EngineEvent, EventBus, Result, VaultError,
};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArchiveKind {
    Zip,
    TarGz,
    TarZst,
}

pub(crate) fn archive_kind(file_name: &str) -> Result<ArchiveKind> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".zip") {
        Ok(ArchiveKind::Zip)
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Ok(ArchiveKind::TarGz)
    } else if lower.ends_with(".tar.zst") {
        Ok(ArchiveKind::TarZst)
    } else {
        Err(VaultError::ExtractionFailed {
            message: format!("Unsupported archive format: {file_name}"),
        })
    }
}

/// Everything one pipeline run needs, owned for the lifetime of the task.
pub(crate) struct TaskContext {
    pub identity: BuildIdentity,
    pub target_path: PathBuf,
    pub staging_root: PathBuf,
    pub snapshot: Arc<Mutex<TaskSnapshot>>,
    pub cancel: CancelToken,
    pub events: EventBus,
    pub downloader: ArchiveDownloader,
}

impl TaskContext {
    /// Execute all stages. On error the failing stage is reported so the
    /// caller can tag the terminal state.
    pub(crate) async fn run(&self) -> std::result::Result<(), (PipelineStage, VaultError)> {
        let file_name = file_name_from_url(&self.identity.source_url);
        let kind = archive_kind(&file_name).map_err(|e| (PipelineStage::Download, e))?;
        let archive_path = self
            .staging_root
            .join(blendvault_core::PathsConfig::DOWNLOADS_DIR_NAME)
            .join(&file_name);
        let extract_dir = self
            .staging_root
            .join(format!("extract-{}", self.task_id()));

        let result = self
            .run_stages(kind, &file_name, &archive_path, &extract_dir)
            .await;

        // Whatever the outcome, a finished task leaves nothing in staging.
        let _ = fs::remove_dir_all(&extract_dir);
        let _ = fs::remove_file(&archive_path);
        result
    }

    async fn run_stages(
        &self,
        kind: ArchiveKind,
        file_name: &str,
        archive_path: &Path,
        extract_dir: &Path,
    ) -> std::result::Result<(), (PipelineStage, VaultError)> {
        let stage = |s: PipelineStage| move |e: VaultError| (s, e);

        // Download
        self.set_state(TaskState::Downloading);
        self.download(archive_path)
            .await
            .map_err(stage(PipelineStage::Download))?;
        self.cancel.check().map_err(stage(PipelineStage::Download))?;

        // Verify
        self.set_state(TaskState::Verifying);
        verify_archive(archive_path, kind, self.identity.archive_sha256.as_deref())
            .map_err(stage(PipelineStage::Verify))?;
        self.cancel.check().map_err(stage(PipelineStage::Verify))?;

        // Extract
        self.set_state(TaskState::Extracting);
        extract_archive(archive_path, kind, extract_dir)
            .map_err(stage(PipelineStage::Extract))?;
        let build_root =
            locate_build_root(extract_dir, file_name).map_err(stage(PipelineStage::Extract))?;
        self.cancel.check().map_err(stage(PipelineStage::Extract))?;

        // Fix structure
        self.set_state(TaskState::FixingStructure);
        fixup::apply(self.identity.lineage, &build_root)
            .map_err(stage(PipelineStage::FixStructure))?;
        self.cancel
            .check()
            .map_err(stage(PipelineStage::FixStructure))?;

        // Finalize: move into the library and write the sidecar. Past this
        // point cancellation is a no-op.
        finalize(&build_root, &self.target_path, &self.identity)
            .map_err(stage(PipelineStage::Finalize))?;

        self.set_state(TaskState::Installed);
        info!(
            "Installed {} at {}",
            self.identity.version_string(),
            self.target_path.display()
        );
        Ok(())
    }

    async fn download(&self, archive_path: &Path) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<DownloadProgress>(16);

        let snapshot = self.snapshot.clone();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                let snap = {
                    let mut guard = snapshot.lock().expect("task snapshot poisoned");
                    guard.progress_bytes = progress.bytes_downloaded;
                    guard.total_bytes = progress.total_bytes;
                    guard.clone()
                };
                events.emit(EngineEvent::TaskChanged(snap));
            }
        });

        let result = self
            .downloader
            .download_with_retry(
                &self.identity.source_url,
                archive_path,
                &self.cancel,
                Some(tx),
            )
            .await;
        let _ = forwarder.await;
        result.map(|_| ())
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        let snap = {
            let mut guard = self.snapshot.lock().expect("task snapshot poisoned");
            guard.state = state;
            guard.clone()
        };
        debug!("Task {} -> {:?}", snap.id, snap.state);
        self.events.emit(EngineEvent::TaskChanged(snap));
    }

    fn task_id(&self) -> uuid::Uuid {
        self.snapshot.lock().expect("task snapshot poisoned").id
    }
}

/// Confirm the archive is a complete, readable container, and matches the
/// published checksum when one exists.
pub(crate) fn verify_archive(
    path: &Path,
    kind: ArchiveKind,
    expected_sha256: Option<&str>,
) -> Result<()> {
    if let Some(expected) = expected_sha256 {
        let actual = file_sha256(path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(VaultError::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    let corrupt = |message: String| VaultError::CorruptArchive {
        path: path.to_path_buf(),
        message,
    };

    match kind {
        ArchiveKind::Zip => {
            let file = File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
            let mut archive =
                zip::ZipArchive::new(file).map_err(|e| corrupt(format!("not a zip: {e}")))?;
            if archive.len() == 0 {
                return Err(corrupt("zip archive contains no entries".into()));
            }
            for i in 0..archive.len() {
                archive
                    .by_index(i)
                    .map_err(|e| corrupt(format!("unreadable zip entry {i}: {e}")))?;
            }
        }
        ArchiveKind::TarGz | ArchiveKind::TarZst => {
            let mut archive = open_tar(path, kind)?;
            let mut entries = 0usize;
            for entry in archive
                .entries()
                .map_err(|e| corrupt(format!("unreadable tar: {e}")))?
            {
                entry.map_err(|e| corrupt(format!("unreadable tar entry: {e}")))?;
                entries += 1;
            }
            if entries == 0 {
                return Err(corrupt("tar archive contains no entries".into()));
            }
        }
    }

    Ok(())
}

fn open_tar(path: &Path, kind: ArchiveKind) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::TarGz => Box::new(flate2::read::GzDecoder::new(BufReader::new(file))),
        ArchiveKind::TarZst => Box::new(
            zstd::Decoder::new(BufReader::new(file))
                .map_err(|e| VaultError::io_with_path(e, path))?,
        ),
        ArchiveKind::Zip => unreachable!("zip is not a tar container"),
    };
    Ok(tar::Archive::new(reader))
}

fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| VaultError::io_with_path(e, path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Expand the archive into `dest_dir`.
pub(crate) fn extract_archive(path: &Path, kind: ArchiveKind, dest_dir: &Path) -> Result<()> {
    fs::create_dir_all(dest_dir).map_err(|e| VaultError::io_with_path(e, dest_dir))?;

    match kind {
        ArchiveKind::Zip => extract_zip(path, dest_dir),
        ArchiveKind::TarGz | ArchiveKind::TarZst => {
            let mut archive = open_tar(path, kind)?;
            archive.unpack(dest_dir).map_err(|e| VaultError::ExtractionFailed {
                message: format!("Failed to extract {}: {e}", path.display()),
            })
        }
    }
}

fn extract_zip(path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| VaultError::ExtractionFailed {
        message: format!("Invalid zip archive: {e}"),
    })?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| VaultError::ExtractionFailed {
                message: format!("Failed to read zip entry {i}: {e}"),
            })?;

        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let outpath = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| VaultError::io_with_path(e, &outpath))?;
        } else {
            if let Some(parent) = outpath.parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent)
                        .map_err(|e| VaultError::io_with_path(e, parent))?;
                }
            }
            let mut outfile =
                File::create(&outpath).map_err(|e| VaultError::io_with_path(e, &outpath))?;
            std::io::copy(&mut entry, &mut outfile)
                .map_err(|e| VaultError::io_with_path(e, &outpath))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = fs::set_permissions(&outpath, fs::Permissions::from_mode(mode));
            }
        }
    }

    Ok(())
}

/// The extracted build's root directory: the single wrapping folder when
/// the archive has one, otherwise the extraction directory itself.
pub(crate) fn locate_build_root(extract_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let entries: Vec<_> = fs::read_dir(extract_dir)
        .map_err(|e| VaultError::io_with_path(e, extract_dir))?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 && entries[0].path().is_dir() {
        return Ok(entries[0].path());
    }
    debug!(
        "Archive {} extracted flat ({} top-level entries)",
        file_name,
        entries.len()
    );
    Ok(extract_dir.to_path_buf())
}

/// Move the staged build into its final library path and write the sidecar
/// marker. Falls back to copy-then-delete when rename crosses filesystems;
/// the copy source is only removed after the destination is complete.
pub(crate) fn finalize(build_root: &Path, target_path: &Path, identity: &BuildIdentity) -> Result<()> {
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent).map_err(|e| VaultError::io_with_path(e, parent))?;
    }

    // Best-effort replace: an existing directory at the target is a
    // superseded or interrupted install.
    if target_path.exists() {
        info!("Replacing existing directory {}", target_path.display());
        fs::remove_dir_all(target_path).map_err(|e| VaultError::io_with_path(e, target_path))?;
    }

    if let Err(rename_err) = fs::rename(build_root, target_path) {
        debug!("Rename failed ({rename_err}), falling back to copy");
        copy_dir_recursive(build_root, target_path)?;
        if let Err(e) = fs::remove_dir_all(build_root) {
            warn!("Failed to remove staging source after copy: {e}");
        }
    }

    let mut identity = identity.clone();
    identity.source_url = target_path.to_string_lossy().into_owned();
    write_sidecar(target_path, &BuildSidecar::from_identity(&identity))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| VaultError::io_with_path(e, dst))?;
    for entry in fs::read_dir(src).map_err(|e| VaultError::io_with_path(e, src))? {
        let entry = entry.map_err(|e| VaultError::io_with_path(e, src))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .map_err(|e| VaultError::io_with_path(e, &src_path))?;
        }
    }
    Ok(())
}

/// Default install directory name for a build: the archive stem.
pub(crate) fn target_dir_name(identity: &BuildIdentity) -> String {
    let stem = archive_stem(&file_name_from_url(&identity.source_url));
    if stem.is_empty() {
        identity.version_string()
    } else {
        stem
    }
}
