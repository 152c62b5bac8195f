//! Lineage-specific structural fixups applied to the staging tree after
//! extraction, before finalization.
//!
//! Fork archives do not always unpack into the layout the library expects:
//! UPBGE weeklies bury everything under `bin/Release`, UPBGE stable
//! archives sometimes wrap the build in a second folder named like the
//! archive. Each fixup rewrites the staging tree in place and is testable
//! against synthetic trees, no archives involved.

use blendvault_core::{Lineage, Result, VaultError};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Structural adjustment applied for a lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFixup {
    /// The archive layout already matches the library layout.
    None,
    /// Flatten `bin/Release` and unwrap single nested folders (UPBGE).
    UpbgeLayout,
}

/// Fixup variant for a lineage.
pub fn fixup_for(lineage: Lineage) -> StructureFixup {
    match lineage {
        Lineage::UpbgeStable | Lineage::UpbgeWeekly => StructureFixup::UpbgeLayout,
        _ => StructureFixup::None,
    }
}

/// Apply the lineage's fixup to an extracted build at `build_root`.
pub fn apply(lineage: Lineage, build_root: &Path) -> Result<()> {
    match fixup_for(lineage) {
        StructureFixup::None => Ok(()),
        StructureFixup::UpbgeLayout => fix_upbge_layout(build_root),
    }
}

fn fixup_err(message: String) -> VaultError {
    VaultError::StructureFixupFailed { message }
}

/// UPBGE ships its executable under the blender name.
fn has_build_executable(dir: &Path) -> bool {
    dir.join("blender").is_file() || dir.join("blender.exe").is_file()
}

fn fix_upbge_layout(build_root: &Path) -> Result<()> {
    // Weekly builds: everything lives under bin/Release; hoist it up.
    let bin_release = build_root.join("bin").join("Release");
    if bin_release.is_dir() {
        info!("Flattening bin/Release layout in {}", build_root.display());
        for item in fs::read_dir(&bin_release)
            .map_err(|e| fixup_err(format!("reading {}: {e}", bin_release.display())))?
        {
            let item = item.map_err(|e| fixup_err(e.to_string()))?;
            let dest = build_root.join(item.file_name());
            if dest.exists() {
                if dest.is_dir() {
                    fs::remove_dir_all(&dest)
                } else {
                    fs::remove_file(&dest)
                }
                .map_err(|e| fixup_err(format!("clearing {}: {e}", dest.display())))?;
            }
            fs::rename(item.path(), &dest)
                .map_err(|e| fixup_err(format!("moving {}: {e}", item.path().display())))?;
            debug!("Moved {} to build root", item.file_name().to_string_lossy());
        }
        fs::remove_dir_all(build_root.join("bin"))
            .map_err(|e| fixup_err(format!("removing bin folder: {e}")))?;
        return Ok(());
    }

    // Stable builds: a single nested folder carrying the executable gets
    // unwrapped into the build root.
    if has_build_executable(build_root) {
        return Ok(());
    }
    let subdirs: Vec<_> = fs::read_dir(build_root)
        .map_err(|e| fixup_err(format!("reading {}: {e}", build_root.display())))?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();

    if subdirs.len() == 1 && has_build_executable(&subdirs[0].path()) {
        let nested = subdirs[0].path();
        info!(
            "Unwrapping nested folder {} in {}",
            nested.display(),
            build_root.display()
        );
        for item in fs::read_dir(&nested).map_err(|e| fixup_err(e.to_string()))? {
            let item = item.map_err(|e| fixup_err(e.to_string()))?;
            let dest = build_root.join(item.file_name());
            fs::rename(item.path(), &dest)
                .map_err(|e| fixup_err(format!("moving {}: {e}", item.path().display())))?;
        }
        fs::remove_dir(&nested)
            .map_err(|e| fixup_err(format!("removing {}: {e}", nested.display())))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn touch(path: PathBuf) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_official_lineages_are_noop() {
        assert_eq!(fixup_for(Lineage::Stable), StructureFixup::None);
        assert_eq!(fixup_for(Lineage::Daily), StructureFixup::None);
        assert_eq!(fixup_for(Lineage::Bforartists), StructureFixup::None);
        assert_eq!(fixup_for(Lineage::UpbgeWeekly), StructureFixup::UpbgeLayout);
    }

    #[test]
    fn test_bin_release_is_flattened() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("upbge-0.45.0");
        touch(root.join("bin/Release/blender"));
        touch(root.join("bin/Release/lib/libfoo.so"));

        apply(Lineage::UpbgeWeekly, &root).unwrap();

        assert!(root.join("blender").is_file());
        assert!(root.join("lib/libfoo.so").is_file());
        assert!(!root.join("bin").exists());
    }

    #[test]
    fn test_flatten_replaces_colliding_entries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("upbge-0.45.0");
        touch(root.join("bin/Release/blender"));
        // A stale file already sits where the payload lands.
        touch(root.join("blender"));

        apply(Lineage::UpbgeWeekly, &root).unwrap();
        assert!(root.join("blender").is_file());
        assert!(!root.join("bin").exists());
    }

    #[test]
    fn test_nested_folder_is_unwrapped() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("upbge-0.36.1");
        touch(root.join("upbge-0.36.1-windows/blender.exe"));
        touch(root.join("upbge-0.36.1-windows/datafiles/startup.blend"));

        apply(Lineage::UpbgeStable, &root).unwrap();

        assert!(root.join("blender.exe").is_file());
        assert!(root.join("datafiles/startup.blend").is_file());
        assert!(!root.join("upbge-0.36.1-windows").exists());
    }

    #[test]
    fn test_already_flat_build_is_untouched() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("upbge-0.36.1");
        touch(root.join("blender"));
        touch(root.join("datafiles/startup.blend"));

        apply(Lineage::UpbgeStable, &root).unwrap();

        assert!(root.join("blender").is_file());
        assert!(root.join("datafiles/startup.blend").is_file());
    }

    #[test]
    fn test_noop_for_stable_leaves_tree_alone() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("blender-4.2.0");
        touch(root.join("some/nested/file"));

        apply(Lineage::Stable, &root).unwrap();
        assert!(root.join("some/nested/file").is_file());
    }
}
