//! Running-instance observation for installed builds.
//!
//! Counts live processes whose executable lives under a library entry's
//! directory. Observation only: counts are attached to fresh snapshots and
//! never persisted.

use crate::models::LibraryEntry;
use std::path::Path;
use sysinfo::System;

/// Annotate entries with the number of currently running processes started
/// from each entry's directory.
pub fn annotate_running_instances(entries: &mut [LibraryEntry]) {
    if entries.is_empty() {
        return;
    }
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);
    annotate_with_exe_paths(
        entries,
        system
            .processes()
            .values()
            .filter_map(|p| p.exe().map(Path::to_path_buf)),
    );
}

fn annotate_with_exe_paths(
    entries: &mut [LibraryEntry],
    exe_paths: impl Iterator<Item = std::path::PathBuf>,
) {
    let exe_paths: Vec<std::path::PathBuf> = exe_paths.collect();
    for entry in entries.iter_mut() {
        entry.running_instances = exe_paths
            .iter()
            .filter(|exe| exe.starts_with(&entry.path))
            .count() as u32;
    }
}
