//! Metadata persistence: atomic JSON helpers, the per-build sidecar marker,
//! and the scan metadata cache.

mod atomic;
mod scan_cache;
mod sidecar;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use scan_cache::{CachedEntry, ScanCache};
pub use sidecar::{read_sidecar, write_sidecar, BuildSidecar, SIDECAR_FILE_VERSION};
