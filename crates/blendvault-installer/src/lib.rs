//! blendvault installer - the download/verify/extract pipeline and update
//! decision engine for blendvault build libraries.
//!
//! This crate drives everything that mutates the on-disk library:
//! - per-build install tasks running the
//!   `Queued → Downloading → Verifying → Extracting → FixingStructure →
//!   Installed` state machine, with cooperative cancellation and
//!   stage-tagged failures
//! - lineage-specific structural fixups applied between extraction and
//!   finalization
//! - path-level mutual exclusion so two tasks never write the same final
//!   library path
//! - the pure update decision engine comparing installed entries against
//!   the catalog
//! - uninstall and rename maintenance operations
//!
//! Discovery, the catalog, and the library scanner live in
//! `blendvault-core`.
//!
//! # Example
//!
//! ```rust,ignore
//! use blendvault_core::{EngineConfig, VaultEngine};
//! use blendvault_installer::{check_updates, InstallManager};
//!
//! # async fn run() -> blendvault_core::Result<()> {
//! let engine = VaultEngine::new(EngineConfig::with_library_root("/data/builds"))?;
//! let manager = InstallManager::new(
//!     engine.config().clone(),
//!     engine.http(),
//!     engine.events(),
//! )
//! .with_scanner(engine.scanner());
//!
//! let entries = engine.scan_library()?;
//! for advice in check_updates(&entries, &engine.catalog(), engine.config()) {
//!     manager.install(advice.candidate)?;
//! }
//! # Ok(())
//! # }
//! ```

mod fixup;
mod manager;
mod pipeline;
mod update;

pub use fixup::{apply as apply_fixup, fixup_for, StructureFixup};
pub use manager::InstallManager;
pub use update::{check_entry, check_updates, UpdateAdvice};
