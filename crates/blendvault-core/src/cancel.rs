//! Cooperative cancellation shared across async tasks.

use crate::{Result, VaultError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A clonable cancel signal checked at well-defined safe points (download
/// chunk boundaries, pre-extraction, pre-finalize).
///
/// Cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed by every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `DownloadCancelled` if cancellation was requested, for use
    /// with `?` at safe points.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(VaultError::DownloadCancelled)
        } else {
            Ok(())
        }
    }
}
