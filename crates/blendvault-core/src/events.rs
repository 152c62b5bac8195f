//! Presentation-facing event contract.
//!
//! The GUI layer consumes catalog updates, library changes, and task state
//! transitions through snapshot-returning queries plus this subscribe/notify
//! channel. No shared mutable state crosses the boundary.

use crate::config::Lineage;
use crate::models::TaskSnapshot;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Events emitted by the engine for presentation-layer consumption.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A discovery pass completed and the catalog snapshot was replaced.
    CatalogUpdated {
        fetched_at: Option<DateTime<Utc>>,
        build_count: usize,
        degraded: bool,
    },
    /// The installed-build set changed under one lineage subtree (or
    /// anywhere, when `lineage` is `None`).
    LibraryChanged { lineage: Option<Lineage> },
    /// An install task changed state or made progress.
    TaskChanged(TaskSnapshot),
}

/// Broadcast bus behind every `EngineEvent`.
///
/// Slow subscribers lag rather than block the engine; a lagged receiver
/// resynchronizes from the snapshot queries.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. Sends to no one are fine: the engine runs headless.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
