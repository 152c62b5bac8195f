//! Source adapters: one per remote distribution origin.
//!
//! Every adapter implements the same contract: given the shared connection
//! layer, produce a finite batch of build identities. Adapters are mutually
//! independent and individually fallible; an adapter error never affects
//! another adapter's results.

mod automated;
mod forks;
mod stable;

pub use automated::{AutomatedBranch, AutomatedSource};
pub use forks::{BforartistsSource, ReleaseFeed, UpbgeChannel, UpbgeSource};
pub use stable::StableSource;

use crate::config::Lineage;
use crate::models::BuildIdentity;
use crate::network::HttpClient;
use crate::Result;
use async_trait::async_trait;

/// Contract every remote origin implements.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// Stable identifier used in logs and per-source status flags.
    fn id(&self) -> &'static str;

    /// The lineage this adapter feeds.
    fn lineage(&self) -> Lineage;

    /// Fetch the currently available builds from this origin.
    ///
    /// Errors are source-scoped: the discovery coordinator records them as
    /// a degraded source and moves on.
    async fn scrape(&self, http: &HttpClient) -> Result<Vec<BuildIdentity>>;
}
