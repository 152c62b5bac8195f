//! Install task state machine types.
//!
//! The pipeline owns the mutable task; observers only ever receive
//! [`TaskSnapshot`] copies.

use crate::models::build::BuildIdentity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Pipeline stage a failure is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Download,
    Verify,
    Extract,
    FixStructure,
    Finalize,
}

impl PipelineStage {
    /// Relative share of the overall task this stage represents.
    pub fn weight(&self) -> f32 {
        match self {
            PipelineStage::Download => 0.60,
            PipelineStage::Verify => 0.05,
            PipelineStage::Extract => 0.25,
            PipelineStage::FixStructure => 0.05,
            PipelineStage::Finalize => 0.05,
        }
    }

    pub fn cumulative_weight(&self) -> f32 {
        match self {
            PipelineStage::Download => 0.60,
            PipelineStage::Verify => 0.65,
            PipelineStage::Extract => 0.90,
            PipelineStage::FixStructure => 0.95,
            PipelineStage::Finalize => 1.00,
        }
    }
}

/// State machine per install task.
///
/// `Failed` is reachable from every non-terminal state; `Cancelled` from
/// every state prior to `Installed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum TaskState {
    Queued,
    Downloading,
    Verifying,
    Extracting,
    FixingStructure,
    Installed,
    Failed {
        stage: PipelineStage,
        reason: String,
    },
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Installed | TaskState::Failed { .. } | TaskState::Cancelled
        )
    }

    /// Cancellation after `Installed` is a no-op.
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }

    /// The stage currently executing, for progress weighting.
    pub fn active_stage(&self) -> Option<PipelineStage> {
        match self {
            TaskState::Downloading => Some(PipelineStage::Download),
            TaskState::Verifying => Some(PipelineStage::Verify),
            TaskState::Extracting => Some(PipelineStage::Extract),
            TaskState::FixingStructure => Some(PipelineStage::FixStructure),
            _ => None,
        }
    }
}

/// Observable copy of one in-flight install task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub identity: BuildIdentity,
    pub state: TaskState,
    pub progress_bytes: u64,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    pub target_path: PathBuf,
}

impl TaskSnapshot {
    pub fn new(id: Uuid, identity: BuildIdentity, target_path: PathBuf) -> Self {
        Self {
            id,
            identity,
            state: TaskState::Queued,
            progress_bytes: 0,
            total_bytes: None,
            target_path,
        }
    }

    /// Overall completion estimate across all stages, 0.0 to 100.0.
    pub fn overall_percent(&self) -> f32 {
        match &self.state {
            TaskState::Queued => 0.0,
            TaskState::Installed => 100.0,
            TaskState::Failed { .. } | TaskState::Cancelled => 0.0,
            state => {
                let stage = state.active_stage().expect("active state has a stage");
                let done = stage.cumulative_weight() - stage.weight();
                let within = match (stage, self.total_bytes) {
                    (PipelineStage::Download, Some(total)) if total > 0 => {
                        (self.progress_bytes as f32 / total as f32).clamp(0.0, 1.0)
                    }
                    _ => 0.0,
                };
                (done + stage.weight() * within) * 100.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Lineage;
    use crate::models::version::BuildVersion;

    fn snapshot(state: TaskState) -> TaskSnapshot {
        let identity = BuildIdentity::new(
            BuildVersion::new(4, 2, 0),
            Lineage::Daily,
            "https://example.com/b.zip",
        );
        let mut snap = TaskSnapshot::new(Uuid::new_v4(), identity, PathBuf::from("/lib/daily/b"));
        snap.state = state;
        snap
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Installed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Failed {
            stage: PipelineStage::Verify,
            reason: "corrupt".into()
        }
        .is_terminal());
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Downloading.is_terminal());
    }

    #[test]
    fn test_cancellable_before_installed_only() {
        assert!(TaskState::Queued.is_cancellable());
        assert!(TaskState::FixingStructure.is_cancellable());
        assert!(!TaskState::Installed.is_cancellable());
    }

    #[test]
    fn test_stage_weights_sum_to_one() {
        let total: f32 = [
            PipelineStage::Download,
            PipelineStage::Verify,
            PipelineStage::Extract,
            PipelineStage::FixStructure,
            PipelineStage::Finalize,
        ]
        .iter()
        .map(|s| s.weight())
        .sum();
        assert!((total - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_overall_percent_monotonic_across_stages() {
        let mut downloading = snapshot(TaskState::Downloading);
        downloading.progress_bytes = 50;
        downloading.total_bytes = Some(100);
        let verifying = snapshot(TaskState::Verifying);
        let extracting = snapshot(TaskState::Extracting);
        let installed = snapshot(TaskState::Installed);

        assert!(downloading.overall_percent() > 0.0);
        assert!(verifying.overall_percent() > downloading.overall_percent());
        assert!(extracting.overall_percent() > verifying.overall_percent());
        assert_eq!(installed.overall_percent(), 100.0);
    }
}
