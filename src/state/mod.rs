// Per-video, per-stage status ledger
//
// not_started -> processing -> completed | failed. Failed stages only go back to
// not_started through an explicit reset. Every mutation is one SQLite transaction.

pub mod migrations;
mod store;

pub use store::StateMachine;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::PipelineError;

/// Pipeline stages, declared in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Conversion,
    Chunking,
    Filtering,
    Detection,
    Labeling,
    Review,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Conversion,
        Stage::Chunking,
        Stage::Filtering,
        Stage::Detection,
        Stage::Labeling,
        Stage::Review,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Conversion => STAGE_CONVERSION,
            Stage::Chunking => STAGE_CHUNKING,
            Stage::Filtering => STAGE_FILTERING,
            Stage::Detection => STAGE_DETECTION,
            Stage::Labeling => STAGE_LABELING,
            Stage::Review => STAGE_REVIEW,
        }
    }

    /// The stage whose output this stage consumes
    pub fn previous(self) -> Option<Stage> {
        let i = Stage::ALL.iter().position(|s| *s == self)?;
        i.checked_sub(1).map(|p| Stage::ALL[p])
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::NotStarted => "not_started",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(StageStatus::NotStarted),
            "processing" => Ok(StageStatus::Processing),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            other => Err(PipelineError::Other(format!("unknown stage status '{}'", other))),
        }
    }
}

/// What a caller asks the ledger to do to one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Start,
    Complete,
    Fail,
    Reset,
}

impl StageEvent {
    fn target(self) -> StageStatus {
        match self {
            StageEvent::Start => StageStatus::Processing,
            StageEvent::Complete => StageStatus::Completed,
            StageEvent::Fail => StageStatus::Failed,
            StageEvent::Reset => StageStatus::NotStarted,
        }
    }
}

/// Transition table. `processing -> processing` is a restart after a killed run.
pub fn next_status(from: StageStatus, event: StageEvent) -> Option<StageStatus> {
    use StageStatus::*;
    match (from, event) {
        (NotStarted, StageEvent::Start) | (Processing, StageEvent::Start) => Some(Processing),
        (Processing, StageEvent::Complete) => Some(Completed),
        (Processing, StageEvent::Fail) => Some(Failed),
        (_, StageEvent::Reset) => Some(NotStarted),
        _ => None,
    }
}

pub(crate) fn invalid_transition(video: &str, stage: Stage, from: StageStatus, event: StageEvent) -> PipelineError {
    PipelineError::InvalidTransition {
        video: video.to_string(),
        stage: stage.to_string(),
        from: from.to_string(),
        to: event.target().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoState {
    pub video: String,
    pub status: StageStatus,
    pub stages: BTreeMap<Stage, StageRecord>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl VideoState {
    pub fn stage(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.get(&stage)
    }

    /// First stage in pipeline order that is not completed, unless the video is terminal
    pub fn next_pending_stage(&self) -> Option<Stage> {
        match self.status {
            StageStatus::Completed | StageStatus::Failed => None,
            _ => Stage::ALL.iter().copied().find(|s| {
                self.stages.get(s).map(|r| r.status) != Some(StageStatus::Completed)
            }),
        }
    }

    /// The stage that failed, if any
    pub fn failed_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .find(|(_, r)| r.status == StageStatus::Failed)
            .map(|(s, _)| *s)
    }
}

/// Video status derived from its stages: completed iff every stage is completed, failed if
/// any stage failed, not_started if nothing has started, else processing.
pub fn aggregate_status<I>(statuses: I) -> StageStatus
where
    I: IntoIterator<Item = StageStatus>,
{
    let mut all_completed = true;
    let mut all_not_started = true;
    let mut any_failed = false;
    let mut seen = 0;

    for status in statuses {
        seen += 1;
        all_completed &= status == StageStatus::Completed;
        all_not_started &= status == StageStatus::NotStarted;
        any_failed |= status == StageStatus::Failed;
    }

    if seen == Stage::ALL.len() && all_completed {
        StageStatus::Completed
    } else if any_failed {
        StageStatus::Failed
    } else if all_not_started {
        StageStatus::NotStarted
    } else {
        StageStatus::Processing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateStatistics {
    pub total: usize,
    pub completed: usize,
    pub processing: usize,
    pub failed: usize,
    pub not_started: usize,
    pub completion_rate: f64,
}
