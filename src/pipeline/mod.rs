// Pipeline orchestrator: drives every source video through the stages in order,
// recording each step in the ledger.

pub mod discover;
mod stages;

pub use discover::{discover_sources, video_name, video_stem};
pub use stages::{StageOutcome, VideoLayout};

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::capability::Capabilities;
use crate::config::PipelineConfig;
use crate::constants::PIPELINE_VERSION;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::state::{Stage, StateMachine};
use stages::StageRunner;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFailure {
    pub video: String,
    pub stage: Option<Stage>,
    pub kind: ErrorKind,
    pub message: String,
}

/// What happened to each video in one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub discovered: usize,
    pub completed: Vec<String>,
    pub skipped_completed: Vec<String>,
    pub skipped_failed: Vec<String>,
    pub failures: Vec<VideoFailure>,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!(
            "Run finished: {} discovered, {} completed, {} already done, {} skipped as failed, {} failed",
            self.discovered,
            self.completed.len(),
            self.skipped_completed.len(),
            self.skipped_failed.len(),
            self.failures.len()
        );
        for f in &self.failures {
            let stage = f.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            log::error!("  {} failed at {}: {}", f.video, stage, f.message);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VideoOutcome {
    Completed,
    AlreadyCompleted,
    SkippedFailed,
    Failed(VideoFailure),
}

pub struct PipelineOrchestrator<'a> {
    config: &'a PipelineConfig,
    state: &'a StateMachine,
    runner: StageRunner<'a>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(config: &'a PipelineConfig, state: &'a StateMachine, caps: &'a Capabilities) -> Self {
        Self {
            config,
            state,
            runner: StageRunner::new(config, caps),
        }
    }

    /// Process every source under `source_dir`. Only discovery errors escape; per-video
    /// failures are recorded in the ledger and the summary.
    pub fn run(&self, source_dir: &Path) -> Result<RunSummary> {
        let sources = discover_sources(source_dir, &self.config.capabilities.source_extensions)?;
        log::info!(
            "Found {} source videos in {} (run {})",
            sources.len(),
            source_dir.display(),
            self.state.run_token()
        );

        let mut summary = RunSummary {
            discovered: sources.len(),
            ..RunSummary::default()
        };

        for source in &sources {
            let video = video_name(source);
            match self.process_video(source) {
                VideoOutcome::Completed => summary.completed.push(video),
                VideoOutcome::AlreadyCompleted => summary.skipped_completed.push(video),
                VideoOutcome::SkippedFailed => summary.skipped_failed.push(video),
                VideoOutcome::Failed(failure) => summary.failures.push(failure),
            }
        }

        summary.log();
        Ok(summary)
    }

    /// Resume one video at its first pending stage and run it to the end
    pub fn process_video(&self, source: &Path) -> VideoOutcome {
        let video = video_name(source);
        match self.drive_video(&video, source) {
            Ok(outcome) => outcome,
            Err((stage, e)) => VideoOutcome::Failed(VideoFailure {
                video,
                stage,
                kind: e.kind(),
                message: e.to_string(),
            }),
        }
    }

    fn drive_video(
        &self,
        video: &str,
        source: &Path,
    ) -> std::result::Result<VideoOutcome, (Option<Stage>, PipelineError)> {
        let ledger = |e: PipelineError| (None, e);

        if self.state.is_video_completed(video).map_err(ledger)? {
            log::info!("[{}] Already completed, skipping", video);
            return Ok(VideoOutcome::AlreadyCompleted);
        }

        if let Some(state) = self.state.get_video_state(video).map_err(ledger)? {
            if let Some(stage) = state.failed_stage() {
                log::warn!(
                    "[{}] Skipping, {} failed earlier: {}. Retry with `surveil reset {} --stage {}`",
                    video,
                    stage,
                    state.error.as_deref().unwrap_or("unknown error"),
                    video,
                    stage
                );
                return Ok(VideoOutcome::SkippedFailed);
            }
        }

        self.state.initialize_video(video).map_err(ledger)?;
        log::info!("[{}] Processing", video);

        while let Some(stage) = self.state.get_next_pending_stage(video).map_err(ledger)? {
            self.record_stage(video, stage, || {
                let input = self.stage_input(video, stage, source)?;
                log::debug!("[{}] Stage {} input: {}", video, stage, input.display());
                self.runner.run(video, stage, &input)
            })
            .map_err(|e| (Some(stage), e))?;
        }

        log::info!("[{}] Completed all stages", video);
        Ok(VideoOutcome::Completed)
    }

    /// The previous stage's recorded output, or the source itself for the first stage
    fn stage_input(&self, video: &str, stage: Stage, source: &Path) -> Result<PathBuf> {
        let Some(previous) = stage.previous() else {
            return Ok(source.to_path_buf());
        };
        let state = self
            .state
            .get_video_state(video)?
            .ok_or_else(|| PipelineError::VideoNotFound(video.to_string()))?;
        state
            .stage(previous)
            .and_then(|r| r.output.as_deref())
            .map(PathBuf::from)
            .ok_or_else(|| {
                PipelineError::Other(format!("{}: {} has no recorded output", video, previous))
            })
    }

    /// Run one stage under the ledger: start, then complete or fail. Panics become failures.
    pub fn execute_stage(&self, video: &str, stage: Stage, input: &Path) -> Result<StageOutcome> {
        self.record_stage(video, stage, || self.runner.run(video, stage, input))
    }

    fn record_stage<F>(&self, video: &str, stage: Stage, work: F) -> Result<StageOutcome>
    where
        F: FnOnce() -> Result<StageOutcome>,
    {
        self.state.mark_start(video, stage)?;
        log::info!("[{}] Stage {} started", video, stage);

        let result = catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|payload| {
                Err(PipelineError::Other(format!(
                    "{} panicked: {}",
                    stage,
                    panic_message(payload.as_ref())
                )))
            });

        match result {
            Ok(mut outcome) => {
                if let Some(map) = outcome.metadata.as_object_mut() {
                    map.insert("pipeline_version".to_string(), PIPELINE_VERSION.into());
                }
                self.state.mark_complete(
                    video,
                    stage,
                    &outcome.output.to_string_lossy(),
                    &outcome.metadata,
                )?;
                log::info!("[{}] Stage {} completed -> {}", video, stage, outcome.output.display());
                Ok(outcome)
            }
            Err(e) => {
                log::error!("[{}] Stage {} failed: {}", video, stage, e);
                self.state.mark_failed(video, stage, &e.to_string())?;
                Err(e)
            }
        }
    }

    /// Run a single stage with an explicit input artifact, after resetting that stage
    pub fn run_single_stage(&self, video: &str, stage: Stage, input: &Path) -> Result<StageOutcome> {
        self.state.initialize_video(video)?;
        self.state.reset_stage_only(video, stage)?;
        self.execute_stage(video, stage, input)
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
