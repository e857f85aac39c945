// Orchestrator scenarios against in-process capabilities

use super::*;
use crate::activity::load_activity_report;
use crate::capability::testing::{walking_track, FakeDetector, FakeEncoder, FakeFrameSource, FakeProber, FakeTracker, Scene};
use crate::constants::*;
use crate::events::load_events_summary;
use crate::labeling::{load_proposals, BehaviorClass};
use crate::state::StageStatus;
use crate::timeline::load_chunk_index;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    tmp: TempDir,
    config: PipelineConfig,
    state: StateMachine,
}

impl Fixture {
    fn sources(&self) -> PathBuf {
        self.config.directories.videos_full.clone()
    }

    fn add_source(&self, name: &str) -> PathBuf {
        let path = self.sources().join(name);
        fs::write(&path, b"raw recording").unwrap();
        path
    }

    fn layout(&self, video: &str) -> VideoLayout {
        VideoLayout::new(&self.config.directories.data_processing, video)
    }
}

/// 1200 frames at 30 fps in 20 s chunks: two chunks of 600 frames per video
fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let mut config = PipelineConfig::default();
    config.directories.videos_full = tmp.path().join("videos_full");
    config.directories.videos_converted = tmp.path().join("videos_converted");
    config.directories.data_processing = tmp.path().join("processing");
    config.chunking.chunk_duration_seconds = 20.0;
    config.chunking.start_time = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(8, 0, 0);
    fs::create_dir_all(&config.directories.videos_full).unwrap();

    let state = StateMachine::open(&config.state_path(), "run-1").unwrap();
    Fixture { tmp, config, state }
}

/// First chunk of every video shows a walking person, the second is empty
fn capabilities_with(tracker: FakeTracker, encoder: FakeEncoder, total_frames: u64) -> Capabilities {
    let mut scenes = HashMap::new();
    scenes.insert(PathBuf::from("chunks/chunk_0000.mp4"), Scene { motion: true, person: true });

    Capabilities {
        prober: Box::new(FakeProber::new(total_frames, 30.0)),
        encoder: Box::new(encoder),
        frames: Box::new(FakeFrameSource { scenes, ..FakeFrameSource::default() }),
        detector: Box::new(FakeDetector::default()),
        tracker: Box::new(tracker),
    }
}

fn walker_tracker() -> FakeTracker {
    let mut tracker = FakeTracker::default();
    tracker
        .tracks
        .insert(PathBuf::from("chunks/chunk_0000.mp4"), walking_track(1, 0, 60, 2.0, 0.9));
    tracker
}

fn capabilities() -> Capabilities {
    capabilities_with(walker_tracker(), FakeEncoder::default(), 1200)
}

#[test]
fn test_full_run_writes_every_artifact() {
    let fx = fixture();
    fx.add_source("cam01.dav");
    let caps = capabilities();

    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.discovered, 1);
    assert_eq!(summary.completed, vec!["cam01.dav".to_string()]);
    assert!(summary.failures.is_empty());
    assert!(fx.state.is_video_completed("cam01.dav").unwrap());
    assert_eq!(fx.state.get_next_pending_stage("cam01.dav").unwrap(), None);

    let converted = fx.config.directories.videos_converted.join("cam01_converted.mp4");
    assert!(converted.is_file());

    let layout = fx.layout("cam01.dav");
    let index = load_chunk_index(&layout.chunks.join(CHUNK_INDEX_FILENAME)).unwrap();
    assert_eq!(index.total_chunks, 2);
    assert_eq!(index.source_video, converted);

    let report = load_activity_report(&layout.active_chunks.join(ACTIVITY_REPORT_FILENAME)).unwrap();
    assert_eq!(report.statistics.active_chunks, 1);
    assert_eq!(report.active_chunks[0].chunk.chunk_id, "chunk_0000");
    assert_eq!(report.rejected_chunks[0].chunk_id, "chunk_0001");

    let summary = load_events_summary(&layout.events.join(EVENTS_SUMMARY_FILENAME)).unwrap();
    assert_eq!(summary.events.len(), 1);
    assert_eq!(summary.events[0].event_id, "chunk_0000_event_0001");
    assert_eq!(summary.events[0].frame_count, 60);

    let proposals_path = layout.proposals.join(PROPOSALS_FILENAME);
    let proposals = load_proposals(&proposals_path).unwrap();
    assert_eq!(proposals.proposals.len(), 1);
    assert_eq!(proposals.proposals[0].suggested_class, BehaviorClass::NormalBehavior);
    let yolo_dir = layout.proposals.join(YOLO_FOLDER);
    assert_eq!(fs::read_dir(&yolo_dir).unwrap().count(), summary.events[0].bbox_sequence.len());
    assert!(yolo_dir.join("chunk_0000_event_0001_frame_0000.txt").is_file());

    let state = fx.state.get_video_state("cam01.dav").unwrap().unwrap();
    let labeling = state.stage(Stage::Labeling).unwrap();
    assert_eq!(labeling.metadata["yolo_files"], summary.events[0].bbox_sequence.len());
    assert_eq!(labeling.metadata["yolo_skipped"], 0);
    let review = state.stage(Stage::Review).unwrap();
    assert_eq!(review.output.as_deref(), Some(&*proposals_path.to_string_lossy()));
    assert_eq!(review.metadata["review_skipped"], true);
    let chunking = state.stage(Stage::Chunking).unwrap();
    assert_eq!(chunking.metadata["total_chunks"], 2);
    assert_eq!(chunking.metadata["pipeline_version"], PIPELINE_VERSION);
    assert_eq!(chunking.run_token.as_deref(), Some("run-1"));
}

#[test]
fn test_completed_videos_are_not_reprocessed() {
    let fx = fixture();
    fx.add_source("cam01.dav");
    let caps = capabilities();
    PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();

    // Any capability call on the second run would panic
    let mut tracker = FakeTracker::default();
    tracker.panic_on.insert(PathBuf::from("chunk_0000.mp4"));
    let mut encoder = FakeEncoder::default();
    encoder.fail_on.insert(PathBuf::from("chunk_0000.mp4"));
    let caps = capabilities_with(tracker, encoder, 1200);

    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.skipped_completed, vec!["cam01.dav".to_string()]);
    assert!(summary.completed.is_empty());
    assert!(summary.failures.is_empty());
}

#[test]
fn test_capability_failure_fails_only_that_video() {
    let fx = fixture();
    fx.add_source("cam01.dav");
    fx.add_source("cam02.dav");

    let mut tracker = walker_tracker();
    tracker.fail_on.insert(PathBuf::from("cam02/chunks/chunk_0000.mp4"));
    let caps = capabilities_with(tracker, FakeEncoder::default(), 1200);
    let orchestrator = PipelineOrchestrator::new(&fx.config, &fx.state, &caps);

    let summary = orchestrator.run(&fx.sources()).unwrap();
    assert_eq!(summary.completed, vec!["cam01.dav".to_string()]);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.video, "cam02.dav");
    assert_eq!(failure.stage, Some(Stage::Detection));
    assert_eq!(failure.kind, ErrorKind::Capability);

    let state = fx.state.get_video_state("cam02.dav").unwrap().unwrap();
    assert_eq!(state.status, StageStatus::Failed);
    assert!(state.error.as_deref().unwrap().starts_with("[detection]"));
    assert_eq!(state.stage(Stage::Filtering).unwrap().status, StageStatus::Completed);
    assert_eq!(state.stage(Stage::Labeling).unwrap().status, StageStatus::NotStarted);

    // Failed videos wait for an explicit reset
    let summary = orchestrator.run(&fx.sources()).unwrap();
    assert_eq!(summary.skipped_failed, vec!["cam02.dav".to_string()]);
    assert_eq!(summary.skipped_completed, vec!["cam01.dav".to_string()]);

    fx.state.reset_stage_only("cam02.dav", Stage::Detection).unwrap();
    let caps = capabilities();
    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.completed, vec!["cam02.dav".to_string()]);
    assert!(fx.state.is_video_completed("cam02.dav").unwrap());
}

#[test]
fn test_missing_stage_input_is_recorded() {
    let fx = fixture();
    let source = fx.add_source("cam01.dav");
    let caps = capabilities();
    let orchestrator = PipelineOrchestrator::new(&fx.config, &fx.state, &caps);
    orchestrator.run_single_stage("cam01.dav", Stage::Conversion, &source).unwrap();

    // Lose the conversion output behind the ledger's back
    let conn = rusqlite::Connection::open(fx.config.state_path()).unwrap();
    conn.execute(
        "UPDATE stage_records SET output_path = NULL WHERE video = 'cam01.dav' AND stage = 'conversion'",
        [],
    )
    .unwrap();

    match orchestrator.process_video(&source) {
        VideoOutcome::Failed(failure) => {
            assert_eq!(failure.stage, Some(Stage::Chunking));
            assert!(failure.message.contains("no recorded output"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    let state = fx.state.get_video_state("cam01.dav").unwrap().unwrap();
    assert_eq!(state.stage(Stage::Chunking).unwrap().status, StageStatus::Failed);
    assert!(fx.state.is_video_failed("cam01.dav").unwrap());
}

#[test]
fn test_panicking_capability_is_recorded() {
    let fx = fixture();
    fx.add_source("cam01.dav");

    let mut tracker = walker_tracker();
    tracker.panic_on.insert(PathBuf::from("chunks/chunk_0000.mp4"));
    let caps = capabilities_with(tracker, FakeEncoder::default(), 1200);

    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Some(Stage::Detection));
    assert!(summary.failures[0].message.contains("panicked"));
    assert!(fx.state.is_video_failed("cam01.dav").unwrap());
}

#[test]
fn test_passthrough_source_skips_conversion() {
    let fx = fixture();
    let source = fx.add_source("cam03.mp4");
    let caps = capabilities();

    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.completed, vec!["cam03.mp4".to_string()]);

    let state = fx.state.get_video_state("cam03.mp4").unwrap().unwrap();
    let conversion = state.stage(Stage::Conversion).unwrap();
    assert_eq!(conversion.metadata["conversion_skipped"], true);
    assert_eq!(conversion.output.as_deref(), Some(&*source.to_string_lossy()));
    assert!(!fx.config.directories.videos_converted.join("cam03_converted.mp4").exists());
}

#[test]
fn test_unreadable_source_fails_chunking() {
    let fx = fixture();
    fx.add_source("empty.dav");
    let caps = capabilities_with(walker_tracker(), FakeEncoder::default(), 0);

    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].stage, Some(Stage::Chunking));
    assert_eq!(summary.failures[0].kind, ErrorKind::SourceUnreadable);

    let state = fx.state.get_video_state("empty.dav").unwrap().unwrap();
    assert_eq!(state.stage(Stage::Conversion).unwrap().status, StageStatus::Completed);
}

#[test]
fn test_incomplete_chunk_does_not_fail_video() {
    let fx = fixture();
    fx.add_source("cam01.dav");
    let mut encoder = FakeEncoder::default();
    encoder.fail_on.insert(PathBuf::from("cam01/chunks/chunk_0001.mp4"));
    let caps = capabilities_with(walker_tracker(), encoder, 1200);

    let summary = PipelineOrchestrator::new(&fx.config, &fx.state, &caps)
        .run(&fx.sources())
        .unwrap();
    assert_eq!(summary.completed, vec!["cam01.dav".to_string()]);

    let index = load_chunk_index(&fx.layout("cam01.dav").chunks.join(CHUNK_INDEX_FILENAME)).unwrap();
    assert_eq!(index.incomplete_chunks, 1);
    assert!(index.chunks[1].incomplete);
    assert_eq!(index.chunks[1].frames_written, 0);
}

#[test]
fn test_interrupted_stage_resumes() {
    let fx = fixture();
    let source = fx.add_source("cam01.dav");
    let caps = capabilities();
    let orchestrator = PipelineOrchestrator::new(&fx.config, &fx.state, &caps);

    // A killed process leaves chunking in processing
    orchestrator.execute_stage("cam01.dav", Stage::Conversion, &source).unwrap();
    fx.state.mark_start("cam01.dav", Stage::Chunking).unwrap();
    assert_eq!(fx.state.get_next_pending_stage("cam01.dav").unwrap(), Some(Stage::Chunking));

    let summary = orchestrator.run(&fx.sources()).unwrap();
    assert_eq!(summary.completed, vec!["cam01.dav".to_string()]);
}

#[test]
fn test_single_stage_with_explicit_input() {
    let fx = fixture();
    fx.add_source("cam01.dav");
    let caps = capabilities();
    let orchestrator = PipelineOrchestrator::new(&fx.config, &fx.state, &caps);
    orchestrator.run(&fx.sources()).unwrap();

    let events = fx.layout("cam01.dav").events.join(EVENTS_SUMMARY_FILENAME);

    // Re-running one stage of a finished video leaves it finished
    let outcome = orchestrator.run_single_stage("cam01.dav", Stage::Labeling, &events).unwrap();
    assert_eq!(outcome.metadata["total_proposals"], 1);
    assert!(fx.state.is_video_completed("cam01.dav").unwrap());

    // An unknown video gets a ledger entry with just that stage done
    let outcome = orchestrator.run_single_stage("adhoc.dav", Stage::Labeling, &events).unwrap();
    assert_eq!(outcome.output, fx.layout("adhoc.dav").proposals.join(PROPOSALS_FILENAME));
    let state = fx.state.get_video_state("adhoc.dav").unwrap().unwrap();
    assert_eq!(state.stage(Stage::Labeling).unwrap().status, StageStatus::Completed);
    assert_eq!(state.status, StageStatus::Processing);

    // A missing input fails the stage and is recorded
    let err = orchestrator
        .run_single_stage("adhoc.dav", Stage::Review, &fx.tmp.path().join("missing.json"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Other);
    assert!(fx.state.is_video_failed("adhoc.dav").unwrap());
}
