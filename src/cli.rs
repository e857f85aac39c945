// Surveil CLI binary

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use clap::{ArgAction, Parser, Subcommand};

use surveil_lib::capability::Capabilities;
use surveil_lib::config::PipelineConfig;
use surveil_lib::error::PipelineError;
use surveil_lib::pipeline::{PipelineOrchestrator, RunSummary};
use surveil_lib::state::{Stage, StageStatus, StateMachine};
use surveil_lib::timeline::plan_chunks;
use surveil_lib::tools;

#[derive(Parser)]
#[command(name = "surveil")]
#[command(about = "Turn long surveillance recordings into reviewable event proposals", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline config file (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every pending stage for every source video
    Run {
        /// Source directory or file (defaults to directories.videos_full)
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Run one stage for one video with an explicit input artifact
    Stage {
        /// conversion, chunking, filtering, detection, labeling or review
        stage: String,
        /// Ledger key, usually the source file name
        #[arg(long)]
        video: String,
        /// Input artifact for the stage
        #[arg(long)]
        input: PathBuf,
    },

    /// Reset ledger entries so they run again
    Reset {
        /// Video to reset
        video: Option<String>,
        /// Stage to reset
        #[arg(long)]
        stage: Option<String>,
        /// Also reset every later stage
        #[arg(long)]
        from: bool,
        /// Forget the video entirely
        #[arg(long)]
        all: bool,
        /// Reset every failed video from its failed stage
        #[arg(long)]
        failed: bool,
    },

    /// Show ledger statistics
    Status {
        /// Print the whole ledger as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the chunk plan for a recording
    Plan {
        /// Total frames in the recording
        #[arg(long)]
        frames: u64,
        /// Frame rate
        #[arg(long)]
        fps: f64,
        /// Chunk length in seconds (defaults to chunking.chunk_duration_seconds)
        #[arg(long)]
        chunk_seconds: Option<f64>,
        /// Wall-clock start, e.g. 2024-03-01T08:00:00
        #[arg(long)]
        start: Option<NaiveDateTime>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose > 0 { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { source } => cmd_run(&config, source),
        Commands::Stage { stage, video, input } => cmd_stage(&config, &stage, &video, &input),
        Commands::Reset { video, stage, from, all, failed } => {
            cmd_reset(&config, video, stage, from, all, failed)
        }
        Commands::Status { json } => cmd_status(&config, json),
        Commands::Plan { frames, fps, chunk_seconds, start } => cmd_plan(&config, frames, fps, chunk_seconds, start),
    }
}

fn open_state(config: &PipelineConfig) -> Result<StateMachine> {
    let run_token = uuid::Uuid::new_v4().to_string();
    Ok(StateMachine::open(&config.state_path(), &run_token)?)
}

fn require_media_tools() -> Result<()> {
    for tool in ["ffmpeg", "ffprobe"] {
        if !tools::is_tool_available(tool) {
            return Err(PipelineError::Configuration(format!("{} not found", tool)).into());
        }
    }
    Ok(())
}

fn cmd_run(config: &PipelineConfig, source: Option<PathBuf>) -> Result<()> {
    config.validate_for_run()?;
    require_media_tools()?;

    let source = source.unwrap_or_else(|| config.directories.videos_full.clone());
    let state = open_state(config)?;
    let caps = Capabilities::from_config(config);

    let summary = PipelineOrchestrator::new(config, &state, &caps).run(&source)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run complete:");
    println!("  Discovered:        {}", summary.discovered);
    println!("  Completed:         {}", summary.completed.len());
    println!("  Already completed: {}", summary.skipped_completed.len());
    println!("  Skipped (failed):  {}", summary.skipped_failed.len());
    println!("  Failed:            {}", summary.failures.len());

    if !summary.failures.is_empty() {
        println!();
        println!("{:<30}  {:<12}  {:<18}  {}", "Video", "Stage", "Kind", "Error");
        println!("{}", "-".repeat(80));
        for f in &summary.failures {
            let stage = f.stage.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
            println!("{:<30}  {:<12}  {:<18}  {}", f.video, stage, format!("{:?}", f.kind), f.message);
        }
    }
}

fn cmd_stage(config: &PipelineConfig, stage: &str, video: &str, input: &Path) -> Result<()> {
    let stage: Stage = stage.parse()?;
    match stage {
        Stage::Filtering | Stage::Detection => config.validate_for_run()?,
        _ => config.validate()?,
    }
    if matches!(stage, Stage::Conversion | Stage::Chunking | Stage::Filtering) {
        require_media_tools()?;
    }

    let state = open_state(config)?;
    let caps = Capabilities::from_config(config);
    let outcome = PipelineOrchestrator::new(config, &state, &caps).run_single_stage(video, stage, input)?;

    println!("{} {} completed", video, stage);
    println!("  Output:   {}", outcome.output.display());
    println!("  Metadata: {}", outcome.metadata);
    Ok(())
}

fn cmd_reset(
    config: &PipelineConfig,
    video: Option<String>,
    stage: Option<String>,
    from: bool,
    all: bool,
    failed: bool,
) -> Result<()> {
    let state = open_state(config)?;

    if failed {
        let reset = state.reset_failed_videos()?;
        if reset.is_empty() {
            println!("No failed videos.");
        }
        for video in reset {
            println!("Reset {}", video);
        }
        return Ok(());
    }

    let video = video.ok_or_else(|| anyhow::anyhow!("a video name is required unless --failed is given"))?;

    if all {
        if state.reset_video(&video)? {
            println!("Forgot {}", video);
        } else {
            println!("{} is not in the ledger", video);
        }
        return Ok(());
    }

    let stage: Stage = stage
        .ok_or_else(|| anyhow::anyhow!("--stage is required (or --all to forget the video)"))?
        .parse()?;

    if from {
        state.reset_stages_from(&video, stage)?;
        println!("Reset {} from {} onward", video, stage);
    } else {
        state.reset_stage_only(&video, stage)?;
        println!("Reset {} stage {}", video, stage);
    }
    Ok(())
}

fn cmd_status(config: &PipelineConfig, json: bool) -> Result<()> {
    let state = open_state(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state.snapshot()?)?);
        return Ok(());
    }

    let stats = state.statistics()?;
    println!("Ledger: {}", config.state_path().display());
    println!("  Total:       {}", stats.total);
    println!("  Completed:   {}", stats.completed);
    println!("  Processing:  {}", stats.processing);
    println!("  Failed:      {}", stats.failed);
    println!("  Not started: {}", stats.not_started);
    println!("  Completion:  {:.1}%", stats.completion_rate * 100.0);

    let videos = state.all_videos()?;
    let in_progress: Vec<_> = videos.iter().filter(|v| v.status == StageStatus::Processing).collect();
    if !in_progress.is_empty() {
        println!();
        println!("In progress:");
        for v in in_progress {
            let next = v.next_pending_stage().map(|s| s.to_string()).unwrap_or_default();
            println!("  {:<30}  next: {}", v.video, next);
        }
    }

    let failed: Vec<_> = videos.iter().filter(|v| v.status == StageStatus::Failed).collect();
    if !failed.is_empty() {
        println!();
        println!("Failed:");
        for v in failed {
            println!("  {:<30}  {}", v.video, v.error.as_deref().unwrap_or("-"));
        }
    }

    Ok(())
}

fn cmd_plan(
    config: &PipelineConfig,
    frames: u64,
    fps: f64,
    chunk_seconds: Option<f64>,
    start: Option<NaiveDateTime>,
) -> Result<()> {
    let chunk_seconds = chunk_seconds.unwrap_or(config.chunking.chunk_duration_seconds);
    let start = start
        .or(config.chunking.start_time)
        .unwrap_or_else(|| Local::now().naive_local());
    let spans = plan_chunks(frames, fps, chunk_seconds, start)?;

    println!("{} frames @ {:.2} fps -> {} chunks", frames, fps, spans.len());
    println!();
    println!("{:<12}  {:>10}  {:>10}  {:>9}  {:<20}  {}", "Chunk", "Start", "End", "Seconds", "From", "To");
    println!("{}", "-".repeat(90));
    for span in &spans {
        println!(
            "{:<12}  {:>10}  {:>10}  {:>9.2}  {:<20}  {}",
            span.chunk_id(),
            span.start_frame,
            span.end_frame,
            span.duration_s,
            span.start_ts.format("%Y-%m-%d %H:%M:%S"),
            span.end_ts.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
