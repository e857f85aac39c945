// SQLite-backed ledger

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::migrations::run_migrations;
use super::{
    aggregate_status, invalid_transition, next_status, Stage, StageEvent, StageRecord, StageStatus,
    StateStatistics, VideoState,
};
use crate::constants::LEDGER_TIMESTAMP_FORMAT;
use crate::error::{PipelineError, Result};

/// Durable record of every video's stage progress.
///
/// One connection behind a mutex; every mutation runs in its own `BEGIN IMMEDIATE`
/// transaction so a crash leaves either the old or the new record, never a mix.
pub struct StateMachine {
    conn: Mutex<Connection>,
    run_token: String,
    worker: String,
}

fn now_stamp() -> String {
    Local::now().naive_local().format(LEDGER_TIMESTAMP_FORMAT).to_string()
}

/// hostname:pid of this process
fn get_worker_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}", hostname, std::process::id())
}

fn stage_order(stage: Stage) -> i64 {
    Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0) as i64
}

impl StateMachine {
    /// Open or create the ledger at `path`
    pub fn open(path: &Path, run_token: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::from_connection(conn, run_token)
    }

    pub fn open_in_memory(run_token: &str) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, run_token)
    }

    fn from_connection(conn: Connection, run_token: &str) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = FULL;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            run_token: run_token.to_string(),
            worker: get_worker_id(),
        })
    }

    pub fn run_token(&self) -> &str {
        &self.run_token
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Other("state ledger lock poisoned".to_string()))
    }

    fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Create the video and its six not_started stages. No-op when it already exists.
    pub fn initialize_video(&self, video: &str) -> Result<()> {
        self.with_tx(|tx| insert_video(tx, video))
    }

    /// Mark a stage as processing. An unknown video is initialized first.
    pub fn mark_start(&self, video: &str, stage: Stage) -> Result<()> {
        self.with_tx(|tx| {
            insert_video(tx, video)?;
            let from = current_status(tx, video, stage)?;
            next_status(from, StageEvent::Start)
                .ok_or_else(|| invalid_transition(video, stage, from, StageEvent::Start))?;
            if from == StageStatus::Processing {
                log::warn!("[{}] Restarting {} left in processing by an earlier run", video, stage);
            }

            let now = now_stamp();
            tx.execute(
                "UPDATE stage_records SET status = 'processing', started_at = ?3,
                     completed_at = NULL, failed_at = NULL, error = NULL,
                     output_path = NULL, metadata = NULL, run_token = ?4, worker = ?5
                 WHERE video = ?1 AND stage = ?2",
                params![video, stage.as_str(), now, self.run_token, self.worker],
            )?;
            tx.execute(
                "UPDATE videos SET started_at = COALESCE(started_at, ?2), completed_at = NULL
                 WHERE name = ?1",
                params![video, now],
            )?;
            Ok(())
        })
    }

    /// Record a completed stage with its output reference
    pub fn mark_complete(
        &self,
        video: &str,
        stage: Stage,
        output: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        if output.trim().is_empty() {
            return Err(PipelineError::Other(format!(
                "{}/{}: completion requires an output reference",
                video, stage
            )));
        }
        let metadata = serde_json::to_string(metadata)?;

        self.with_tx(|tx| {
            let from = require_status(tx, video, stage)?;
            next_status(from, StageEvent::Complete)
                .ok_or_else(|| invalid_transition(video, stage, from, StageEvent::Complete))?;

            let now = now_stamp();
            tx.execute(
                "UPDATE stage_records SET status = 'completed', completed_at = ?3,
                     output_path = ?4, metadata = ?5, error = NULL
                 WHERE video = ?1 AND stage = ?2",
                params![video, stage.as_str(), now, output, metadata],
            )?;

            if video_status(tx, video)? == StageStatus::Completed {
                tx.execute(
                    "UPDATE videos SET completed_at = ?2, error = NULL WHERE name = ?1",
                    params![video, now],
                )?;
            }
            Ok(())
        })
    }

    /// Record a failed stage. The video-level error is "[stage] message".
    pub fn mark_failed(&self, video: &str, stage: Stage, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(PipelineError::Other(format!(
                "{}/{}: failure requires an error message",
                video, stage
            )));
        }

        self.with_tx(|tx| {
            let from = require_status(tx, video, stage)?;
            next_status(from, StageEvent::Fail)
                .ok_or_else(|| invalid_transition(video, stage, from, StageEvent::Fail))?;

            tx.execute(
                "UPDATE stage_records SET status = 'failed', failed_at = ?3, error = ?4
                 WHERE video = ?1 AND stage = ?2",
                params![video, stage.as_str(), now_stamp(), message],
            )?;
            tx.execute(
                "UPDATE videos SET error = ?2, completed_at = NULL WHERE name = ?1",
                params![video, format!("[{}] {}", stage, message)],
            )?;
            Ok(())
        })
    }

    /// Reset one stage to not_started, leaving the others alone
    pub fn reset_stage_only(&self, video: &str, stage: Stage) -> Result<()> {
        self.with_tx(|tx| {
            require_status(tx, video, stage)?;
            reset_stages(tx, video, &[stage])?;
            refresh_video_error(tx, video)
        })
    }

    /// Reset `stage` and every later stage
    pub fn reset_stages_from(&self, video: &str, stage: Stage) -> Result<()> {
        self.with_tx(|tx| {
            require_status(tx, video, stage)?;
            let stages: Vec<Stage> = Stage::ALL.iter().copied().filter(|s| *s >= stage).collect();
            reset_stages(tx, video, &stages)?;
            refresh_video_error(tx, video)
        })
    }

    /// Forget a video entirely. Returns false when it was never recorded.
    pub fn reset_video(&self, video: &str) -> Result<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute("DELETE FROM videos WHERE name = ?1", params![video])?;
            Ok(removed > 0)
        })
    }

    /// Reset every failed video from its failed stage onward. Returns the videos reset.
    pub fn reset_failed_videos(&self) -> Result<Vec<String>> {
        self.with_tx(|tx| {
            let mut stmt = tx.prepare(
                "SELECT video, stage FROM stage_records WHERE status = 'failed'
                 ORDER BY video, stage_order",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut reset = Vec::new();
            for (video, stage) in rows {
                if reset.last() == Some(&video) {
                    continue;
                }
                let stage: Stage = stage.parse()?;
                let stages: Vec<Stage> = Stage::ALL.iter().copied().filter(|s| *s >= stage).collect();
                reset_stages(tx, &video, &stages)?;
                refresh_video_error(tx, &video)?;
                log::info!("[{}] Reset from {}", video, stage);
                reset.push(video);
            }
            Ok(reset)
        })
    }

    pub fn get_video_state(&self, video: &str) -> Result<Option<VideoState>> {
        let conn = self.lock()?;
        load_video(&conn, video)
    }

    /// First stage to run for `video`. Unknown videos start at the beginning; completed and
    /// failed videos have nothing pending.
    pub fn get_next_pending_stage(&self, video: &str) -> Result<Option<Stage>> {
        Ok(match self.get_video_state(video)? {
            Some(state) => state.next_pending_stage(),
            None => Some(Stage::ALL[0]),
        })
    }

    pub fn is_video_completed(&self, video: &str) -> Result<bool> {
        Ok(self
            .get_video_state(video)?
            .map_or(false, |s| s.status == StageStatus::Completed))
    }

    pub fn is_video_failed(&self, video: &str) -> Result<bool> {
        Ok(self
            .get_video_state(video)?
            .map_or(false, |s| s.status == StageStatus::Failed))
    }

    pub fn all_videos(&self) -> Result<Vec<VideoState>> {
        let conn = self.lock()?;
        let names = {
            let mut stmt = conn.prepare("SELECT name FROM videos ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            names
        };

        let mut videos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(state) = load_video(&conn, &name)? {
                videos.push(state);
            }
        }
        Ok(videos)
    }

    pub fn videos_by_status(&self, status: StageStatus) -> Result<Vec<String>> {
        Ok(self
            .all_videos()?
            .into_iter()
            .filter(|v| v.status == status)
            .map(|v| v.video)
            .collect())
    }

    pub fn statistics(&self) -> Result<StateStatistics> {
        let mut stats = StateStatistics::default();
        for video in self.all_videos()? {
            stats.total += 1;
            match video.status {
                StageStatus::Completed => stats.completed += 1,
                StageStatus::Processing => stats.processing += 1,
                StageStatus::Failed => stats.failed += 1,
                StageStatus::NotStarted => stats.not_started += 1,
            }
        }
        if stats.total > 0 {
            stats.completion_rate = stats.completed as f64 / stats.total as f64;
        }
        Ok(stats)
    }

    /// Whole ledger keyed by video name
    pub fn snapshot(&self) -> Result<BTreeMap<String, VideoState>> {
        Ok(self
            .all_videos()?
            .into_iter()
            .map(|v| (v.video.clone(), v))
            .collect())
    }
}

fn insert_video(tx: &Transaction, video: &str) -> Result<()> {
    let inserted = tx.execute("INSERT OR IGNORE INTO videos (name) VALUES (?1)", params![video])?;
    if inserted == 0 {
        return Ok(());
    }
    for stage in Stage::ALL {
        tx.execute(
            "INSERT INTO stage_records (video, stage, stage_order) VALUES (?1, ?2, ?3)",
            params![video, stage.as_str(), stage_order(stage)],
        )?;
    }
    log::debug!("[{}] Initialized in ledger", video);
    Ok(())
}

fn current_status(conn: &Connection, video: &str, stage: Stage) -> Result<StageStatus> {
    let status: String = conn.query_row(
        "SELECT status FROM stage_records WHERE video = ?1 AND stage = ?2",
        params![video, stage.as_str()],
        |row| row.get(0),
    )?;
    status.parse()
}

fn require_status(conn: &Connection, video: &str, stage: Stage) -> Result<StageStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM stage_records WHERE video = ?1 AND stage = ?2",
            params![video, stage.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match status {
        Some(s) => s.parse(),
        None => Err(PipelineError::VideoNotFound(video.to_string())),
    }
}

fn video_status(conn: &Connection, video: &str) -> Result<StageStatus> {
    let mut stmt = conn.prepare("SELECT status FROM stage_records WHERE video = ?1")?;
    let statuses = stmt
        .query_map(params![video], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|s| s.parse::<StageStatus>())
        .collect::<Result<Vec<_>>>()?;
    Ok(aggregate_status(statuses))
}

fn reset_stages(tx: &Transaction, video: &str, stages: &[Stage]) -> Result<()> {
    for stage in stages {
        tx.execute(
            "UPDATE stage_records SET status = 'not_started', started_at = NULL,
                 completed_at = NULL, failed_at = NULL, output_path = NULL, metadata = NULL,
                 error = NULL, run_token = NULL, worker = NULL
             WHERE video = ?1 AND stage = ?2",
            params![video, stage.as_str()],
        )?;
    }
    Ok(())
}

/// Keep the video-level error and completion stamp consistent with its stages
fn refresh_video_error(tx: &Transaction, video: &str) -> Result<()> {
    let failed: Option<(String, String)> = tx
        .query_row(
            "SELECT stage, error FROM stage_records
             WHERE video = ?1 AND status = 'failed' ORDER BY stage_order LIMIT 1",
            params![video],
            |row| Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default())),
        )
        .optional()?;
    let error = failed.map(|(stage, message)| format!("[{}] {}", stage, message));
    tx.execute(
        "UPDATE videos SET error = ?2, completed_at = NULL WHERE name = ?1",
        params![video, error],
    )?;
    Ok(())
}

type StageRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn load_video(conn: &Connection, video: &str) -> Result<Option<VideoState>> {
    let header: Option<(Option<String>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT started_at, completed_at, error FROM videos WHERE name = ?1",
            params![video],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    let Some((started_at, completed_at, error)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT stage, status, started_at, completed_at, failed_at, output_path, metadata,
                error, run_token, worker
         FROM stage_records WHERE video = ?1 ORDER BY stage_order",
    )?;
    let rows: Vec<StageRow> = stmt
        .query_map(params![video], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut stages = BTreeMap::new();
    for (stage, status, started, completed, failed, output, metadata, err, token, worker) in rows {
        let metadata = match metadata {
            Some(text) => serde_json::from_str(&text)?,
            None => serde_json::Value::Null,
        };
        stages.insert(
            stage.parse::<Stage>()?,
            StageRecord {
                status: status.parse()?,
                started_at: started,
                completed_at: completed,
                failed_at: failed,
                output,
                metadata,
                error: err,
                run_token: token,
                worker,
            },
        );
    }

    Ok(Some(VideoState {
        video: video.to_string(),
        status: aggregate_status(stages.values().map(|r| r.status)),
        stages,
        error,
        started_at,
        completed_at,
    }))
}
