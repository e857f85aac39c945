// Ledger migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;

use crate::error::{PipelineError, Result};

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: videos and their stage records
    r#"
    CREATE TABLE videos (
        name TEXT PRIMARY KEY,
        started_at TEXT,
        completed_at TEXT,
        error TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE stage_records (
        video TEXT NOT NULL REFERENCES videos(name) ON DELETE CASCADE,
        stage TEXT NOT NULL CHECK (stage IN ('conversion', 'chunking', 'filtering', 'detection', 'labeling', 'review')),
        stage_order INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'not_started'
            CHECK (status IN ('not_started', 'processing', 'completed', 'failed')),
        started_at TEXT,
        completed_at TEXT,
        failed_at TEXT,
        output_path TEXT,
        metadata TEXT,
        error TEXT,
        run_token TEXT,
        worker TEXT,
        PRIMARY KEY (video, stage)
    );

    CREATE INDEX idx_stage_records_status ON stage_records(status);
    "#,
];

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Run all pending migrations, each inside its own transaction
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    if current_version > target_version {
        return Err(PipelineError::Other(format!(
            "Ledger schema version {} is newer than this build supports (max {})",
            current_version, target_version
        )));
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        conn.execute_batch(&format!(
            "BEGIN; {} PRAGMA user_version = {}; COMMIT;",
            migration, migration_version
        ))?;

        log::info!("Applied ledger migration {}", migration_version);
    }

    Ok(())
}
