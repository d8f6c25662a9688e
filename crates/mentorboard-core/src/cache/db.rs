//! SQLite database holding cache rows, the update queue and refresh claims
//!
//! Schema:
//! - dashboard_cache: one row per (subject_type, subject_id), metrics as bincode blob
//! - refresh_queue: pending stale signals, deduplicated by subject key
//! - refresh_claims: time-bounded per-subject refresh leases
//! - sweep_attempts: last failed sweep refresh per subject
//! - cache_meta: schema version
//!
//! The tables live in one file so a claim check and the row replace it
//! guards can share a transaction.
//!
//! Schema Version History:
//! - v1: Initial layout (student/director/sponsor metrics)

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Current metrics layout version
///
/// **IMPORTANT**: Increment when a metrics struct gains, loses or reinterprets
/// a field. On mismatch every cached row is dropped and its subject is queued
/// for recomputation, so dashboards never decode a row from an older layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Database file name inside the data directory
pub const DB_FILE_NAME: &str = "dashboard-cache.db";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dashboard_cache (
        subject_type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        cache_updated_at INTEGER NOT NULL,
        schema_version INTEGER NOT NULL,
        data BLOB NOT NULL,
        PRIMARY KEY (subject_type, subject_id)
    );

    CREATE INDEX IF NOT EXISTS idx_cache_updated_at ON dashboard_cache(cache_updated_at);

    CREATE TABLE IF NOT EXISTS refresh_queue (
        subject_type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        reason TEXT NOT NULL,
        enqueued_at INTEGER NOT NULL,
        generation INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        not_before INTEGER,
        claimed_at INTEGER,
        claim_token TEXT,
        PRIMARY KEY (subject_type, subject_id)
    );

    CREATE INDEX IF NOT EXISTS idx_queue_enqueued_at ON refresh_queue(enqueued_at);

    CREATE TABLE IF NOT EXISTS sweep_attempts (
        subject_type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        attempted_at INTEGER NOT NULL,
        PRIMARY KEY (subject_type, subject_id)
    );

    CREATE TABLE IF NOT EXISTS refresh_claims (
        subject_type TEXT NOT NULL,
        subject_id TEXT NOT NULL,
        token TEXT NOT NULL,
        owner TEXT NOT NULL,
        acquired_at INTEGER NOT NULL,
        expires_at INTEGER NOT NULL,
        PRIMARY KEY (subject_type, subject_id)
    );
"#;

/// Shared SQLite handle (thread-safe)
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Database {
    /// Create or open `<dir>/dashboard-cache.db`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;

        let path = dir.join(DB_FILE_NAME);
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open cache database: {}", path.display()))?;

        // WAL lets the CLI read while `serve` writes
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;

        let db = Self::from_connection(conn, Some(path.clone()))?;
        debug!(path = %path.display(), "Cache database opened");
        Ok(db)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;
        check_schema_version(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Vacuum database to reclaim space
    pub fn vacuum(&self) -> Result<()> {
        self.lock().execute("VACUUM", []).context("Failed to vacuum")?;
        debug!("Database vacuumed");
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.path.is_none() {
            return;
        }
        // Flush WAL into the main file so it doesn't grow across restarts
        let conn = self.conn.lock();
        if let Err(e) = conn.pragma_update(None, "wal_checkpoint", "TRUNCATE") {
            warn!("Failed to checkpoint WAL on Database drop: {}", e);
        } else {
            debug!("WAL checkpoint completed on Database drop");
        }
    }
}

fn check_schema_version(conn: &mut Connection) -> Result<()> {
    let stored: Option<u32> = conn
        .query_row(
            "SELECT value FROM cache_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query schema version")?;

    match stored {
        Some(v) if v == SCHEMA_VERSION => {
            debug!("Schema version {} matches current", SCHEMA_VERSION);
        }
        Some(v) => {
            warn!(
                stored = v,
                current = SCHEMA_VERSION,
                "Schema version mismatch, requeueing cached subjects"
            );

            let tx = conn.transaction().context("Failed to begin migration")?;
            let requeued = tx
                .execute(
                    "INSERT OR IGNORE INTO refresh_queue (subject_type, subject_id, reason, enqueued_at)
                     SELECT subject_type, subject_id, 'manual', ?1 FROM dashboard_cache",
                    params![Utc::now().timestamp_millis()],
                )
                .context("Failed to requeue cached subjects")?;
            tx.execute("DELETE FROM dashboard_cache", [])
                .context("Failed to clear stale rows")?;
            tx.execute(
                "INSERT OR REPLACE INTO cache_meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )
            .context("Failed to update schema version")?;
            tx.commit().context("Failed to commit migration")?;

            info!(requeued, version = SCHEMA_VERSION, "Cache rows cleared for new schema");
        }
        None => {
            conn.execute(
                "INSERT INTO cache_meta (key, value) VALUES ('schema_version', ?1)",
                params![SCHEMA_VERSION],
            )
            .context("Failed to initialize schema version")?;
            debug!("Schema version initialized to {}", SCHEMA_VERSION);
        }
    }

    Ok(())
}
