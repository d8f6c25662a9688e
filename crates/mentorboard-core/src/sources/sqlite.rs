//! SQLite adapter for the platform's source tables
//!
//! Each read runs on the blocking pool so a slow query can be abandoned by
//! the per-read timeout in [`super::TimedSources`]. Results are ordered by id
//! so repeated computations see rows in the same order.

use super::{
    enrollment_status_str, parse_enrollment_status, CohortRow, DirectorProfile, EnrollmentRow,
    GoalRow, HabitRow, MentorSessionRow, SessionStatus, SourceAggregates, SourceResult,
    SponsorProfile, StudentProfile, SubmissionRow, SubscriptionRow, SubscriptionStatus,
};
use crate::clock::to_millis;
use crate::error::SourceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mentorboard_types::{SubjectKey, SubjectType};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Default file name for the source database inside the data directory
pub const SOURCES_DB_FILE_NAME: &str = "sources.db";

const SOURCE_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS students (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS directors (
        id TEXT PRIMARY KEY,
        display_name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS sponsor_orgs (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS cohorts (
        id TEXT PRIMARY KEY,
        director_id TEXT NOT NULL,
        name TEXT NOT NULL,
        seat_capacity INTEGER NOT NULL DEFAULT 0,
        mission_count INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_cohorts_director ON cohorts(director_id);

    CREATE TABLE IF NOT EXISTS enrollments (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        cohort_id TEXT NOT NULL,
        status TEXT NOT NULL,
        sponsor_id TEXT,
        enrolled_at INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id);
    CREATE INDEX IF NOT EXISTS idx_enrollments_cohort ON enrollments(cohort_id);
    CREATE INDEX IF NOT EXISTS idx_enrollments_sponsor ON enrollments(sponsor_id);

    CREATE TABLE IF NOT EXISTS submissions (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        cohort_id TEXT NOT NULL,
        mission_id TEXT NOT NULL,
        score REAL,
        passed INTEGER NOT NULL DEFAULT 0,
        submitted_at INTEGER NOT NULL,
        graded_at INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id);

    CREATE TABLE IF NOT EXISTS mentor_sessions (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        mentor_id TEXT NOT NULL,
        status TEXT NOT NULL,
        duration_minutes INTEGER NOT NULL DEFAULT 0,
        scheduled_for INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_student ON mentor_sessions(student_id);

    CREATE TABLE IF NOT EXISTS subscriptions (
        id TEXT PRIMARY KEY,
        holder_type TEXT NOT NULL,
        holder_id TEXT NOT NULL,
        seats INTEGER NOT NULL DEFAULT 1,
        status TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_subscriptions_holder ON subscriptions(holder_type, holder_id);

    CREATE TABLE IF NOT EXISTS habits (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        current_streak INTEGER NOT NULL DEFAULT 0,
        best_streak INTEGER NOT NULL DEFAULT 0,
        last_logged_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS goals (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS reflections (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
"#;

/// [`SourceAggregates`] over a SQLite database with the platform schema
#[derive(Clone)]
pub struct SqliteSources {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSources {
    /// Open (and create the schema in) a source database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open source database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        debug!(path = %path.display(), "Source database opened");
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory sources")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        conn.execute_batch(SOURCE_SCHEMA)
            .context("Failed to create source schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run writes against the source tables (imports, fixtures)
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn).context("Source write failed")
    }

    async fn read<T, F>(&self, read: &'static str, f: F) -> SourceResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| SourceError::unavailable(read, format!("read task failed: {}", e)))?
        .map_err(|e| SourceError::unavailable(read, e.to_string()))
    }
}

fn ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn parse_col<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl FnOnce(&str) -> Result<T, String>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    ids: &[String],
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), map)?;
    let collected: rusqlite::Result<Vec<T>> = rows.collect();
    collected
}

const ENROLLMENT_COLUMNS: &str = "id, student_id, cohort_id, status, sponsor_id, enrolled_at";

fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<EnrollmentRow> {
    Ok(EnrollmentRow {
        id: row.get(0)?,
        student_id: row.get(1)?,
        cohort_id: row.get(2)?,
        status: parse_col(row, 3, parse_enrollment_status)?,
        sponsor_id: row.get(4)?,
        enrolled_at: ts(row, 5)?,
    })
}

const COHORT_COLUMNS: &str = "id, director_id, name, seat_capacity, mission_count, active";

fn cohort_from_row(row: &Row<'_>) -> rusqlite::Result<CohortRow> {
    Ok(CohortRow {
        id: row.get(0)?,
        director_id: row.get(1)?,
        name: row.get(2)?,
        seat_capacity: row.get(3)?,
        mission_count: row.get(4)?,
        active: row.get(5)?,
    })
}

#[async_trait]
impl SourceAggregates for SqliteSources {
    async fn student_profile(&self, student_id: &str) -> SourceResult<Option<StudentProfile>> {
        let id = student_id.to_string();
        self.read("student_profile", move |conn| {
            conn.query_row(
                "SELECT id, display_name, created_at FROM students WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StudentProfile {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        created_at: ts(row, 2)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn director_profile(&self, director_id: &str) -> SourceResult<Option<DirectorProfile>> {
        let id = director_id.to_string();
        self.read("director_profile", move |conn| {
            conn.query_row(
                "SELECT id, display_name FROM directors WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DirectorProfile {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn sponsor_profile(&self, sponsor_id: &str) -> SourceResult<Option<SponsorProfile>> {
        let id = sponsor_id.to_string();
        self.read("sponsor_profile", move |conn| {
            conn.query_row(
                "SELECT id, name FROM sponsor_orgs WHERE id = ?1",
                params![id],
                |row| {
                    Ok(SponsorProfile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn enrollments_for_student(&self, student_id: &str) -> SourceResult<Vec<EnrollmentRow>> {
        let ids = vec![student_id.to_string()];
        self.read("enrollments_for_student", move |conn| {
            query_all(
                conn,
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE student_id = ? ORDER BY id"),
                &ids,
                enrollment_from_row,
            )
        })
        .await
    }

    async fn enrollments_for_cohorts(
        &self,
        cohort_ids: &[String],
    ) -> SourceResult<Vec<EnrollmentRow>> {
        if cohort_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = cohort_ids.to_vec();
        self.read("enrollments_for_cohorts", move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE cohort_id IN ({}) ORDER BY id",
                    placeholders(ids.len())
                ),
                &ids,
                enrollment_from_row,
            )
        })
        .await
    }

    async fn enrollments_for_sponsor(&self, sponsor_id: &str) -> SourceResult<Vec<EnrollmentRow>> {
        let ids = vec![sponsor_id.to_string()];
        self.read("enrollments_for_sponsor", move |conn| {
            query_all(
                conn,
                &format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE sponsor_id = ? ORDER BY id"),
                &ids,
                enrollment_from_row,
            )
        })
        .await
    }

    async fn cohorts_by_ids(&self, cohort_ids: &[String]) -> SourceResult<Vec<CohortRow>> {
        if cohort_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = cohort_ids.to_vec();
        self.read("cohorts_by_ids", move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {COHORT_COLUMNS} FROM cohorts WHERE id IN ({}) ORDER BY id",
                    placeholders(ids.len())
                ),
                &ids,
                cohort_from_row,
            )
        })
        .await
    }

    async fn cohorts_for_director(&self, director_id: &str) -> SourceResult<Vec<CohortRow>> {
        let ids = vec![director_id.to_string()];
        self.read("cohorts_for_director", move |conn| {
            query_all(
                conn,
                &format!("SELECT {COHORT_COLUMNS} FROM cohorts WHERE director_id = ? ORDER BY id"),
                &ids,
                cohort_from_row,
            )
        })
        .await
    }

    async fn submissions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<SubmissionRow>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = student_ids.to_vec();
        self.read("submissions_for_students", move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT id, student_id, cohort_id, mission_id, score, passed, submitted_at, graded_at
                     FROM submissions WHERE student_id IN ({}) ORDER BY id",
                    placeholders(ids.len())
                ),
                &ids,
                |row| {
                    Ok(SubmissionRow {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        cohort_id: row.get(2)?,
                        mission_id: row.get(3)?,
                        score: row.get(4)?,
                        passed: row.get(5)?,
                        submitted_at: ts(row, 6)?,
                        graded_at: opt_ts(row, 7)?,
                    })
                },
            )
        })
        .await
    }

    async fn sessions_for_students(
        &self,
        student_ids: &[String],
    ) -> SourceResult<Vec<MentorSessionRow>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = student_ids.to_vec();
        self.read("sessions_for_students", move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT id, student_id, mentor_id, status, duration_minutes, scheduled_for
                     FROM mentor_sessions WHERE student_id IN ({}) ORDER BY id",
                    placeholders(ids.len())
                ),
                &ids,
                |row| {
                    Ok(MentorSessionRow {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        mentor_id: row.get(2)?,
                        status: parse_col(row, 3, str::parse::<SessionStatus>)?,
                        duration_minutes: row.get(4)?,
                        scheduled_for: ts(row, 5)?,
                    })
                },
            )
        })
        .await
    }

    async fn habits_for_student(&self, student_id: &str) -> SourceResult<Vec<HabitRow>> {
        let ids = vec![student_id.to_string()];
        self.read("habits_for_student", move |conn| {
            query_all(
                conn,
                "SELECT id, student_id, active, current_streak, best_streak, last_logged_at
                 FROM habits WHERE student_id = ? ORDER BY id",
                &ids,
                |row| {
                    Ok(HabitRow {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        active: row.get(2)?,
                        current_streak: row.get(3)?,
                        best_streak: row.get(4)?,
                        last_logged_at: opt_ts(row, 5)?,
                    })
                },
            )
        })
        .await
    }

    async fn goals_for_student(&self, student_id: &str) -> SourceResult<Vec<GoalRow>> {
        let ids = vec![student_id.to_string()];
        self.read("goals_for_student", move |conn| {
            query_all(
                conn,
                "SELECT id, student_id, completed, updated_at FROM goals WHERE student_id = ? ORDER BY id",
                &ids,
                |row| {
                    Ok(GoalRow {
                        id: row.get(0)?,
                        student_id: row.get(1)?,
                        completed: row.get(2)?,
                        updated_at: ts(row, 3)?,
                    })
                },
            )
        })
        .await
    }

    async fn reflection_count(&self, student_id: &str) -> SourceResult<u32> {
        let id = student_id.to_string();
        self.read("reflection_count", move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM reflections WHERE student_id = ?1",
                params![id],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn subscriptions_for_holder(
        &self,
        holder: &SubjectKey,
    ) -> SourceResult<Vec<SubscriptionRow>> {
        let holder = holder.clone();
        self.read("subscriptions_for_holder", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, seats, status FROM subscriptions
                 WHERE holder_type = ?1 AND holder_id = ?2 ORDER BY id",
            )?;
            let rows = stmt.query_map(
                params![holder.subject_type.as_str(), holder.subject_id],
                |row| {
                    Ok(SubscriptionRow {
                        id: row.get(0)?,
                        holder: holder.clone(),
                        seats: row.get(1)?,
                        status: parse_col(row, 2, str::parse::<SubscriptionStatus>)?,
                    })
                },
            )?;
            let collected: rusqlite::Result<Vec<SubscriptionRow>> = rows.collect();
            collected
        })
        .await
    }

    async fn list_subjects(&self, subject_type: SubjectType) -> SourceResult<Vec<String>> {
        self.read("list_subjects", move |conn| {
            let table = match subject_type {
                SubjectType::Student => "students",
                SubjectType::Director => "directors",
                SubjectType::Sponsor => "sponsor_orgs",
            };
            query_all(
                conn,
                &format!("SELECT id FROM {table} ORDER BY id"),
                &[],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn related_subjects(&self, student_id: &str) -> SourceResult<Vec<SubjectKey>> {
        let id = student_id.to_string();
        self.read("related_subjects", move |conn| {
            let mut related = BTreeSet::new();

            let mut stmt = conn.prepare(
                "SELECT DISTINCT c.director_id FROM enrollments e
                 JOIN cohorts c ON c.id = e.cohort_id
                 WHERE e.student_id = ?1",
            )?;
            for director in stmt.query_map(params![id], |row| row.get::<_, String>(0))? {
                related.insert(SubjectKey::director(director?));
            }

            let mut stmt = conn.prepare(
                "SELECT DISTINCT sponsor_id FROM enrollments
                 WHERE student_id = ?1 AND sponsor_id IS NOT NULL",
            )?;
            for sponsor in stmt.query_map(params![id], |row| row.get::<_, String>(0))? {
                related.insert(SubjectKey::sponsor(sponsor?));
            }

            Ok(related.into_iter().collect())
        })
        .await
    }
}

/// Insert helpers shared by fixtures and the `init-sources` demo seed
impl SqliteSources {
    pub fn insert_student(&self, id: &str, name: &str, created_at: DateTime<Utc>) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO students (id, display_name, created_at) VALUES (?1, ?2, ?3)",
                params![id, name, to_millis(created_at)],
            )
            .map(|_| ())
        })
    }

    pub fn insert_director(&self, id: &str, name: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO directors (id, display_name) VALUES (?1, ?2)",
                params![id, name],
            )
            .map(|_| ())
        })
    }

    pub fn insert_sponsor(&self, id: &str, name: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sponsor_orgs (id, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .map(|_| ())
        })
    }

    pub fn insert_cohort(&self, cohort: &CohortRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cohorts (id, director_id, name, seat_capacity, mission_count, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    cohort.id,
                    cohort.director_id,
                    cohort.name,
                    cohort.seat_capacity,
                    cohort.mission_count,
                    cohort.active
                ],
            )
            .map(|_| ())
        })
    }

    pub fn insert_enrollment(&self, enrollment: &EnrollmentRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO enrollments (id, student_id, cohort_id, status, sponsor_id, enrolled_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    enrollment.id,
                    enrollment.student_id,
                    enrollment.cohort_id,
                    enrollment_status_str(enrollment.status),
                    enrollment.sponsor_id,
                    to_millis(enrollment.enrolled_at)
                ],
            )
            .map(|_| ())
        })
    }

    pub fn insert_submission(&self, submission: &SubmissionRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO submissions
                 (id, student_id, cohort_id, mission_id, score, passed, submitted_at, graded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    submission.id,
                    submission.student_id,
                    submission.cohort_id,
                    submission.mission_id,
                    submission.score,
                    submission.passed,
                    to_millis(submission.submitted_at),
                    submission.graded_at.map(to_millis)
                ],
            )
            .map(|_| ())
        })
    }

    pub fn insert_session(&self, session: &MentorSessionRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO mentor_sessions
                 (id, student_id, mentor_id, status, duration_minutes, scheduled_for)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session.id,
                    session.student_id,
                    session.mentor_id,
                    session.status.as_str(),
                    session.duration_minutes,
                    to_millis(session.scheduled_for)
                ],
            )
            .map(|_| ())
        })
    }

    pub fn insert_subscription(&self, subscription: &SubscriptionRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO subscriptions (id, holder_type, holder_id, seats, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    subscription.id,
                    subscription.holder.subject_type.as_str(),
                    subscription.holder.subject_id,
                    subscription.seats,
                    subscription.status.as_str()
                ],
            )
            .map(|_| ())
        })
    }

    pub fn insert_habit(&self, habit: &HabitRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO habits
                 (id, student_id, active, current_streak, best_streak, last_logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    habit.id,
                    habit.student_id,
                    habit.active,
                    habit.current_streak,
                    habit.best_streak,
                    habit.last_logged_at.map(to_millis)
                ],
            )
            .map(|_| ())
        })
    }

    pub fn insert_goal(&self, goal: &GoalRow) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO goals (id, student_id, completed, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![goal.id, goal.student_id, goal.completed, to_millis(goal.updated_at)],
            )
            .map(|_| ())
        })
    }

    pub fn insert_reflection(&self, id: &str, student_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO reflections (id, student_id, created_at) VALUES (?1, ?2, ?3)",
                params![id, student_id, to_millis(at)],
            )
            .map(|_| ())
        })
    }

    /// Delete a subject's owning row (students, directors or sponsor_orgs)
    pub fn delete_subject(&self, key: &SubjectKey) -> Result<bool> {
        let table = match key.subject_type {
            SubjectType::Student => "students",
            SubjectType::Director => "directors",
            SubjectType::Sponsor => "sponsor_orgs",
        };
        self.with_connection(|conn| {
            conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![key.subject_id])
                .map(|n| n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mentorboard_types::EnrollmentStatus;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap()
    }

    fn seeded() -> SqliteSources {
        let sources = SqliteSources::open_in_memory().unwrap();
        sources.insert_student("s1", "Ada", at()).unwrap();
        sources.insert_director("d1", "Grace").unwrap();
        sources.insert_sponsor("org1", "Acme").unwrap();
        sources
            .insert_cohort(&CohortRow {
                id: "c1".into(),
                director_id: "d1".into(),
                name: "Spring".into(),
                seat_capacity: 10,
                mission_count: 4,
                active: true,
            })
            .unwrap();
        sources
            .insert_enrollment(&EnrollmentRow {
                id: "e1".into(),
                student_id: "s1".into(),
                cohort_id: "c1".into(),
                status: EnrollmentStatus::Active,
                sponsor_id: Some("org1".into()),
                enrolled_at: at(),
            })
            .unwrap();
        sources
    }

    #[tokio::test]
    async fn test_profiles_and_missing_subjects() {
        let sources = seeded();
        let profile = sources.student_profile("s1").await.unwrap().unwrap();
        assert_eq!(profile.display_name, "Ada");
        assert_eq!(profile.created_at, at());
        assert!(sources.student_profile("nobody").await.unwrap().is_none());
        assert!(sources.director_profile("d1").await.unwrap().is_some());
        assert!(sources.sponsor_profile("org2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_related_subjects_for_fan_out() {
        let sources = seeded();
        let related = sources.related_subjects("s1").await.unwrap();
        assert_eq!(
            related,
            vec![SubjectKey::director("d1"), SubjectKey::sponsor("org1")]
        );
        assert!(sources.related_subjects("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_list_reads() {
        let sources = seeded();
        let enrollments = sources
            .enrollments_for_cohorts(&["c1".to_string(), "c9".to_string()])
            .await
            .unwrap();
        assert_eq!(enrollments.len(), 1);
        assert_eq!(enrollments[0].status, EnrollmentStatus::Active);

        assert!(sources.cohorts_by_ids(&[]).await.unwrap().is_empty());
        assert_eq!(
            sources.list_subjects(SubjectType::Director).await.unwrap(),
            vec!["d1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_corrupt_status_is_source_error() {
        let sources = seeded();
        sources
            .with_connection(|conn| {
                conn.execute("UPDATE enrollments SET status = 'paused' WHERE id = 'e1'", [])
            })
            .unwrap();

        let err = sources.enrollments_for_student("s1").await.unwrap_err();
        assert_eq!(err.read(), "enrollments_for_student");
    }
}
