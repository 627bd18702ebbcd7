//! Durable per-file job tracking.
//!
//! One SQLite file per output directory holds a row for every input file
//! ever discovered there. Every mutating call is a single autocommitted
//! statement, so a transition is on disk before the call returns.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod error;
pub mod job;

pub use error::StoreError;
pub use job::{Job, JobStatus, SortKey, Summary};

use crate::storage;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    input_path TEXT UNIQUE NOT NULL,
    output_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error TEXT,
    duration_seconds REAL,
    processing_seconds REAL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS files_status ON files (status);
";

/// Exclusively owned handle to one output directory's job table.
pub struct JobStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for JobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JobStore {
    /// Opens (or creates) the store that belongs to `output_root`.
    pub fn open(output_root: &Path) -> Result<Self, StoreError> {
        Self::open_at(&storage::jobs_db_path(output_root))
    }

    /// Opens (or creates) a store file at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "job store opened");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Inserts a pending row unless the input path is already tracked.
    pub fn register(&self, input_path: &Path, output_path: &Path, model: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO files (input_path, output_path, status, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                path_text(input_path),
                path_text(output_path),
                JobStatus::Pending,
                model,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn status_of(&self, input_path: &Path) -> Result<Option<JobStatus>, StoreError> {
        let status = self
            .conn
            .query_row(
                "SELECT status FROM files WHERE input_path = ?1",
                params![path_text(input_path)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    pub fn get(&self, input_path: &Path) -> Result<Option<Job>, StoreError> {
        let job = self
            .conn
            .query_row(
                "SELECT * FROM files WHERE input_path = ?1",
                params![path_text(input_path)],
                Job::from_row,
            )
            .optional()?;
        Ok(job)
    }

    /// Unconditionally moves the row to `processing` and stamps its lease.
    pub fn mark_processing(&self, input_path: &Path) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE files SET status = ?2, started_at = ?3 WHERE input_path = ?1",
            params![path_text(input_path), JobStatus::Processing, Utc::now()],
        )?;
        Ok(())
    }

    /// Claims the row for processing unless another holder's lease is still
    /// live. A `processing` row whose lease is older than `stale_after` is
    /// taken over. Returns whether the claim succeeded.
    pub fn try_claim(&self, input_path: &Path, stale_after: Duration) -> Result<bool, StoreError> {
        let now = Utc::now();
        let lease = TimeDelta::from_std(stale_after).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.claim_before(input_path, cutoff, now)
    }

    pub(crate) fn claim_before(
        &self,
        input_path: &Path,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE files SET status = ?2, started_at = ?3
             WHERE input_path = ?1
               AND (status != ?2 OR started_at IS NULL OR started_at < ?4)",
            params![path_text(input_path), JobStatus::Processing, now, cutoff],
        )?;
        Ok(changed == 1)
    }

    /// Stores fresh metrics and drops any failure text left by an earlier attempt.
    pub fn mark_completed(
        &self,
        input_path: &Path,
        duration_seconds: Option<f64>,
        processing_seconds: Option<f64>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE files SET status = ?2, completed_at = ?3,
                duration_seconds = ?4, processing_seconds = ?5, error = NULL
             WHERE input_path = ?1",
            params![
                path_text(input_path),
                JobStatus::Completed,
                Utc::now(),
                duration_seconds,
                processing_seconds,
            ],
        )?;
        Ok(())
    }

    /// Records the failure text; metrics from an earlier success stay put.
    pub fn mark_failed(&self, input_path: &Path, error: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE files SET status = ?2, error = ?3 WHERE input_path = ?1",
            params![path_text(input_path), JobStatus::Failed, error],
        )?;
        Ok(())
    }

    /// Moves every failed row back to pending and clears its error.
    pub fn reset_failed(&self) -> Result<usize, StoreError> {
        let changed = self.conn.execute(
            "UPDATE files SET status = ?1, error = NULL WHERE status = ?2",
            params![JobStatus::Pending, JobStatus::Failed],
        )?;
        Ok(changed)
    }

    pub fn pending_rows(&self) -> Result<Vec<Job>, StoreError> {
        self.rows_with_status(JobStatus::Pending)
    }

    pub fn failed_rows(&self) -> Result<Vec<Job>, StoreError> {
        self.rows_with_status(JobStatus::Failed)
    }

    fn rows_with_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM files WHERE status = ?1 ORDER BY input_path")?;
        let rows = stmt
            .query_map(params![status], Job::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Counts per status and metric totals. NULL metrics are left out of the sums.
    pub fn summary(&self) -> Result<Summary, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*), SUM(duration_seconds), SUM(processing_seconds)
             FROM files GROUP BY status",
        )?;
        let groups = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, JobStatus>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, Option<f64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary = Summary::default();
        for (status, count, duration, processing) in groups {
            summary.add(
                status,
                count,
                duration.unwrap_or(0.0),
                processing.unwrap_or(0.0),
            );
        }
        Ok(summary)
    }

    pub fn all_rows(&self, status: Option<JobStatus>, sort: SortKey) -> Result<Vec<Job>, StoreError> {
        let order = sort.order_by();
        let rows = match status {
            Some(status) => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT * FROM files WHERE status = ?1 ORDER BY {order}"))?;
                stmt.query_map(params![status], Job::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT * FROM files ORDER BY {order}"))?;
                stmt.query_map([], Job::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    /// Closes the connection, surfacing any error SQLite reports on close.
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, err)| StoreError::Sqlite(err))
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn test_store() -> JobStore {
        JobStore::open_in_memory().expect("in-memory store")
    }

    fn register(store: &JobStore, name: &str) -> PathBuf {
        let input = PathBuf::from(format!("/in/{name}.mp3"));
        let output = PathBuf::from(format!("/out/{name}.txt"));
        store.register(&input, &output, "tiny").expect("register");
        input
    }

    #[test]
    fn register_is_insert_if_absent() -> Result<()> {
        let store = test_store();
        let input = register(&store, "a");
        store.mark_completed(&input, Some(3.0), Some(1.0))?;

        store.register(&input, Path::new("/elsewhere/a.json"), "large")?;

        let rows = store.all_rows(None, SortKey::Name)?;
        assert_eq!(rows.len(), 1);
        let job = &rows[0];
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_path, PathBuf::from("/out/a.txt"));
        assert_eq!(job.model, "tiny");
        assert_eq!(job.duration_seconds, Some(3.0));
        Ok(())
    }

    #[test]
    fn status_of_unknown_path_is_none() -> Result<()> {
        let store = test_store();
        assert_eq!(store.status_of(Path::new("/in/missing.mp3"))?, None);
        let input = register(&store, "a");
        assert_eq!(store.status_of(&input)?, Some(JobStatus::Pending));
        Ok(())
    }

    #[test]
    fn failure_keeps_earlier_metrics() -> Result<()> {
        let store = test_store();
        let input = register(&store, "a");
        store.mark_processing(&input)?;
        store.mark_completed(&input, Some(12.5), Some(4.0))?;
        store.mark_processing(&input)?;
        store.mark_failed(&input, "decoder exploded")?;

        let job = store.get(&input)?.expect("row");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("decoder exploded"));
        assert_eq!(job.duration_seconds, Some(12.5));
        assert_eq!(job.processing_seconds, Some(4.0));
        assert!(job.completed_at.is_some());
        assert!(job.started_at.is_some());
        Ok(())
    }

    #[test]
    fn completion_after_failure_drops_error() -> Result<()> {
        let store = test_store();
        let input = register(&store, "a");
        store.mark_processing(&input)?;
        store.mark_failed(&input, "decoder exploded")?;
        store.mark_processing(&input)?;
        store.mark_completed(&input, Some(3.0), Some(1.0))?;

        let job = store.get(&input)?.expect("row");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error, None);
        assert!(store.failed_rows()?.is_empty());
        Ok(())
    }

    #[test]
    fn completed_without_metrics_stores_nulls() -> Result<()> {
        let store = test_store();
        let input = register(&store, "a");
        store.mark_processing(&input)?;
        store.mark_completed(&input, None, None)?;
        let job = store.get(&input)?.expect("row");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.duration_seconds, None);
        assert_eq!(job.processing_seconds, None);
        assert!(job.completed_at.is_some());
        Ok(())
    }

    #[test]
    fn reset_failed_touches_only_failed_rows() -> Result<()> {
        let store = test_store();
        let a = register(&store, "a");
        let b = register(&store, "b");
        let c = register(&store, "c");
        let d = register(&store, "d");
        store.mark_failed(&a, "one")?;
        store.mark_failed(&b, "two")?;
        store.mark_completed(&c, Some(1.0), Some(1.0))?;
        store.mark_processing(&d)?;

        assert_eq!(store.reset_failed()?, 2);
        for input in [&a, &b] {
            let job = store.get(input)?.expect("row");
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.error, None);
        }
        assert_eq!(store.status_of(&c)?, Some(JobStatus::Completed));
        assert_eq!(store.status_of(&d)?, Some(JobStatus::Processing));
        assert_eq!(store.reset_failed()?, 0);
        Ok(())
    }

    #[test]
    fn summary_of_mixed_rows() -> Result<()> {
        let store = test_store();
        let done = register(&store, "done");
        let broken = register(&store, "broken");
        let _waiting = register(&store, "waiting");
        store.mark_processing(&done)?;
        store.mark_completed(&done, Some(10.0), Some(2.0))?;
        store.mark_processing(&broken)?;
        store.mark_failed(&broken, "boom")?;

        let summary = store.summary()?;
        assert_eq!(
            summary,
            Summary {
                total: 3,
                pending: 1,
                processing: 0,
                completed: 1,
                failed: 1,
                total_duration: 10.0,
                total_processing: 2.0,
            }
        );

        assert_eq!(store.reset_failed()?, 1);
        let job = store.get(&broken)?.expect("row");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.error, None);
        Ok(())
    }

    #[test]
    fn summary_sums_skip_nulls() -> Result<()> {
        let store = test_store();
        let a = register(&store, "a");
        let b = register(&store, "b");
        store.mark_completed(&a, Some(4.0), None)?;
        store.mark_completed(&b, None, Some(1.5))?;
        let summary = store.summary()?;
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.total_duration, 4.0);
        assert_eq!(summary.total_processing, 1.5);
        Ok(())
    }

    #[test]
    fn empty_store_summary_is_zero() -> Result<()> {
        let store = test_store();
        assert_eq!(store.summary()?, Summary::default());
        assert!(store.pending_rows()?.is_empty());
        Ok(())
    }

    #[test]
    fn listing_filters_and_sorts() -> Result<()> {
        let store = test_store();
        let c = register(&store, "c");
        let a = register(&store, "a");
        let b = register(&store, "b");
        store.mark_completed(&c, Some(1.0), Some(1.0))?;
        store.mark_completed(&a, Some(30.0), Some(1.0))?;
        store.mark_failed(&b, "bad")?;

        let names = |rows: Vec<Job>| rows.iter().map(Job::file_name).collect::<Vec<_>>();

        assert_eq!(
            names(store.all_rows(None, SortKey::Name)?),
            vec!["a.mp3", "b.mp3", "c.mp3"]
        );
        assert_eq!(
            names(store.all_rows(None, SortKey::Status)?),
            vec!["a.mp3", "c.mp3", "b.mp3"]
        );
        assert_eq!(
            names(store.all_rows(None, SortKey::Duration)?),
            vec!["b.mp3", "c.mp3", "a.mp3"]
        );
        assert_eq!(
            names(store.all_rows(Some(JobStatus::Completed), SortKey::parse_lenient("bogus"))?),
            vec!["a.mp3", "c.mp3"]
        );
        assert_eq!(names(store.failed_rows()?), vec!["b.mp3"]);
        Ok(())
    }

    #[test]
    fn claim_respects_live_lease() -> Result<()> {
        let store = test_store();
        let input = register(&store, "a");
        let now = Utc::now();

        assert!(store.claim_before(&input, now - TimeDelta::hours(1), now)?);
        assert_eq!(store.status_of(&input)?, Some(JobStatus::Processing));

        // Lease stamped at `now` is newer than the cutoff.
        assert!(!store.claim_before(&input, now - TimeDelta::hours(1), now)?);
        // Once the cutoff passes the stamp, the row is reclaimable.
        let later = now + TimeDelta::hours(2);
        assert!(store.claim_before(&input, later - TimeDelta::hours(1), later)?);
        Ok(())
    }

    #[test]
    fn try_claim_takes_pending_rows_and_refuses_fresh_leases() -> Result<()> {
        let store = test_store();
        let input = register(&store, "a");
        assert!(store.try_claim(&input, Duration::from_secs(3600))?);
        assert!(!store.try_claim(&input, Duration::from_secs(3600))?);
        assert!(!store.try_claim(Path::new("/in/unknown.mp3"), Duration::ZERO)?);
        Ok(())
    }

    #[test]
    fn state_survives_reopen() -> Result<()> {
        let dir = tempdir()?;
        let input = PathBuf::from("/in/a.mp3");
        {
            let store = JobStore::open(dir.path())?;
            store.register(&input, Path::new("/out/a.txt"), "tiny")?;
            store.mark_processing(&input)?;
            store.mark_completed(&input, Some(2.0), Some(1.0))?;
            // Dropped without close: writes are already committed.
        }
        let store = JobStore::open(dir.path())?;
        assert_eq!(store.status_of(&input)?, Some(JobStatus::Completed));
        assert_eq!(store.path(), Some(storage::jobs_db_path(dir.path()).as_path()));
        store.close()?;
        assert!(storage::jobs_db_path(dir.path()).is_file());
        Ok(())
    }
}
