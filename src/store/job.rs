//! Job record types shared by the store and its callers.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::StoreError;

/// Processing state of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl ToSql for JobStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for JobStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: StoreError| FromSqlError::Other(Box::new(e)))
    }
}

/// One tracked input file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: i64,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub status: JobStatus,
    pub error: Option<String>,
    pub duration_seconds: Option<f64>,
    pub processing_seconds: Option<f64>,
    pub model: String,
    pub created_at: DateTime<Utc>,
    /// Lease stamp written each time the row enters `processing`.
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            input_path: PathBuf::from(row.get::<_, String>("input_path")?),
            output_path: PathBuf::from(row.get::<_, String>("output_path")?),
            status: row.get("status")?,
            error: row.get("error")?,
            duration_seconds: row.get("duration_seconds")?,
            processing_seconds: row.get("processing_seconds")?,
            model: row.get("model")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    pub fn file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }
}

/// Aggregate counts and metric totals across every row.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total_duration: f64,
    pub total_processing: f64,
}

impl Summary {
    pub(crate) fn add(&mut self, status: JobStatus, count: u64, duration: f64, processing: f64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
        self.total += count;
        self.total_duration += duration;
        self.total_processing += processing;
    }

    /// Processing time per second of media, when both totals are known.
    pub fn average_rtf(&self) -> Option<f64> {
        if self.total_duration > 0.0 && self.total_processing > 0.0 {
            Some(self.total_processing / self.total_duration)
        } else {
            None
        }
    }
}

/// Listing order for [`super::JobStore::all_rows`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Name,
    Status,
    Duration,
}

impl SortKey {
    /// Unknown keys fall back to name ordering.
    pub fn parse_lenient(key: &str) -> Self {
        match key.trim().to_ascii_lowercase().as_str() {
            "status" => SortKey::Status,
            "duration" => SortKey::Duration,
            _ => SortKey::Name,
        }
    }

    pub(crate) fn order_by(self) -> &'static str {
        match self {
            SortKey::Name => "input_path",
            SortKey::Status => "status, input_path",
            SortKey::Duration => "duration_seconds, input_path",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().ok(), Some(status));
        }
        assert!(matches!(
            "done".parse::<JobStatus>(),
            Err(StoreError::InvalidStatus(s)) if s == "done"
        ));
    }

    #[test]
    fn unknown_sort_key_falls_back_to_name() {
        assert_eq!(SortKey::parse_lenient("duration"), SortKey::Duration);
        assert_eq!(SortKey::parse_lenient("Status"), SortKey::Status);
        assert_eq!(SortKey::parse_lenient("size"), SortKey::Name);
        assert_eq!(SortKey::parse_lenient(""), SortKey::Name);
    }

    #[test]
    fn rtf_needs_both_totals() {
        let mut summary = Summary::default();
        assert_eq!(summary.average_rtf(), None);
        summary.add(JobStatus::Completed, 1, 10.0, 0.0);
        assert_eq!(summary.average_rtf(), None);
        summary.add(JobStatus::Completed, 1, 10.0, 5.0);
        assert_eq!(summary.average_rtf(), Some(0.25));
    }
}
