//! Repository trait and storage error types

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    AggregateMetrics, CatalogRecord, ChangeRecord, ChangeSet, Checkpoint, ConsolidatedSummary,
    JobRun, JobStatus, RecordStatus, StoredRecord,
};

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(i64),

    #[error("Database error: {0}")]
    Database(String),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for catalog storage backends
///
/// Upsert is the only write path for records: it compares the incoming
/// record against stored state and returns the field-level diff when the
/// record already existed and materially changed.
pub trait Repository {
    // ===== Records =====

    /// Gets a stored record by its source URL
    fn get_by_url(&self, url: &str) -> StoreResult<Option<StoredRecord>>;

    /// Inserts or updates a record keyed on `source_url`
    ///
    /// When the stored fingerprint matches the incoming one, only crawl
    /// metadata (timestamp, status, http status, response time) is
    /// refreshed and no diff is produced. Otherwise all fields are written,
    /// the optional snapshot body is stored, and the diff against the
    /// prior version is returned when any tracked field changed.
    fn upsert(
        &mut self,
        record: &CatalogRecord,
        snapshot: Option<&[u8]>,
    ) -> StoreResult<(i64, Option<ChangeSet>)>;

    /// All known record source URLs
    fn record_urls(&self) -> StoreResult<Vec<String>>;

    /// Total number of records
    fn count_records(&self) -> StoreResult<u64>;

    /// Number of records in the given status
    fn count_by_status(&self, status: RecordStatus) -> StoreResult<u64>;

    /// Title of a record, if it exists
    fn get_title(&self, record_id: i64) -> StoreResult<Option<String>>;

    /// Number of records first seen within the given window
    fn count_first_seen_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Marks successful records not crawled since the cutoff as pending
    /// recrawl, returning how many were marked
    fn mark_for_recrawl(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    // ===== Checkpoints =====

    fn get_checkpoint(&self, kind: &str) -> StoreResult<Option<Checkpoint>>;

    fn set_checkpoint(&mut self, kind: &str, value: &str) -> StoreResult<()>;

    fn clear_checkpoints(&mut self) -> StoreResult<()>;

    // ===== Change history =====

    /// Persists one detected diff event, returning its ID
    fn record_change(&mut self, record_id: i64, diffs: &ChangeSet) -> StoreResult<i64>;

    /// Most recent change events, newest first
    fn recent_changes(&self, limit: u32) -> StoreResult<Vec<ChangeRecord>>;

    /// Change events with `start <= timestamp < end`, oldest first
    fn changes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ChangeRecord>>;

    /// Replaces fine-grained change events older than the cutoff with one
    /// consolidated summary row per record, returning how many records
    /// were consolidated
    fn consolidate_changes(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// All consolidated summary rows
    fn consolidated_summaries(&self) -> StoreResult<Vec<ConsolidatedSummary>>;

    // ===== Job audit =====

    /// Records one job execution audit entry, returning its ID
    fn record_job_run(
        &mut self,
        job_type: &str,
        status: JobStatus,
        details: &Value,
    ) -> StoreResult<i64>;

    /// Most recent successful run of the given job type
    fn last_successful_run(&self, job_type: &str) -> StoreResult<Option<JobRun>>;

    /// Job runs since the given instant, newest first
    fn recent_job_runs(&self, since: DateTime<Utc>) -> StoreResult<Vec<JobRun>>;

    // ===== Metrics =====

    fn aggregate_metrics(&self) -> StoreResult<AggregateMetrics>;

    // ===== Snapshots =====

    /// Stores a raw page body, returning its content-addressed digest
    fn put_snapshot(&mut self, body: &[u8]) -> StoreResult<String>;

    /// Deletes snapshots created before the cutoff, returning how many
    /// were deleted
    fn delete_snapshots_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Deletes snapshots no record references, returning how many were
    /// deleted
    fn delete_orphaned_snapshots(&mut self) -> StoreResult<u64>;
}
