//! SQLite-backed implementation of the Repository trait

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::changes::diff_records;
use crate::model::{
    AggregateMetrics, CatalogRecord, ChangeKind, ChangeRecord, ChangeSet, Checkpoint,
    ConsolidatedSummary, JobRun, JobStatus, RecordStatus, StoredRecord,
};
use crate::store::schema::initialize_schema;
use crate::store::traits::{Repository, StoreError, StoreResult};
use crate::ShelfError;

const RECORD_COLUMNS: &str = "id, source_url, title, category, description, price_incl_tax, \
     price_excl_tax, availability, num_reviews, rating, image_url, content_fingerprint, \
     snapshot_ref, first_seen_at, last_crawled_at, status, http_status, response_time_secs";

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates a database at the given path
    pub fn new(path: &Path) -> Result<Self, ShelfError> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )
        .map_err(StoreError::Sqlite)?;

        initialize_schema(&conn).map_err(StoreError::Sqlite)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, ShelfError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(StoreError::Sqlite)?;
        initialize_schema(&conn).map_err(StoreError::Sqlite)?;
        Ok(Self { conn })
    }

    fn store_snapshot(&self, body: &[u8]) -> StoreResult<String> {
        let digest = hex::encode(Sha256::digest(body));
        self.conn.execute(
            "INSERT OR IGNORE INTO snapshots (digest, body, created_at) VALUES (?1, ?2, ?3)",
            params![digest, body, to_db_time(Utc::now())],
        )?;
        Ok(digest)
    }
}

/// Formats a timestamp for storage
///
/// Fixed-width microsecond precision keeps the stored TEXT values
/// lexicographically ordered, which the range queries rely on.
fn to_db_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| StoreError::Database(format!("invalid timestamp {s:?}: {e}")))
}

fn parse_ts_sql(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_stored(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.get(0)?,
        first_seen_at: parse_ts_sql(13, row.get(13)?)?,
        record: CatalogRecord {
            source_url: row.get(1)?,
            title: row.get(2)?,
            category: row.get(3)?,
            description: row.get(4)?,
            price_incl_tax: row.get(5)?,
            price_excl_tax: row.get(6)?,
            availability: row.get(7)?,
            num_reviews: row.get(8)?,
            rating: row.get(9)?,
            image_url: row.get(10)?,
            content_fingerprint: row.get(11)?,
            snapshot_ref: row.get(12)?,
            last_crawled_at: parse_ts_sql(14, row.get(14)?)?,
            status: RecordStatus::from_db_string(&row.get::<_, String>(15)?)
                .unwrap_or(RecordStatus::Error),
            http_status: row.get(16)?,
            response_time_secs: row.get(17)?,
        },
    })
}

impl Repository for SqliteStore {
    // ===== Records =====

    fn get_by_url(&self, url: &str) -> StoreResult<Option<StoredRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE source_url = ?1"
        ))?;
        let record = stmt.query_row(params![url], map_stored).optional()?;
        Ok(record)
    }

    fn upsert(
        &mut self,
        record: &CatalogRecord,
        snapshot: Option<&[u8]>,
    ) -> StoreResult<(i64, Option<ChangeSet>)> {
        let existing = self.get_by_url(&record.source_url)?;
        let now = to_db_time(record.last_crawled_at);

        let Some(stored) = existing else {
            let snapshot_ref = match snapshot {
                Some(body) => Some(self.store_snapshot(body)?),
                None => record.snapshot_ref.clone(),
            };
            self.conn.execute(
                "INSERT INTO records (source_url, title, category, description,
                 price_incl_tax, price_excl_tax, availability, num_reviews, rating,
                 image_url, content_fingerprint, snapshot_ref, first_seen_at,
                 last_crawled_at, status, http_status, response_time_secs)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    record.source_url,
                    record.title,
                    record.category,
                    record.description,
                    record.price_incl_tax,
                    record.price_excl_tax,
                    record.availability,
                    record.num_reviews,
                    record.rating,
                    record.image_url,
                    record.content_fingerprint,
                    snapshot_ref,
                    now,
                    now,
                    record.status.to_db_string(),
                    record.http_status,
                    record.response_time_secs,
                ],
            )?;
            return Ok((self.conn.last_insert_rowid(), None));
        };

        if stored.record.content_fingerprint == record.content_fingerprint {
            // Unchanged content: refresh crawl metadata only
            self.conn.execute(
                "UPDATE records SET last_crawled_at = ?1, status = ?2,
                 http_status = ?3, response_time_secs = ?4 WHERE id = ?5",
                params![
                    now,
                    record.status.to_db_string(),
                    record.http_status,
                    record.response_time_secs,
                    stored.id,
                ],
            )?;
            return Ok((stored.id, None));
        }

        let diff = diff_records(&stored.record, record);
        let snapshot_ref = match snapshot {
            Some(body) => Some(self.store_snapshot(body)?),
            None => stored.record.snapshot_ref.clone(),
        };

        self.conn.execute(
            "UPDATE records SET title = ?1, category = ?2, description = ?3,
             price_incl_tax = ?4, price_excl_tax = ?5, availability = ?6,
             num_reviews = ?7, rating = ?8, image_url = ?9,
             content_fingerprint = ?10, snapshot_ref = ?11, last_crawled_at = ?12,
             status = ?13, http_status = ?14, response_time_secs = ?15
             WHERE id = ?16",
            params![
                record.title,
                record.category,
                record.description,
                record.price_incl_tax,
                record.price_excl_tax,
                record.availability,
                record.num_reviews,
                record.rating,
                record.image_url,
                record.content_fingerprint,
                snapshot_ref,
                now,
                record.status.to_db_string(),
                record.http_status,
                record.response_time_secs,
                stored.id,
            ],
        )?;

        let diff = if diff.is_empty() { None } else { Some(diff) };
        Ok((stored.id, diff))
    }

    fn record_urls(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT source_url FROM records")?;
        let urls = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(urls)
    }

    fn count_records(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_by_status(&self, status: RecordStatus) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE status = ?1",
            params![status.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_title(&self, record_id: i64) -> StoreResult<Option<String>> {
        let title = self
            .conn
            .query_row(
                "SELECT title FROM records WHERE id = ?1",
                params![record_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(title)
    }

    fn count_first_seen_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE first_seen_at >= ?1 AND first_seen_at < ?2",
            params![to_db_time(start), to_db_time(end)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn mark_for_recrawl(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let marked = self.conn.execute(
            "UPDATE records SET status = ?1 WHERE status = ?2 AND last_crawled_at < ?3",
            params![
                RecordStatus::PendingRecrawl.to_db_string(),
                RecordStatus::Success.to_db_string(),
                to_db_time(cutoff),
            ],
        )?;
        Ok(marked as u64)
    }

    // ===== Checkpoints =====

    fn get_checkpoint(&self, kind: &str) -> StoreResult<Option<Checkpoint>> {
        let checkpoint = self
            .conn
            .query_row(
                "SELECT kind, value, updated_at FROM checkpoints WHERE kind = ?1",
                params![kind],
                |row| {
                    Ok(Checkpoint {
                        kind: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: parse_ts_sql(2, row.get(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(checkpoint)
    }

    fn set_checkpoint(&mut self, kind: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO checkpoints (kind, value, updated_at) VALUES (?1, ?2, ?3)",
            params![kind, value, to_db_time(Utc::now())],
        )?;
        Ok(())
    }

    fn clear_checkpoints(&mut self) -> StoreResult<()> {
        self.conn.execute("DELETE FROM checkpoints", [])?;
        Ok(())
    }

    // ===== Change history =====

    fn record_change(&mut self, record_id: i64, diffs: &ChangeSet) -> StoreResult<i64> {
        let serialized = serde_json::to_string(diffs)?;
        self.conn.execute(
            "INSERT INTO changes (record_id, timestamp, kind, field_diffs) VALUES (?1, ?2, ?3, ?4)",
            params![
                record_id,
                to_db_time(Utc::now()),
                ChangeKind::Update.to_db_string(),
                serialized,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent_changes(&self, limit: u32) -> StoreResult<Vec<ChangeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, timestamp, kind, field_diffs FROM changes
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], map_change_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_change).collect()
    }

    fn changes_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<ChangeRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, record_id, timestamp, kind, field_diffs FROM changes
             WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map(params![to_db_time(start), to_db_time(end)], map_change_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_change).collect()
    }

    fn consolidate_changes(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff = to_db_time(cutoff);
        let tx = self.conn.transaction()?;

        let summaries = {
            let mut stmt = tx.prepare(
                "SELECT record_id,
                        SUM(COALESCE(change_count, 1)),
                        MIN(COALESCE(first_change_at, timestamp)),
                        MAX(COALESCE(last_change_at, timestamp))
                 FROM changes WHERE timestamp < ?1 GROUP BY record_id",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        tx.execute("DELETE FROM changes WHERE timestamp < ?1", params![cutoff])?;

        for (record_id, count, first_at, last_at) in &summaries {
            tx.execute(
                "INSERT INTO changes (record_id, timestamp, kind, field_diffs,
                 change_count, first_change_at, last_change_at)
                 VALUES (?1, ?2, ?3, '{}', ?4, ?5, ?6)",
                params![
                    record_id,
                    last_at,
                    ChangeKind::Consolidated.to_db_string(),
                    count,
                    first_at,
                    last_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(summaries.len() as u64)
    }

    fn consolidated_summaries(&self) -> StoreResult<Vec<ConsolidatedSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_id, change_count, first_change_at, last_change_at
             FROM changes WHERE kind = ?1 ORDER BY record_id",
        )?;
        let rows = stmt
            .query_map(params![ChangeKind::Consolidated.to_db_string()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(record_id, count, first_at, last_at)| {
                Ok(ConsolidatedSummary {
                    record_id,
                    change_count: count as u32,
                    first_change_at: parse_ts(&first_at)?,
                    last_change_at: parse_ts(&last_at)?,
                })
            })
            .collect()
    }

    // ===== Job audit =====

    fn record_job_run(
        &mut self,
        job_type: &str,
        status: JobStatus,
        details: &Value,
    ) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO job_runs (job_type, status, timestamp, details) VALUES (?1, ?2, ?3, ?4)",
            params![
                job_type,
                status.to_db_string(),
                to_db_time(Utc::now()),
                details.to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn last_successful_run(&self, job_type: &str) -> StoreResult<Option<JobRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_type, status, timestamp, details FROM job_runs
             WHERE job_type = ?1 AND status = ?2 ORDER BY timestamp DESC, id DESC LIMIT 1",
        )?;
        let row = stmt
            .query_map(
                params![job_type, JobStatus::Success.to_db_string()],
                map_job_raw,
            )?
            .next()
            .transpose()?;
        row.map(finish_job).transpose()
    }

    fn recent_job_runs(&self, since: DateTime<Utc>) -> StoreResult<Vec<JobRun>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_type, status, timestamp, details FROM job_runs
             WHERE timestamp >= ?1 ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt
            .query_map(params![to_db_time(since)], map_job_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(finish_job).collect()
    }

    // ===== Metrics =====

    fn aggregate_metrics(&self) -> StoreResult<AggregateMetrics> {
        let total = self.count_records()?;
        let errors = self.count_by_status(RecordStatus::Error)?;
        let error_rate = if total > 0 {
            errors as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT category FROM records WHERE category IS NOT NULL ORDER BY category",
        )?;
        let categories = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        let avg_response_time: Option<f64> = self.conn.query_row(
            "SELECT AVG(response_time_secs) FROM records WHERE response_time_secs IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(AggregateMetrics {
            total_records: total,
            error_rate,
            categories,
            avg_response_time,
        })
    }

    // ===== Snapshots =====

    fn put_snapshot(&mut self, body: &[u8]) -> StoreResult<String> {
        self.store_snapshot(body)
    }

    fn delete_snapshots_older_than(&mut self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM snapshots WHERE created_at < ?1",
            params![to_db_time(cutoff)],
        )?;
        Ok(deleted as u64)
    }

    fn delete_orphaned_snapshots(&mut self) -> StoreResult<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM snapshots WHERE digest NOT IN
             (SELECT snapshot_ref FROM records WHERE snapshot_ref IS NOT NULL)",
            [],
        )?;
        Ok(deleted as u64)
    }
}

type RawChange = (i64, i64, String, String, String);

fn map_change_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChange> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn finish_change((id, record_id, ts, kind, diffs): RawChange) -> StoreResult<ChangeRecord> {
    Ok(ChangeRecord {
        id,
        record_id,
        timestamp: parse_ts(&ts)?,
        kind: ChangeKind::from_db_string(&kind).unwrap_or(ChangeKind::Update),
        field_diffs: serde_json::from_str(&diffs)?,
    })
}

type RawJob = (i64, String, String, String, String);

fn map_job_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn finish_job((id, job_type, status, ts, details): RawJob) -> StoreResult<JobRun> {
    Ok(JobRun {
        id,
        job_type,
        status: JobStatus::from_db_string(&status).unwrap_or(JobStatus::Error),
        timestamp: parse_ts(&ts)?,
        details: serde_json::from_str(&details)?,
    })
}
