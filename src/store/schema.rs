//! Database schema definitions

use rusqlite::Connection;

/// SQL schema for the shelfwatch database
pub const SCHEMA_SQL: &str = r#"
-- Harvested catalog records, keyed by detail-page URL
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    category TEXT,
    description TEXT,
    price_incl_tax REAL,
    price_excl_tax REAL,
    availability TEXT,
    num_reviews INTEGER,
    rating INTEGER,
    image_url TEXT,
    content_fingerprint TEXT NOT NULL,
    snapshot_ref TEXT,
    first_seen_at TEXT NOT NULL,
    last_crawled_at TEXT NOT NULL,
    status TEXT NOT NULL,
    http_status INTEGER,
    response_time_secs REAL
);

CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);
CREATE INDEX IF NOT EXISTS idx_records_category ON records(category);
CREATE INDEX IF NOT EXISTS idx_records_last_crawled ON records(last_crawled_at);

-- Detected field-level change events; consolidated rows carry the
-- aggregate columns and an empty diff
CREATE TABLE IF NOT EXISTS changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES records(id),
    timestamp TEXT NOT NULL,
    kind TEXT NOT NULL,
    field_diffs TEXT NOT NULL,
    change_count INTEGER,
    first_change_at TEXT,
    last_change_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_changes_record ON changes(record_id);
CREATE INDEX IF NOT EXISTS idx_changes_timestamp ON changes(timestamp);

-- Crawl resumption markers, one row per kind
CREATE TABLE IF NOT EXISTS checkpoints (
    kind TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Scheduled job execution audit trail
CREATE TABLE IF NOT EXISTS job_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    details TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_runs_type ON job_runs(job_type, timestamp);

-- Raw page snapshots, content-addressed by SHA-256 digest
CREATE TABLE IF NOT EXISTS snapshots (
    digest TEXT PRIMARY KEY,
    body BLOB NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
