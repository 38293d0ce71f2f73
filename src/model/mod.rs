//! Core data model for harvested records, change history, checkpoints,
//! and scheduled-job audit entries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifecycle status of a harvested record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Error,
    PendingRecrawl,
}

impl RecordStatus {
    /// Converts the status to its database string representation
    pub fn to_db_string(self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Error => "error",
            RecordStatus::PendingRecrawl => "pending_recrawl",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RecordStatus::Success),
            "error" => Some(RecordStatus::Error),
            "pending_recrawl" => Some(RecordStatus::PendingRecrawl),
            _ => None,
        }
    }
}

/// One harvested catalog item
///
/// Records are only ever created by the crawl engine and only ever mutated
/// by an upsert keyed on `source_url`, which also produces a diff when prior
/// state existed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Unique key: the detail-page URL this record was harvested from
    pub source_url: String,
    pub title: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub price_incl_tax: Option<f64>,
    pub price_excl_tax: Option<f64>,
    /// Availability text as shown on the page, e.g. "In stock (19 available)"
    pub availability: Option<String>,
    pub num_reviews: Option<u32>,
    /// Star rating 0-5
    pub rating: Option<u8>,
    pub image_url: Option<String>,
    /// SHA-256 hex digest of the raw fetched page
    pub content_fingerprint: String,
    /// Opaque handle into the snapshot blob store
    pub snapshot_ref: Option<String>,
    pub last_crawled_at: DateTime<Utc>,
    pub status: RecordStatus,
    pub http_status: Option<u16>,
    pub response_time_secs: Option<f64>,
}

/// A record as stored, with its repository-assigned identifier
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: i64,
    pub first_seen_at: DateTime<Utc>,
    pub record: CatalogRecord,
}

/// The closed set of fields compared by the change detector
///
/// Keeping this an enum (rather than free-form field names) keeps the diff
/// engine exhaustive: adding a field here forces `value_of` to handle it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TrackedField {
    Title,
    Description,
    Category,
    PriceInclTax,
    PriceExclTax,
    Availability,
    NumReviews,
    Rating,
}

impl TrackedField {
    /// All tracked fields, in comparison order
    pub const ALL: [TrackedField; 8] = [
        TrackedField::Title,
        TrackedField::Description,
        TrackedField::Category,
        TrackedField::PriceInclTax,
        TrackedField::PriceExclTax,
        TrackedField::Availability,
        TrackedField::NumReviews,
        TrackedField::Rating,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TrackedField::Title => "title",
            TrackedField::Description => "description",
            TrackedField::Category => "category",
            TrackedField::PriceInclTax => "price_incl_tax",
            TrackedField::PriceExclTax => "price_excl_tax",
            TrackedField::Availability => "availability",
            TrackedField::NumReviews => "num_reviews",
            TrackedField::Rating => "rating",
        }
    }

    /// Extracts this field's value from a record as a JSON value
    pub fn value_of(self, record: &CatalogRecord) -> Value {
        match self {
            TrackedField::Title => Value::from(record.title.clone()),
            TrackedField::Description => Value::from(record.description.clone()),
            TrackedField::Category => Value::from(record.category.clone()),
            TrackedField::PriceInclTax => Value::from(record.price_incl_tax),
            TrackedField::PriceExclTax => Value::from(record.price_excl_tax),
            TrackedField::Availability => Value::from(record.availability.clone()),
            TrackedField::NumReviews => Value::from(record.num_reviews),
            TrackedField::Rating => Value::from(record.rating),
        }
    }

    /// Whether this is one of the two price fields
    pub fn is_price(self) -> bool {
        matches!(self, TrackedField::PriceInclTax | TrackedField::PriceExclTax)
    }
}

/// Old and new values for a single changed field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueDiff {
    pub old: Value,
    pub new: Value,
}

/// Field-level diff between two versions of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(pub BTreeMap<TrackedField, ValueDiff>);

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: TrackedField) -> Option<&ValueDiff> {
        self.0.get(&field)
    }

    pub fn insert(&mut self, field: TrackedField, diff: ValueDiff) {
        self.0.insert(field, diff);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TrackedField, &ValueDiff)> {
        self.0.iter()
    }
}

/// Kind of stored change entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Update,
    Consolidated,
}

impl ChangeKind {
    pub fn to_db_string(self) -> &'static str {
        match self {
            ChangeKind::Update => "update",
            ChangeKind::Consolidated => "consolidated",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "update" => Some(ChangeKind::Update),
            "consolidated" => Some(ChangeKind::Consolidated),
            _ => None,
        }
    }
}

/// One detected diff event for a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub id: i64,
    pub record_id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: ChangeKind,
    pub field_diffs: ChangeSet,
}

/// Summary replacing many old fine-grained change records for one record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedSummary {
    pub record_id: i64,
    pub change_count: u32,
    pub first_change_at: DateTime<Utc>,
    pub last_change_at: DateTime<Utc>,
}

/// Persisted resumption marker for a crawl run
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Checkpoint kind, e.g. "page" or "category"
    pub kind: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Status of a scheduled job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Success,
    Error,
}

impl JobStatus {
    pub fn to_db_string(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "error" => Some(JobStatus::Error),
            _ => None,
        }
    }
}

/// Audit entry for one scheduled job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub job_type: String,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    /// Free-form details: attempt count, error text, statistics
    pub details: Value,
}

/// Statistics from one crawl engine run
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub total_items: u64,
    pub failed: u64,
    pub categories_processed: u64,
    #[serde(rename = "duration_secs", serialize_with = "serialize_duration_secs")]
    pub duration: Duration,
}

impl RunStats {
    /// A run is successful when no item failed
    pub fn successful(&self) -> bool {
        self.failed == 0
    }
}

fn serialize_duration_secs<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(d.as_secs_f64())
}

/// Store-wide aggregate metrics for monitoring and reporting
#[derive(Debug, Clone, Serialize)]
pub struct AggregateMetrics {
    pub total_records: u64,
    /// Percentage of records currently in error status
    pub error_rate: f64,
    pub categories: Vec<String>,
    pub avg_response_time: Option<f64>,
}

/// One field change resolved for human-readable reporting
#[derive(Debug, Clone, Serialize)]
pub struct ChangeDetail {
    pub record_title: String,
    pub old_value: Value,
    pub new_value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-field grouping in a daily report
#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldChanges {
    pub count: u64,
    pub details: Vec<ChangeDetail>,
}

/// Derived daily summary of detected changes, exported as JSON and CSV
#[derive(Debug, Clone, Serialize)]
pub struct DailyChangeReport {
    pub date: NaiveDate,
    pub total_records: u64,
    pub new_records: u64,
    pub updated_records: u64,
    pub total_changes: u64,
    pub changes_by_type: BTreeMap<String, FieldChanges>,
    pub error_count: u64,
    pub avg_response_time: Option<f64>,
    pub category_count: u64,
}
