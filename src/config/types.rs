use serde::Deserialize;

/// Main configuration structure for shelfwatch
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub site: SiteConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub changes: ChangesConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Target catalog site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Catalog index URL, crawl entry point
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// User agent sent with every request
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,
}

/// Crawl engine and fetcher behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum number of concurrent in-flight detail-page fetches (1-20)
    #[serde(rename = "max-concurrent-fetches", default = "default_concurrency")]
    pub max_concurrent_fetches: u32,

    /// Per-request timeout in seconds (1-60)
    #[serde(rename = "request-timeout-secs", default = "default_timeout")]
    pub request_timeout_secs: u64,

    /// Total attempt ceiling for retryable fetch failures (1-10)
    #[serde(rename = "retry-attempts", default = "default_retries")]
    pub retry_attempts: u32,

    /// Minimum time between any two request dispatches, in milliseconds
    /// (100-10000)
    #[serde(rename = "min-request-interval-ms", default = "default_interval")]
    pub min_request_interval_ms: u64,

    /// Number of successful item crawls between checkpoint writes
    #[serde(rename = "checkpoint-interval", default = "default_checkpoint")]
    pub checkpoint_interval: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_concurrency(),
            request_timeout_secs: default_timeout(),
            retry_attempts: default_retries(),
            min_request_interval_ms: default_interval(),
            checkpoint_interval: default_checkpoint(),
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory for daily report artifacts
    #[serde(rename = "reports-dir")]
    pub reports_dir: String,
}

/// Change detection and retention policy
#[derive(Debug, Clone, Deserialize)]
pub struct ChangesConfig {
    /// Fractional price change above which a diff is significant (0-1)
    #[serde(rename = "price-change-threshold", default = "default_threshold")]
    pub price_change_threshold: f64,

    /// Age in days after which change records are consolidated
    #[serde(rename = "consolidate-after-days", default = "default_consolidate")]
    pub consolidate_after_days: i64,

    /// Age in days after which page snapshots are deleted
    #[serde(rename = "snapshot-retention-days", default = "default_retention")]
    pub snapshot_retention_days: i64,

    /// Age in days after which records are marked for recrawl
    #[serde(rename = "recrawl-after-days", default = "default_recrawl")]
    pub recrawl_after_days: i64,
}

impl Default for ChangesConfig {
    fn default() -> Self {
        Self {
            price_change_threshold: default_threshold(),
            consolidate_after_days: default_consolidate(),
            snapshot_retention_days: default_retention(),
            recrawl_after_days: default_recrawl(),
        }
    }
}

/// Trigger binding for one scheduled job
#[derive(Debug, Clone, Deserialize)]
pub struct JobSchedule {
    /// Trigger spec: "daily@HH:MM", "every Nh", or "every Nm"
    pub spec: String,

    /// Tolerance window for a missed firing, in seconds
    #[serde(rename = "misfire-grace-secs")]
    pub misfire_grace_secs: u64,
}

impl JobSchedule {
    fn new(spec: &str, misfire_grace_secs: u64) -> Self {
        Self {
            spec: spec.to_string(),
            misfire_grace_secs,
        }
    }
}

/// Recurring trigger configuration per job type
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(rename = "full-scan", default = "default_full_scan")]
    pub full_scan: JobSchedule,

    #[serde(rename = "change-detection", default = "default_change_detection")]
    pub change_detection: JobSchedule,

    #[serde(default = "default_maintenance")]
    pub maintenance: JobSchedule,

    #[serde(rename = "health-check", default = "default_health_check")]
    pub health_check: JobSchedule,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_scan: default_full_scan(),
            change_detection: default_change_detection(),
            maintenance: default_maintenance(),
            health_check: default_health_check(),
        }
    }
}

/// Notification verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    /// Everything, including informational alerts
    All,
    /// Significant changes and failures
    Important,
    /// Only critical failures
    Critical,
}

/// Notification side-channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_level")]
    pub level: NotifyLevel,

    #[serde(rename = "admin-email", default = "default_admin_email")]
    pub admin_email: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            level: default_notify_level(),
            admin_email: default_admin_email(),
        }
    }
}

fn default_user_agent() -> String {
    format!("shelfwatch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_concurrency() -> u32 {
    10
}

fn default_timeout() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_interval() -> u64 {
    1000
}

fn default_checkpoint() -> u32 {
    10
}

fn default_threshold() -> f64 {
    0.20
}

fn default_consolidate() -> i64 {
    30
}

fn default_retention() -> i64 {
    60
}

fn default_recrawl() -> i64 {
    7
}

fn default_full_scan() -> JobSchedule {
    JobSchedule::new("daily@02:00", 3600)
}

fn default_change_detection() -> JobSchedule {
    JobSchedule::new("every 4h", 1800)
}

fn default_maintenance() -> JobSchedule {
    JobSchedule::new("daily@03:00", 3600)
}

fn default_health_check() -> JobSchedule {
    JobSchedule::new("every 15m", 300)
}

fn default_notify_level() -> NotifyLevel {
    NotifyLevel::All
}

fn default_admin_email() -> String {
    "admin@example.com".to_string()
}
