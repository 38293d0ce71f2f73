//! The four recurring job bodies
//!
//! Each job returns a JSON details document that lands in the job audit
//! trail on success, or an error that triggers the retry/escalation path.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::changes::{ChangeDetector, ReportBuilder};
use crate::config::Config;
use crate::crawler::{CrawlEngine, CHECKPOINT_CATEGORY, CHECKPOINT_PAGE};
use crate::model::{JobStatus, RecordStatus};
use crate::notify::Notifier;
use crate::store::{Repository, SharedStore};
use crate::{Result, ShelfError};

/// The recurring jobs the orchestrator schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    FullScan,
    ChangeDetection,
    Maintenance,
    HealthCheck,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::FullScan,
        JobKind::ChangeDetection,
        JobKind::Maintenance,
        JobKind::HealthCheck,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobKind::FullScan => "full_scan",
            JobKind::ChangeDetection => "change_detection",
            JobKind::Maintenance => "maintenance",
            JobKind::HealthCheck => "health_check",
        }
    }
}

/// Shared context the job bodies run against
#[derive(Clone)]
pub struct Jobs {
    config: Arc<Config>,
    store: SharedStore,
    detector: ChangeDetector,
    reporter: ReportBuilder,
    notifier: Notifier,
}

impl Jobs {
    pub fn new(
        config: Arc<Config>,
        store: SharedStore,
        detector: ChangeDetector,
        reporter: ReportBuilder,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            store,
            detector,
            reporter,
            notifier,
        }
    }

    pub async fn execute(&self, kind: JobKind) -> Result<Value> {
        match kind {
            JobKind::FullScan => self.full_scan().await,
            JobKind::ChangeDetection => self.change_detection().await,
            JobKind::Maintenance => self.maintenance().await,
            JobKind::HealthCheck => self.health_check().await,
        }
    }

    /// Crawls the whole catalog, resuming from checkpoints when present
    ///
    /// A run with any failed item is reported as a job failure so the
    /// retry path re-runs it; retained checkpoints make the retry cheap.
    pub async fn full_scan(&self) -> Result<Value> {
        let resume = {
            let store = self.store.lock().unwrap();
            store.get_checkpoint(CHECKPOINT_PAGE)?.is_some()
                || store.get_checkpoint(CHECKPOINT_CATEGORY)?.is_some()
        };
        if resume {
            info!("checkpoints present, resuming interrupted scan");
        }

        let engine = Arc::new(CrawlEngine::new(
            Arc::clone(&self.config),
            self.store.clone(),
            self.detector.clone(),
        )?);
        let stats = engine.run(resume).await?;

        let details = serde_json::to_value(&stats)?;
        if !stats.successful() {
            return Err(ShelfError::Crawl(format!(
                "{} of {} items failed",
                stats.failed,
                stats.total_items + stats.failed
            )));
        }
        Ok(details)
    }

    /// Summarizes changes since the last successful detection pass and
    /// writes today's report artifacts
    pub async fn change_detection(&self) -> Result<Value> {
        let now = Utc::now();
        let since = {
            let store = self.store.lock().unwrap();
            store
                .last_successful_run(JobKind::ChangeDetection.name())?
                .map(|run| run.timestamp)
                .unwrap_or_else(|| now - Duration::hours(24))
        };

        let window = self.store.lock().unwrap().changes_between(since, now)?;
        info!(
            since = %since,
            changes = window.len(),
            "change detection window"
        );

        let report = self.reporter.build_daily_report(now.date_naive())?;
        let (json_path, csv_path) = self.reporter.write_report(&report)?;

        Ok(json!({
            "window_start": since.to_rfc3339(),
            "window_changes": window.len(),
            "report_total_changes": report.total_changes,
            "report_json": json_path.display().to_string(),
            "report_csv": csv_path.display().to_string(),
        }))
    }

    /// Consolidates old change history, prunes snapshots, and flags stale
    /// records for recrawl
    pub async fn maintenance(&self) -> Result<Value> {
        let now = Utc::now();
        let changes = &self.config.changes;

        let consolidated = self
            .detector
            .consolidate_older_than(now - Duration::days(changes.consolidate_after_days))?;

        let (expired, orphaned, marked) = {
            let mut store = self.store.lock().unwrap();
            let expired = store
                .delete_snapshots_older_than(now - Duration::days(changes.snapshot_retention_days))?;
            let orphaned = store.delete_orphaned_snapshots()?;
            let marked =
                store.mark_for_recrawl(now - Duration::days(changes.recrawl_after_days))?;
            (expired, orphaned, marked)
        };

        info!(
            consolidated,
            expired_snapshots = expired,
            orphaned_snapshots = orphaned,
            marked_for_recrawl = marked,
            "maintenance pass complete"
        );

        Ok(json!({
            "consolidated_records": consolidated,
            "expired_snapshots": expired,
            "orphaned_snapshots": orphaned,
            "marked_for_recrawl": marked,
        }))
    }

    /// Read-only health summary of the store and recent job activity
    ///
    /// Health checks never mutate state and never escalate; a failing
    /// check surfaces through its own audit entry.
    pub async fn health_check(&self) -> Result<Value> {
        let store = self.store.lock().unwrap();
        let metrics = store.aggregate_metrics()?;
        let pending = store.count_by_status(RecordStatus::PendingRecrawl)?;

        let mut job_health: BTreeMap<&str, Value> = BTreeMap::new();
        let recent = store.recent_job_runs(Utc::now() - Duration::hours(24))?;
        for kind in JobKind::ALL {
            let runs: Vec<_> = recent
                .iter()
                .filter(|r| r.job_type == kind.name())
                .collect();
            let errors = runs
                .iter()
                .filter(|r| r.status == JobStatus::Error)
                .count();
            job_health.insert(
                kind.name(),
                json!({"runs_24h": runs.len(), "errors_24h": errors}),
            );
        }

        if metrics.error_rate > 10.0 {
            warn!(
                error_rate = metrics.error_rate,
                "record error rate above 10%"
            );
        }

        Ok(json!({
            "total_records": metrics.total_records,
            "error_rate_pct": metrics.error_rate,
            "categories": metrics.categories.len(),
            "pending_recrawl": pending,
            "avg_response_time_secs": metrics.avg_response_time,
            "jobs": job_health,
        }))
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}
