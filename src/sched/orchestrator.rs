//! Job orchestration: recurring schedules, singleton execution,
//! misfire handling, and retry with escalation
//!
//! Each job type runs on its own loop task. A per-job slot flag
//! guarantees at most one execution of a given job at a time; a firing
//! that arrives while the previous execution is still active is skipped,
//! not queued. Fire times that pass while the process is down are run at
//! startup only while still inside the job's misfire grace window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::model::JobStatus;
use crate::sched::jobs::{JobKind, Jobs};
use crate::sched::trigger::TriggerSpec;
use crate::store::Repository;
use crate::Result;

const RETRY_BASE: Duration = Duration::from_secs(1);

/// Singleton-execution flag for one job type
pub struct JobSlot {
    running: AtomicBool,
}

impl JobSlot {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
        }
    }

    /// Claims the slot; returns false when an execution is already active
    pub fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.running.store(false, Ordering::Release);
    }
}

impl Default for JobSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Schedule binding for one job type
#[derive(Clone, Copy)]
struct JobDef {
    kind: JobKind,
    trigger: TriggerSpec,
    grace: ChronoDuration,
    /// Retries after the first failed attempt
    retries: u32,
    /// Whether exhausted retries raise a critical notification
    escalate: bool,
}

/// Runs the four recurring jobs against their configured triggers
pub struct Orchestrator {
    jobs: Arc<Jobs>,
    defs: Vec<JobDef>,
}

impl Orchestrator {
    pub fn new(config: &Config, jobs: Jobs) -> Result<Self> {
        let s = &config.schedule;
        let defs = vec![
            JobDef {
                kind: JobKind::FullScan,
                trigger: TriggerSpec::parse(&s.full_scan.spec)?,
                grace: ChronoDuration::seconds(s.full_scan.misfire_grace_secs as i64),
                retries: 3,
                escalate: true,
            },
            JobDef {
                kind: JobKind::ChangeDetection,
                trigger: TriggerSpec::parse(&s.change_detection.spec)?,
                grace: ChronoDuration::seconds(s.change_detection.misfire_grace_secs as i64),
                retries: 3,
                escalate: true,
            },
            JobDef {
                kind: JobKind::Maintenance,
                trigger: TriggerSpec::parse(&s.maintenance.spec)?,
                grace: ChronoDuration::seconds(s.maintenance.misfire_grace_secs as i64),
                retries: 3,
                escalate: true,
            },
            JobDef {
                kind: JobKind::HealthCheck,
                trigger: TriggerSpec::parse(&s.health_check.spec)?,
                grace: ChronoDuration::seconds(s.health_check.misfire_grace_secs as i64),
                retries: 0,
                escalate: false,
            },
        ];
        Ok(Self {
            jobs: Arc::new(jobs),
            defs,
        })
    }

    /// Runs until the shutdown signal flips, then drains in-flight jobs
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        // The store must be reachable before any schedule starts
        let records = self.jobs.store().lock().unwrap().count_records()?;
        info!(records, "orchestrator starting");

        let in_flight: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let now = Utc::now();

        let mut loops = Vec::new();
        for def in &self.defs {
            let last_success = self
                .jobs
                .store()
                .lock()
                .unwrap()
                .last_successful_run(def.kind.name())?
                .map(|run| run.timestamp);
            let missed = misfire_due(def.trigger, def.grace, last_success, now);
            if let Some(fire_time) = missed {
                info!(
                    job = def.kind.name(),
                    fire_time = %fire_time,
                    "missed firing within grace, running at startup"
                );
            }

            loops.push(tokio::spawn(job_loop(
                Arc::clone(&self.jobs),
                *def,
                missed.is_some(),
                shutdown.clone(),
                Arc::clone(&in_flight),
            )));
        }

        for handle in loops {
            if let Err(e) = handle.await {
                error!(error = %e, "job loop task failed");
            }
        }

        // Shutdown: let executions that already started finish
        let handles = std::mem::take(&mut *in_flight.lock().await);
        if !handles.is_empty() {
            info!(in_flight = handles.len(), "waiting for running jobs");
            for handle in handles {
                let _ = handle.await;
            }
        }

        info!("orchestrator stopped");
        Ok(())
    }
}

/// A missed fire time still inside the grace window, if any
fn misfire_due(
    trigger: TriggerSpec,
    grace: ChronoDuration,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let prev = trigger.prev_fire(now);
    if last_success.map(|t| t >= prev).unwrap_or(false) {
        return None;
    }
    (now - prev <= grace).then_some(prev)
}

/// Schedule loop for one job type
async fn job_loop(
    jobs: Arc<Jobs>,
    def: JobDef,
    fire_immediately: bool,
    mut shutdown: watch::Receiver<bool>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    let slot = Arc::new(JobSlot::new());

    if fire_immediately {
        spawn_execution(&jobs, def, &slot, &in_flight).await;
    }

    loop {
        let next = def.trigger.next_fire(Utc::now());
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {
                info!(job = def.kind.name(), "schedule loop stopping");
                return;
            }
        }

        let lateness = Utc::now() - next;
        if lateness > def.grace {
            warn!(
                job = def.kind.name(),
                fire_time = %next,
                late_secs = lateness.num_seconds(),
                "firing missed its grace window, skipping"
            );
            continue;
        }

        spawn_execution(&jobs, def, &slot, &in_flight).await;
    }
}

async fn spawn_execution(
    jobs: &Arc<Jobs>,
    def: JobDef,
    slot: &Arc<JobSlot>,
    in_flight: &Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    if !slot.try_acquire() {
        warn!(
            job = def.kind.name(),
            "previous execution still running, skipping this firing"
        );
        return;
    }

    let jobs = Arc::clone(jobs);
    let slot = Arc::clone(slot);
    let handle = tokio::spawn(async move {
        execute_with_retry(&jobs, def).await;
        slot.release();
    });

    // Drop handles of completed executions so the list only ever holds
    // what is actually in flight
    let mut in_flight = in_flight.lock().await;
    in_flight.retain(|h| !h.is_finished());
    in_flight.push(handle);
}

/// Runs one job execution through its retry budget
///
/// Every attempt writes a running audit entry; success writes the job's
/// details, exhaustion writes an error entry and escalates when the job
/// is configured to.
async fn execute_with_retry(jobs: &Jobs, def: JobDef) {
    let attempts = def.retries + 1;
    let mut delay = RETRY_BASE;

    for attempt in 1..=attempts {
        record_audit(
            jobs,
            def.kind,
            JobStatus::Running,
            &json!({"attempt": attempt}),
        );

        match jobs.execute(def.kind).await {
            Ok(details) => {
                record_audit(jobs, def.kind, JobStatus::Success, &details);
                info!(job = def.kind.name(), attempt, "job succeeded");
                return;
            }
            Err(e) => {
                error!(
                    job = def.kind.name(),
                    attempt,
                    error = %e,
                    "job attempt failed"
                );
                if attempt == attempts {
                    record_audit(
                        jobs,
                        def.kind,
                        JobStatus::Error,
                        &json!({"error": e.to_string(), "attempts": attempts}),
                    );
                    if def.escalate {
                        jobs.notifier()
                            .job_failure(def.kind.name(), &e.to_string(), true);
                    }
                } else {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

fn record_audit(jobs: &Jobs, kind: JobKind, status: JobStatus, details: &serde_json::Value) {
    if let Err(e) = jobs
        .store()
        .lock()
        .unwrap()
        .record_job_run(kind.name(), status, details)
    {
        error!(job = kind.name(), error = %e, "failed to write job audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::{ChangeDetector, ReportBuilder};
    use crate::config::{
        ChangesConfig, Config, CrawlerConfig, NotifyConfig, ScheduleConfig, SiteConfig,
        StorageConfig,
    };
    use crate::notify::Notifier;
    use crate::store::{shared, SqliteStore};

    fn test_jobs(base_url: &str, dir: &tempfile::TempDir) -> Jobs {
        let config = Arc::new(Config {
            site: SiteConfig {
                base_url: base_url.to_string(),
                user_agent: "shelfwatch-test/0.1".to_string(),
            },
            crawler: CrawlerConfig::default(),
            storage: StorageConfig {
                database_path: dir.path().join("test.db").display().to_string(),
                reports_dir: dir.path().join("reports").display().to_string(),
            },
            changes: ChangesConfig::default(),
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
        });
        let store = shared(SqliteStore::new_in_memory().unwrap());
        let notifier = Notifier::new(&config.notify);
        let detector = ChangeDetector::new(store.clone(), notifier.clone(), 0.20);
        let reporter = ReportBuilder::new(store.clone(), dir.path());
        Jobs::new(config, store, detector, reporter, notifier)
    }

    fn health_def() -> JobDef {
        JobDef {
            kind: JobKind::HealthCheck,
            trigger: TriggerSpec::EveryMinutes(15),
            grace: ChronoDuration::seconds(300),
            retries: 0,
            escalate: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_record_error_and_escalate() {
        let dir = tempfile::tempdir().unwrap();
        // An unparseable base URL makes every full scan attempt fail fast
        let jobs = test_jobs("not a url", &dir);
        let def = JobDef {
            kind: JobKind::FullScan,
            trigger: TriggerSpec::EveryHours(1),
            grace: ChronoDuration::seconds(3600),
            retries: 2,
            escalate: true,
        };

        execute_with_retry(&jobs, def).await;

        let runs = jobs
            .store()
            .lock()
            .unwrap()
            .recent_job_runs(Utc::now() - ChronoDuration::hours(1))
            .unwrap();
        let running = runs
            .iter()
            .filter(|r| r.status == JobStatus::Running)
            .count();
        let errors: Vec<_> = runs
            .iter()
            .filter(|r| r.status == JobStatus::Error)
            .collect();

        // One running row per attempt, one terminal error row
        assert_eq!(running, 3);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].details["attempts"], serde_json::json!(3));
        assert_eq!(jobs.notifier().sent_count(), 1);
    }

    #[tokio::test]
    async fn test_held_slot_skips_firing_without_audit_rows() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(test_jobs("https://example.com/", &dir));
        let slot = Arc::new(JobSlot::new());
        let in_flight = Arc::new(Mutex::new(Vec::new()));

        assert!(slot.try_acquire());
        spawn_execution(&jobs, health_def(), &slot, &in_flight).await;

        assert!(in_flight.lock().await.is_empty());
        let runs = jobs
            .store()
            .lock()
            .unwrap()
            .recent_job_runs(Utc::now() - ChronoDuration::hours(1))
            .unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_finished_executions_are_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(test_jobs("https://example.com/", &dir));
        let slot = Arc::new(JobSlot::new());
        let in_flight = Arc::new(Mutex::new(Vec::new()));

        spawn_execution(&jobs, health_def(), &slot, &in_flight).await;
        loop {
            if in_flight.lock().await[0].is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        spawn_execution(&jobs, health_def(), &slot, &in_flight).await;
        assert_eq!(in_flight.lock().await.len(), 1);
    }

    #[test]
    fn test_slot_is_singleton() {
        let slot = JobSlot::new();
        assert!(slot.try_acquire());
        assert!(!slot.try_acquire());
        slot.release();
        assert!(slot.try_acquire());
    }

    #[test]
    fn test_misfire_due_within_grace() {
        let trigger = TriggerSpec::DailyAt { hour: 2, minute: 0 };
        let grace = ChronoDuration::seconds(3600);
        let now: DateTime<Utc> = "2026-08-27T02:30:00Z".parse().unwrap();

        // Never ran: the 02:00 firing is 30 minutes old, inside grace
        let missed = misfire_due(trigger, grace, None, now);
        assert_eq!(missed, Some("2026-08-27T02:00:00Z".parse().unwrap()));

        // Already ran after the fire time
        let last = "2026-08-27T02:05:00Z".parse().unwrap();
        assert_eq!(misfire_due(trigger, grace, Some(last), now), None);
    }

    #[test]
    fn test_misfire_due_outside_grace() {
        let trigger = TriggerSpec::DailyAt { hour: 2, minute: 0 };
        let grace = ChronoDuration::seconds(3600);
        let now: DateTime<Utc> = "2026-08-27T04:00:00Z".parse().unwrap();
        assert_eq!(misfire_due(trigger, grace, None, now), None);
    }
}
