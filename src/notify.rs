//! Notification side channel
//!
//! Notifications are emitted as structured log events under the
//! `shelfwatch::notify` target so operators can route them separately
//! from ordinary diagnostics. The admin email is carried on failure
//! events for downstream alerting to pick up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::{NotifyConfig, NotifyLevel};

/// Importance of a single notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Importance {
    Info,
    Important,
    Critical,
}

fn threshold(level: NotifyLevel) -> Importance {
    match level {
        NotifyLevel::All => Importance::Info,
        NotifyLevel::Important => Importance::Important,
        NotifyLevel::Critical => Importance::Critical,
    }
}

/// Emits change and failure notifications, gated by configured level
#[derive(Clone)]
pub struct Notifier {
    level: NotifyLevel,
    admin_email: String,
    sent: Arc<AtomicUsize>,
}

impl Notifier {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            level: config.level,
            admin_email: config.admin_email.clone(),
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn passes(&self, importance: Importance) -> bool {
        if importance >= threshold(self.level) {
            self.sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of notifications actually emitted
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn price_change(&self, title: &str, field: &str, old: f64, new: f64, pct: f64) {
        if self.passes(Importance::Important) {
            warn!(
                target: "shelfwatch::notify",
                title,
                field,
                old,
                new,
                change_pct = format!("{:.1}%", pct * 100.0),
                "significant price change"
            );
        }
    }

    pub fn availability_change(&self, title: &str, old: &str, new: &str) {
        if self.passes(Importance::Important) {
            warn!(
                target: "shelfwatch::notify",
                title,
                old,
                new,
                "item went out of stock"
            );
        }
    }

    pub fn field_change(&self, title: &str, field: &str, old: &Value, new: &Value) {
        if self.passes(Importance::Important) {
            info!(
                target: "shelfwatch::notify",
                title,
                field,
                old = %old,
                new = %new,
                "record field changed"
            );
        }
    }

    pub fn job_failure(&self, job_type: &str, error: &str, critical: bool) {
        let importance = if critical {
            Importance::Critical
        } else {
            Importance::Important
        };
        if self.passes(importance) {
            error!(
                target: "shelfwatch::notify",
                job_type,
                error,
                critical,
                admin = %self.admin_email,
                "scheduled job failed"
            );
        }
    }
}
