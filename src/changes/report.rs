//! Daily change report generation
//!
//! Reports summarize one UTC day of detected changes and are exported
//! twice: a JSON document for machine consumption and a flat CSV for
//! spreadsheet review. Re-running a report for the same day overwrites
//! both artifacts.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tracing::info;

use crate::model::{
    ChangeDetail, ChangeKind, DailyChangeReport, FieldChanges, RecordStatus,
};
use crate::store::{Repository, SharedStore};
use crate::Result;

/// Builds and exports daily change reports
#[derive(Clone)]
pub struct ReportBuilder {
    store: SharedStore,
    reports_dir: PathBuf,
}

impl ReportBuilder {
    pub fn new(store: SharedStore, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            reports_dir: reports_dir.into(),
        }
    }

    /// Summarizes all changes detected during the given UTC day
    pub fn build_daily_report(&self, date: NaiveDate) -> Result<DailyChangeReport> {
        let start = day_start(date);
        let end = day_start(date.succ_opt().unwrap_or(date));

        let store = self.store.lock().unwrap();
        let changes = store.changes_between(start, end)?;

        let mut changes_by_type: BTreeMap<String, FieldChanges> = BTreeMap::new();
        let mut updated_records: HashSet<i64> = HashSet::new();
        let mut total_changes = 0u64;

        for change in changes.iter().filter(|c| c.kind == ChangeKind::Update) {
            updated_records.insert(change.record_id);
            let title = store
                .get_title(change.record_id)?
                .unwrap_or_else(|| format!("record {}", change.record_id));

            for (field, diff) in change.field_diffs.iter() {
                total_changes += 1;
                let entry = changes_by_type.entry(field.as_str().to_string()).or_default();
                entry.count += 1;
                entry.details.push(ChangeDetail {
                    record_title: title.clone(),
                    old_value: diff.old.clone(),
                    new_value: diff.new.clone(),
                    timestamp: change.timestamp,
                });
            }
        }

        let metrics = store.aggregate_metrics()?;

        Ok(DailyChangeReport {
            date,
            total_records: metrics.total_records,
            new_records: store.count_first_seen_between(start, end)?,
            updated_records: updated_records.len() as u64,
            total_changes,
            changes_by_type,
            error_count: store.count_by_status(RecordStatus::Error)?,
            avg_response_time: metrics.avg_response_time,
            category_count: metrics.categories.len() as u64,
        })
    }

    /// Writes the JSON and CSV artifacts for a report, returning both paths
    pub fn write_report(&self, report: &DailyChangeReport) -> Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(&self.reports_dir)?;

        let stem = format!("change_report_{}", report.date.format("%Y-%m-%d"));
        let json_path = self.reports_dir.join(format!("{stem}.json"));
        let csv_path = self.reports_dir.join(format!("{stem}.csv"));

        fs::write(&json_path, serde_json::to_string_pretty(report)?)?;
        fs::write(&csv_path, render_csv(report))?;

        info!(
            date = %report.date,
            total_changes = report.total_changes,
            json = %json_path.display(),
            csv = %csv_path.display(),
            "wrote daily change report"
        );
        Ok((json_path, csv_path))
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

fn render_csv(report: &DailyChangeReport) -> String {
    let mut out = String::from("Date,Change Type,Record Title,Old Value,New Value,Timestamp\n");
    for (field, group) in &report.changes_by_type {
        for detail in &group.details {
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                report.date.format("%Y-%m-%d"),
                csv_escape(field),
                csv_escape(&detail.record_title),
                csv_escape(&render_value(&detail.old_value)),
                csv_escape(&render_value(&detail.new_value)),
                detail.timestamp.to_rfc3339(),
            ));
        }
    }
    out
}

/// Renders a JSON value without string quoting
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
