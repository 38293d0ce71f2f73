//! Field-level diffing and change significance

use tracing::debug;

use crate::model::{CatalogRecord, ChangeSet, TrackedField, ValueDiff};
use crate::notify::Notifier;
use crate::store::{Repository, SharedStore};
use crate::Result;

/// Computes the field-level diff between two versions of a record
///
/// Compares every tracked field; fields absent on both sides never
/// appear in the result.
pub fn diff_records(old: &CatalogRecord, new: &CatalogRecord) -> ChangeSet {
    let mut set = ChangeSet::default();
    for field in TrackedField::ALL {
        let old_value = field.value_of(old);
        let new_value = field.value_of(new);
        if old_value != new_value {
            set.insert(
                field,
                ValueDiff {
                    old: old_value,
                    new: new_value,
                },
            );
        }
    }
    set
}

/// Whether an availability string indicates the item can be bought
pub fn is_in_stock(text: &str) -> bool {
    text.to_lowercase().contains("in stock")
}

/// Records detected diffs and notifies on the significant ones
#[derive(Clone)]
pub struct ChangeDetector {
    store: SharedStore,
    notifier: Notifier,
    price_threshold: f64,
}

impl ChangeDetector {
    pub fn new(store: SharedStore, notifier: Notifier, price_threshold: f64) -> Self {
        Self {
            store,
            notifier,
            price_threshold,
        }
    }

    /// Persists a diff produced by an upsert and emits notifications for
    /// each significant field change
    pub fn detect_and_record(
        &self,
        record_id: i64,
        record: &CatalogRecord,
        diff: &ChangeSet,
    ) -> Result<i64> {
        let change_id = self
            .store
            .lock()
            .unwrap()
            .record_change(record_id, diff)?;

        for (&field, value_diff) in diff.iter() {
            if self.is_significant(field, value_diff) {
                self.notify(field, value_diff, &record.title);
            } else {
                debug!(
                    record_id,
                    field = field.as_str(),
                    "field changed below significance threshold"
                );
            }
        }

        Ok(change_id)
    }

    /// Significance rules per field
    ///
    /// Title, description, and category changes always matter. Price
    /// changes matter past the configured fractional threshold, or when a
    /// previously unpriced item gains a price. Availability matters only
    /// on the in-stock to out-of-stock transition. Review counts and
    /// ratings are tracked but never significant on their own.
    pub fn is_significant(&self, field: TrackedField, diff: &ValueDiff) -> bool {
        match field {
            TrackedField::Title | TrackedField::Description | TrackedField::Category => true,
            TrackedField::PriceInclTax | TrackedField::PriceExclTax => {
                let old = diff.old.as_f64();
                let new = diff.new.as_f64();
                match (old, new) {
                    (Some(old), Some(new)) if old > 0.0 => {
                        ((new - old) / old).abs() > self.price_threshold
                    }
                    (_, Some(new)) => new > 0.0,
                    _ => false,
                }
            }
            TrackedField::Availability => {
                let was = diff.old.as_str().map(is_in_stock).unwrap_or(false);
                let is = diff.new.as_str().map(is_in_stock).unwrap_or(false);
                was && !is
            }
            TrackedField::NumReviews | TrackedField::Rating => false,
        }
    }

    fn notify(&self, field: TrackedField, diff: &ValueDiff, title: &str) {
        if field.is_price() {
            let old = diff.old.as_f64().unwrap_or(0.0);
            let new = diff.new.as_f64().unwrap_or(0.0);
            let pct = if old > 0.0 { (new - old) / old } else { 0.0 };
            self.notifier
                .price_change(title, field.as_str(), old, new, pct);
        } else if field == TrackedField::Availability {
            let old = diff.old.as_str().unwrap_or("");
            let new = diff.new.as_str().unwrap_or("");
            self.notifier.availability_change(title, old, new);
        } else {
            self.notifier
                .field_change(title, field.as_str(), &diff.old, &diff.new);
        }
    }

    /// Replaces old fine-grained change history with per-record summaries
    pub fn consolidate_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        Ok(self.store.lock().unwrap().consolidate_changes(cutoff)?)
    }
}
