//! Change detection: diffing, significance rules, and daily reporting.

mod detector;
mod report;

pub use detector::{diff_records, is_in_stock, ChangeDetector};
pub use report::ReportBuilder;
