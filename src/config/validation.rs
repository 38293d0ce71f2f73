use url::Url;

use crate::config::types::{Config, JobSchedule};
use crate::sched::TriggerSpec;
use crate::{ConfigError, ConfigResult};

/// Validates configuration values against their accepted ranges.
pub fn validate_config(config: &Config) -> ConfigResult<()> {
    let url = Url::parse(&config.site.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", config.site.base_url)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must be http or https, got {}",
            url.scheme()
        )));
    }

    let c = &config.crawler;
    check_range("max-concurrent-fetches", c.max_concurrent_fetches as i64, 1, 20)?;
    check_range("request-timeout-secs", c.request_timeout_secs as i64, 1, 60)?;
    check_range("retry-attempts", c.retry_attempts as i64, 1, 10)?;
    check_range(
        "min-request-interval-ms",
        c.min_request_interval_ms as i64,
        100,
        10_000,
    )?;
    check_range("checkpoint-interval", c.checkpoint_interval as i64, 1, 1000)?;

    let threshold = config.changes.price_change_threshold;
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "price-change-threshold must be in (0, 1], got {threshold}"
        )));
    }
    check_range(
        "consolidate-after-days",
        config.changes.consolidate_after_days,
        1,
        365,
    )?;
    check_range(
        "snapshot-retention-days",
        config.changes.snapshot_retention_days,
        1,
        3650,
    )?;
    check_range(
        "recrawl-after-days",
        config.changes.recrawl_after_days,
        1,
        365,
    )?;

    check_schedule("full-scan", &config.schedule.full_scan)?;
    check_schedule("change-detection", &config.schedule.change_detection)?;
    check_schedule("maintenance", &config.schedule.maintenance)?;
    check_schedule("health-check", &config.schedule.health_check)?;

    Ok(())
}

fn check_range(name: &str, value: i64, min: i64, max: i64) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::Validation(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(())
}

fn check_schedule(name: &str, schedule: &JobSchedule) -> ConfigResult<()> {
    TriggerSpec::parse(&schedule.spec).map_err(|e| {
        ConfigError::Validation(format!("{name} trigger spec {:?}: {e}", schedule.spec))
    })?;
    if schedule.misfire_grace_secs == 0 {
        return Err(ConfigError::Validation(format!(
            "{name} misfire-grace-secs must be positive"
        )));
    }
    Ok(())
}
