use std::fs;
use std::path::Path;

use crate::config::types::Config;
use crate::config::validation::validate_config;
use crate::{ConfigError, ConfigResult};

/// Loads and validates a configuration file from disk.
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parses TOML configuration content.
pub fn parse_config(contents: &str) -> ConfigResult<Config> {
    toml::from_str(contents).map_err(ConfigError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[site]
base-url = "https://books.toscrape.com/"

[storage]
database-path = "shelfwatch.db"
reports-dir = "reports"
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.site.base_url, "https://books.toscrape.com/");
        assert_eq!(config.crawler.max_concurrent_fetches, 10);
        assert_eq!(config.crawler.retry_attempts, 3);
        assert_eq!(config.crawler.min_request_interval_ms, 1000);
        assert_eq!(config.changes.price_change_threshold, 0.20);
        assert_eq!(config.schedule.full_scan.spec, "daily@02:00");
        assert_eq!(config.schedule.health_check.misfire_grace_secs, 300);
    }

    #[test]
    fn parses_full_config() {
        let contents = r#"
[site]
base-url = "https://books.toscrape.com/"
user-agent = "shelfwatch-test/0.1"

[crawler]
max-concurrent-fetches = 5
request-timeout-secs = 20
retry-attempts = 4
min-request-interval-ms = 250
checkpoint-interval = 25

[storage]
database-path = "/var/lib/shelfwatch/catalog.db"
reports-dir = "/var/lib/shelfwatch/reports"

[changes]
price-change-threshold = 0.05
consolidate-after-days = 14
snapshot-retention-days = 30
recrawl-after-days = 3

[schedule]
full-scan = { spec = "daily@01:30", misfire-grace-secs = 900 }
change-detection = { spec = "every 2h", misfire-grace-secs = 600 }
maintenance = { spec = "daily@04:00", misfire-grace-secs = 3600 }
health-check = { spec = "every 5m", misfire-grace-secs = 120 }

[notify]
level = "important"
admin-email = "ops@example.com"
"#;
        let config = parse_config(contents).unwrap();
        assert_eq!(config.site.user_agent, "shelfwatch-test/0.1");
        assert_eq!(config.crawler.max_concurrent_fetches, 5);
        assert_eq!(config.changes.price_change_threshold, 0.05);
        assert_eq!(config.schedule.full_scan.spec, "daily@01:30");
        assert_eq!(config.notify.admin_email, "ops@example.com");
    }

    #[test]
    fn rejects_invalid_toml() {
        let result = parse_config("[site\nbase-url = ");
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.reports_dir, "reports");
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = load_config(Path::new("/nonexistent/shelfwatch.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
