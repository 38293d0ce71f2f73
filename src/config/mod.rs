//! TOML configuration: types, loading, and range validation.

mod parser;
mod types;
mod validation;

pub use parser::{load_config, parse_config};
pub use types::{
    ChangesConfig, Config, CrawlerConfig, JobSchedule, NotifyConfig, NotifyLevel, ScheduleConfig,
    SiteConfig, StorageConfig,
};
pub use validation::validate_config;
