//! Configuration loader and validator for the repost scheduler.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::scheduler::Schedule;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid schedule {field} ({expression}): {message}")]
    Schedule {
        field: &'static str,
        expression: String,
        message: String,
    },
}

/// Upper bound for every `retention.*` value, roughly a century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub schedule: ScheduleTable,
    pub reposts: Reposts,
    pub retention: Retention,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Overridden by the `DATABASE_URL` environment variable when set.
    #[serde(default)]
    pub database_url: Option<String>,
}

/// Cron expression (with a seconds field, UTC) for each job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleTable {
    pub process_due_reposts: String,
    pub fetch_articles: String,
    pub generate_captions: String,
    pub cleanup_old_data: String,
}

/// Repost processing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reposts {
    pub batch_size: i64,
    pub caption_batch_size: i64,
    /// Failures before a repost is marked `failed`. `0` retries forever.
    pub max_attempts: u32,
}

/// Age thresholds for the retention sweep, in days.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retention {
    pub verification_token_days: i64,
    pub session_days: i64,
    pub article_days: i64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Database URL with the `DATABASE_URL` override applied.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.app.database_url.clone())
            .unwrap_or_else(|| format!("sqlite://{}/scheduler.db", self.app.data_dir))
    }
}

impl ScheduleTable {
    /// `(config field, expression)` pairs in job registration order.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            ("schedule.process_due_reposts", &self.process_due_reposts),
            ("schedule.fetch_articles", &self.fetch_articles),
            ("schedule.generate_captions", &self.generate_captions),
            ("schedule.cleanup_old_data", &self.cleanup_old_data),
        ]
    }
}

/// Parse the expression configured under `field`.
pub fn parse_schedule(field: &'static str, expression: &str) -> Result<Schedule, ConfigError> {
    expression.parse().map_err(|err: cron::error::Error| ConfigError::Schedule {
        field,
        expression: expression.to_string(),
        message: err.to_string(),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: App {
                data_dir: "./data".into(),
                database_url: None,
            },
            schedule: ScheduleTable {
                process_due_reposts: "0 * * * * *".into(),
                fetch_articles: "0 */10 * * * *".into(),
                generate_captions: "0 */5 * * * *".into(),
                cleanup_old_data: "0 0 2 * * *".into(),
            },
            reposts: Reposts {
                batch_size: 10,
                caption_batch_size: 5,
                max_attempts: 0,
            },
            retention: Retention {
                verification_token_days: 1,
                session_days: 7,
                article_days: 30,
            },
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    for (field, expression) in cfg.schedule.entries() {
        parse_schedule(field, expression)?;
    }

    if cfg.reposts.batch_size <= 0 {
        return Err(ConfigError::Invalid("reposts.batch_size must be > 0"));
    }
    if cfg.reposts.caption_batch_size <= 0 {
        return Err(ConfigError::Invalid("reposts.caption_batch_size must be > 0"));
    }

    let r = &cfg.retention;
    let in_range = |days: i64| (0..=MAX_RETENTION_DAYS).contains(&days);
    if !(in_range(r.verification_token_days) && in_range(r.session_days) && in_range(r.article_days)) {
        return Err(ConfigError::Invalid("retention.* days must be between 0 and 36500"));
    }

    Ok(())
}

/// Example configuration carrying the default schedule table.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  database_url: "sqlite://./data/scheduler.db"

# sec min hour day-of-month month day-of-week, UTC
schedule:
  process_due_reposts: "0 * * * * *"
  fetch_articles: "0 */10 * * * *"
  generate_captions: "0 */5 * * * *"
  cleanup_old_data: "0 0 2 * * *"

reposts:
  batch_size: 10
  caption_batch_size: 5
  max_attempts: 0

retention:
  verification_token_days: 1
  session_days: 7
  article_days: 30
"#
}
