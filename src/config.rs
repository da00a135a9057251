use std::path::PathBuf;
use std::time::Duration;

use crate::db::default_db_path;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub log_level: String,
    /// Directory for daily-rolling log files; `None` keeps logs on stderr only.
    pub log_dir: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub stats_cache_ttl: Duration,
    pub due_cards_max_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            log_level: "info".to_string(),
            log_dir: None,
            redis_url: None,
            stats_cache_ttl: Duration::from_secs(300),
            due_cards_max_limit: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_path = std::env::var("DATABASE_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);

        let log_level = std::env::var("RUST_LOG").unwrap_or(defaults.log_level);

        let log_dir = env_flag("ENABLE_FILE_LOGS").then(|| {
            std::env::var("LOG_DIR")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs"))
        });

        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let stats_cache_ttl = std::env::var("STATS_CACHE_TTL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.stats_cache_ttl);

        let due_cards_max_limit = std::env::var("DUE_CARDS_MAX_LIMIT")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(defaults.due_cards_max_limit);

        Self {
            database_path,
            log_level,
            log_dir,
            redis_url,
            stats_cache_ttl,
            due_cards_max_limit,
        }
    }

    /// Caps a caller-supplied queue size.
    pub fn clamp_due_limit(&self, requested: u32) -> u32 {
        requested.min(self.due_cards_max_limit)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
