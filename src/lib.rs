pub mod cache;
pub mod config;
pub mod db;
pub mod logging;
pub mod scheduling;
pub mod services;

use crate::cache::StatsCache;
use crate::config::Config;
use crate::db::{Database, DbInitError};

/// Handles shared by every service call.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub cache: StatsCache,
}

impl AppState {
    pub async fn from_config(config: Config) -> Result<Self, DbInitError> {
        let db = Database::open(&config.database_path).await?;
        let cache = StatsCache::from_config(&config).await;
        Ok(Self { config, db, cache })
    }
}
