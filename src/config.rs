use serde::Deserialize;
use std::time::Duration;

use crate::accrual::ReconcilerConfig;
use crate::error::{AppError, AppResult};

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// HTTP listen address
    pub run_address: String,
    /// Postgres connection string. Without it the ledger lives in memory.
    pub database_uri: Option<String>,
    pub database_max_connections: u32,
    /// Base URL of the accrual service
    pub accrual_system_address: String,
    pub accrual_poll_interval_secs: u64,
    pub accrual_queue_capacity: usize,
    pub accrual_max_concurrency: usize,
    pub accrual_request_timeout_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::load(::config::Environment::default())
    }

    fn load(env: ::config::Environment) -> AppResult<Self> {
        let settings = ::config::Config::builder()
            .set_default("run_address", "0.0.0.0:8080")?
            .set_default("database_max_connections", 10)?
            .set_default("accrual_system_address", "http://localhost:8081")?
            .set_default("accrual_poll_interval_secs", 15)?
            .set_default("accrual_queue_capacity", 10)?
            .set_default("accrual_max_concurrency", 16)?
            .set_default("accrual_request_timeout_ms", 5000)?
            .set_default("shutdown_grace_secs", 5)?
            .add_source(env.try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> AppResult<()> {
        let zeroes = [
            ("ACCRUAL_POLL_INTERVAL_SECS", self.accrual_poll_interval_secs == 0),
            ("ACCRUAL_QUEUE_CAPACITY", self.accrual_queue_capacity == 0),
            ("ACCRUAL_MAX_CONCURRENCY", self.accrual_max_concurrency == 0),
            ("ACCRUAL_REQUEST_TIMEOUT_MS", self.accrual_request_timeout_ms == 0),
            ("DATABASE_MAX_CONNECTIONS", self.database_max_connections == 0),
        ];

        if let Some((key, _)) = zeroes.iter().find(|(_, zero)| *zero) {
            return Err(AppError::Config(format!("{} must be greater than zero", key)));
        }

        if self.database_uri.as_deref().map_or(false, |uri| uri.trim().is_empty()) {
            return Err(AppError::Config("DATABASE_URI is set but empty".to_string()));
        }

        Ok(())
    }

    pub fn accrual_request_timeout(&self) -> Duration {
        Duration::from_millis(self.accrual_request_timeout_ms)
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_secs(self.accrual_poll_interval_secs),
            queue_capacity: self.accrual_queue_capacity,
            max_concurrent_lookups: self.accrual_max_concurrency,
            lookup_timeout: self.accrual_request_timeout(),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }
}
