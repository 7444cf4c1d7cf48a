//! Configuration management for the stock ledger and alerting engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with STOCKFLOW_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::validate_email;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Health listener configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Stock ledger defaults
    pub ledger: LedgerConfig,

    /// Purchase order settings
    pub orders: OrdersConfig,

    /// Alert notification settings
    pub alerts: AlertsConfig,

    /// Periodic job settings
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Reorder point of lazily created stock lines
    pub default_reorder_point: i64,

    /// Max stock level of lazily created stock lines (0 = unlimited)
    pub default_max_stock_level: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrdersConfig {
    /// Attempts at claiming a fresh order number before giving up
    pub number_retry_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    /// Recipients of email notifications
    pub email_recipients: Vec<String>,

    /// Recipient label used for dashboard notifications
    pub dashboard_recipient: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// Seconds between rule evaluation sweeps
    pub evaluation_interval_secs: u64,

    /// Seconds between notification dispatch runs
    pub dispatch_interval_secs: u64,

    /// Pending notifications handed to the sender per run
    pub dispatch_batch_size: i64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("STOCKFLOW_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("ledger.default_reorder_point", 10)?
            .set_default("ledger.default_max_stock_level", 0)?
            .set_default("orders.number_retry_attempts", 5)?
            .set_default("alerts.email_recipients", Vec::<String>::new())?
            .set_default("alerts.dashboard_recipient", "dashboard")?
            .set_default("scheduler.evaluation_interval_secs", 300)?
            .set_default("scheduler.dispatch_interval_secs", 60)?
            .set_default("scheduler.dispatch_batch_size", 100)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (STOCKFLOW_ prefix)
            .add_source(
                Environment::with_prefix("STOCKFLOW")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("alerts.email_recipients")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.alerts.validate()?;
        Ok(config)
    }
}

impl AlertsConfig {
    /// Reject recipient addresses the email sender could never deliver to
    pub fn validate(&self) -> Result<(), ConfigError> {
        for recipient in &self.email_recipients {
            validate_email(recipient).map_err(|e| {
                ConfigError::Message(format!("alerts.email_recipients: {e}: {recipient:?}"))
            })?;
        }
        Ok(())
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_reorder_point: 10,
            default_max_stock_level: 0,
        }
    }
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            number_retry_attempts: 5,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            email_recipients: Vec::new(),
            dashboard_recipient: "dashboard".to_string(),
        }
    }
}
