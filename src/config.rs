use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

/// Connection settings for the departures database, read from the
/// environment once at startup and passed around explicitly.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub sync: SyncConfig,
}

/// Tuning for the liveboard polling loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Lookahead window covered by one sync run, in minutes (default: 120)
    pub window_minutes: i64,
    /// Offset between successive liveboard queries, in minutes (default: 15)
    pub step_minutes: i64,
    /// Courtesy pause between liveboard requests (default: 250 ms)
    pub request_pause: Duration,
    /// TCP connect timeout for liveboard requests (default: 5 s)
    pub connect_timeout: Duration,
    /// Overall timeout for a single liveboard request (default: 15 s)
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_minutes: 120,
            step_minutes: 15,
            request_pause: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl Config {
    /// Read and validate the configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server = require(&lookup, "SQL_SERVER")?;
        let database = require(&lookup, "SQL_DATABASE")?;
        let user = require(&lookup, "SQL_USER")?;
        let password = require(&lookup, "SQL_PASSWORD")?;

        let port = match lookup("SQL_PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
                name: "SQL_PORT",
                value: raw,
            })?,
            None => 5432,
        };

        Ok(Self {
            server,
            port,
            database,
            user,
            password,
            sync: SyncConfig::default(),
        })
    }

    /// Connection options for the departures database. Encryption is
    /// required, server certificates are not verified.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.server)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .password(&self.password)
            .ssl_mode(PgSslMode::Require)
    }
}

fn require(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}
