//! PostgreSQL connection configuration.

use std::time::Duration;

use crate::error::{PgError, PgResult};

/// Application name reported in `pg_stat_activity`.
pub const DEFAULT_APPLICATION_NAME: &str = "keel";

/// PostgreSQL connection configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PgConfig {
    /// Database URL as given.
    pub url: String,
    pub host: String,
    /// Port (default: 5432).
    pub port: u16,
    /// Database name.
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub ssl_mode: SslMode,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// `statement_timeout` of every session.
    pub statement_timeout: Option<Duration>,
    /// `lock_timeout` of every session. Bounds how long DDL waits for table locks.
    pub lock_timeout: Option<Duration>,
    pub application_name: String,
    /// Unrecognized query parameters, passed through as session options.
    pub options: Vec<(String, String)>,
}

/// SSL mode for connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    /// Prefer SSL but allow non-SSL.
    #[default]
    Prefer,
    Require,
}

impl PgConfig {
    /// Parse a `postgres://` or `postgresql://` URL.
    ///
    /// Recognized query parameters: `sslmode`, `connect_timeout` (seconds),
    /// `statement_timeout` and `lock_timeout` (milliseconds) and
    /// `application_name`.
    pub fn from_url(url: impl Into<String>) -> PgResult<Self> {
        let url = url.into();
        let parsed =
            url::Url::parse(&url).map_err(|e| PgError::config(format!("invalid database URL: {e}")))?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(PgError::config(format!(
                "invalid scheme: expected 'postgresql' or 'postgres', got '{}'",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| PgError::config("missing host in URL"))?
            .to_string();
        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(PgError::config("missing database name in URL"));
        }
        let user = match parsed.username() {
            "" => "postgres".to_string(),
            user => user.to_string(),
        };

        let mut config = Self {
            host,
            port: parsed.port().unwrap_or(5432),
            database,
            user,
            password: parsed.password().map(String::from),
            ssl_mode: SslMode::default(),
            connect_timeout: Duration::from_secs(30),
            statement_timeout: None,
            lock_timeout: None,
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            options: Vec::new(),
            url: String::new(),
        };

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "sslmode" => {
                    config.ssl_mode = match value.as_ref() {
                        "disable" => SslMode::Disable,
                        "prefer" => SslMode::Prefer,
                        "require" => SslMode::Require,
                        other => return Err(PgError::config(format!("invalid sslmode: {other}"))),
                    };
                }
                "connect_timeout" => {
                    config.connect_timeout = Duration::from_secs(parse_number(&key, &value)?);
                }
                "statement_timeout" => {
                    config.statement_timeout = Some(Duration::from_millis(parse_number(&key, &value)?));
                }
                "lock_timeout" => {
                    config.lock_timeout = Some(Duration::from_millis(parse_number(&key, &value)?));
                }
                "application_name" => config.application_name = value.to_string(),
                _ => config.options.push((key.to_string(), value.to_string())),
            }
        }

        config.url = url;
        Ok(config)
    }

    /// Set the session `lock_timeout`.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Set the session `statement_timeout`.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// The `-c name=value` startup options of a session.
    pub fn session_options(&self) -> String {
        let mut options: Vec<String> = Vec::new();
        if let Some(timeout) = self.statement_timeout {
            options.push(format!("-c statement_timeout={}", timeout.as_millis()));
        }
        if let Some(timeout) = self.lock_timeout {
            options.push(format!("-c lock_timeout={}", timeout.as_millis()));
        }
        for (key, value) in &self.options {
            options.push(format!("-c {key}={value}"));
        }
        options.join(" ")
    }

    /// Convert to tokio-postgres config.
    pub fn to_pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.dbname(&self.database);
        config.user(&self.user);
        if let Some(password) = &self.password {
            config.password(password);
        }
        config.application_name(&self.application_name);
        config.connect_timeout(self.connect_timeout);
        config.ssl_mode(match self.ssl_mode {
            SslMode::Disable => tokio_postgres::config::SslMode::Disable,
            SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
            SslMode::Require => tokio_postgres::config::SslMode::Require,
        });

        let options = self.session_options();
        if !options.is_empty() {
            config.options(&options);
        }
        config
    }
}

fn parse_number(key: &str, value: &str) -> PgResult<u64> {
    value
        .parse()
        .map_err(|_| PgError::config(format!("invalid {key}: {value}")))
}
