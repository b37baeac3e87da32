//! Database settings loaded from environment variables.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sea_orm::ConnectOptions;

use super::constants::{
    DEFAULT_DB_HOST, DEFAULT_DB_TYPE, ENV_DB_CONNECT_TIMEOUT_SECS, ENV_DB_HOST,
    ENV_DB_MAX_CONNECTIONS, ENV_DB_MIN_CONNECTIONS, ENV_DB_NAME, ENV_DB_PASSWORD, ENV_DB_PORT,
    ENV_DB_SQL_LOGGING, ENV_DB_TYPE, ENV_DB_USER, SQLITE_MEMORY_NAME,
};
use crate::errors::{DataError, DataResult};

/// Supported database kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Postgres,
    MySql,
    Sqlite,
}

impl DbKind {
    /// Canonical name, as accepted in `DB_TYPE`
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Postgres => "postgresql",
            DbKind::MySql => "mysql",
            DbKind::Sqlite => "sqlite",
        }
    }

    /// Port used when `DB_PORT` is not set
    pub fn default_port(&self) -> u16 {
        match self {
            DbKind::Postgres => 5432,
            DbKind::MySql => 3306,
            DbKind::Sqlite => 0,
        }
    }
}

impl FromStr for DbKind {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(DbKind::Postgres),
            "mysql" => Ok(DbKind::MySql),
            "sqlite" => Ok(DbKind::Sqlite),
            other => Err(DataError::configuration(format!(
                "Unsupported database type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub kind: DbKind,
    pub user: String,
    password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("kind", &self.kind)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .finish()
    }
}

impl DatabaseConfig {
    /// Build a configuration for a server-backed database.
    pub fn new(
        kind: DbKind,
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port,
            name: name.into(),
        }
    }

    /// Configuration for a sqlite file, or `:memory:`.
    pub fn sqlite(name: impl Into<String>) -> Self {
        Self::new(DbKind::Sqlite, "", "", "", 0, name)
    }

    /// Load configuration from environment variables.
    ///
    /// Fails with `DataError::Configuration` when `DB_TYPE` names an
    /// unsupported database or `DB_PORT` is not a port number.
    pub fn from_env() -> DataResult<Self> {
        dotenvy::dotenv().ok();

        let kind: DbKind = env::var(ENV_DB_TYPE)
            .unwrap_or_else(|_| DEFAULT_DB_TYPE.to_string())
            .parse()?;

        let port = match env::var(ENV_DB_PORT) {
            Ok(raw) => raw.trim().parse::<u16>().map_err(|_| {
                DataError::configuration(format!("{} is not a valid port: {}", ENV_DB_PORT, raw))
            })?,
            Err(_) => kind.default_port(),
        };

        Ok(Self {
            kind,
            user: env::var(ENV_DB_USER).unwrap_or_default(),
            password: env::var(ENV_DB_PASSWORD).unwrap_or_default(),
            host: env::var(ENV_DB_HOST).unwrap_or_else(|_| DEFAULT_DB_HOST.to_string()),
            port,
            name: env::var(ENV_DB_NAME).unwrap_or_default(),
        })
    }

    /// Assemble the connection URL understood by the engine.
    pub fn connection_url(&self) -> String {
        self.url_with_password(&urlencoding::encode(&self.password))
    }

    /// Connection URL with the password masked, for display and logs.
    pub fn redacted_url(&self) -> String {
        if self.password.is_empty() {
            self.connection_url()
        } else {
            self.url_with_password("***")
        }
    }

    fn url_with_password(&self, password: &str) -> String {
        match self.kind {
            DbKind::Postgres => format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, password, self.host, self.port, self.name
            ),
            DbKind::MySql => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.user, password, self.host, self.port, self.name
            ),
            DbKind::Sqlite => {
                if self.name.is_empty() || self.name == SQLITE_MEMORY_NAME {
                    "sqlite::memory:".to_string()
                } else {
                    format!("sqlite://{}?mode=rwc", self.name)
                }
            }
        }
    }
}

/// Options handed to the engine factory together with the connection URL
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout: Option<Duration>,
    pub sql_logging: bool,
}

impl EngineOptions {
    /// Load engine options from environment variables; unset or unparsable
    /// values fall back to the engine defaults.
    pub fn from_env() -> Self {
        fn parsed<T: FromStr>(key: &str) -> Option<T> {
            env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        Self {
            max_connections: parsed(ENV_DB_MAX_CONNECTIONS),
            min_connections: parsed(ENV_DB_MIN_CONNECTIONS),
            connect_timeout: parsed::<u64>(ENV_DB_CONNECT_TIMEOUT_SECS).map(Duration::from_secs),
            sql_logging: parsed(ENV_DB_SQL_LOGGING).unwrap_or(false),
        }
    }

    pub fn max_connections(mut self, value: u32) -> Self {
        self.max_connections = Some(value);
        self
    }

    pub fn min_connections(mut self, value: u32) -> Self {
        self.min_connections = Some(value);
        self
    }

    pub fn connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = Some(value);
        self
    }

    pub fn sql_logging(mut self, enabled: bool) -> Self {
        self.sql_logging = enabled;
        self
    }

    /// Translate into SeaORM connect options for `url`.
    pub fn to_connect_options(&self, url: impl Into<String>) -> ConnectOptions {
        let mut options = ConnectOptions::new(url.into());
        if let Some(max) = self.max_connections {
            options.max_connections(max);
        }
        if let Some(min) = self.min_connections {
            options.min_connections(min);
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout(timeout);
        }
        options.sqlx_logging(self.sql_logging);
        options
    }
}
