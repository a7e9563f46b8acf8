use super::hash;
use super::{AuthResult, Authenticator};
use crate::error::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// Connection and lookup settings of a SQL-backed authenticator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlAuthConfig {
    /// Connection string, e.g. `postgres://auth@localhost/auth`.
    pub url: String,
    /// Column holding the user name.
    pub username: String,
    /// Column holding the password hash.
    pub password: String,
    pub table: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Upper bound in seconds for a single lookup.
    #[serde(default)]
    pub query_timeout: Option<u64>,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

impl SqlAuthConfig {
    pub fn new(url: &str, username: &str, password: &str, table: &str) -> Self {
        Self {
            url: url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            table: table.to_string(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
            query_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        for (field, value) in [
            ("url", &self.url),
            ("username", &self.username),
            ("password", &self.password),
            ("table", &self.table),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::Config(format!("SQL authenticator option '{}' cannot be empty", field)));
            }
        }
        if self.max_connections == 0 {
            return Err(AuthError::Config("max_connections must be greater than 0".to_string()));
        }
        if self.connect_timeout == 0 {
            return Err(AuthError::Config("connect_timeout must be greater than 0".to_string()));
        }
        if self.query_timeout == Some(0) {
            return Err(AuthError::Config("query_timeout must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDriver {
    MySql,
    Postgres,
    Sqlite,
}

impl SqlDriver {
    pub fn name(&self) -> &'static str {
        match self {
            SqlDriver::MySql => "mysql",
            SqlDriver::Postgres => "postgres",
            SqlDriver::Sqlite => "sqlite",
        }
    }

    fn accepts_url(&self, url: &str) -> bool {
        let schemes: &[&str] = match self {
            SqlDriver::MySql => &["mysql:", "mariadb:"],
            SqlDriver::Postgres => &["postgres:", "postgresql:"],
            SqlDriver::Sqlite => &["sqlite:"],
        };
        let url = url.to_lowercase();
        schemes.iter().any(|s| url.starts_with(s))
    }

    /// Pool size for `config`. Every connection to an in-memory SQLite
    /// database opens a fresh empty database, so those get exactly one.
    fn pool_size(&self, config: &SqlAuthConfig) -> u32 {
        match self {
            SqlDriver::Sqlite if is_sqlite_memory(&config.url) => 1,
            _ => config.max_connections,
        }
    }

    fn placeholder(&self) -> &'static str {
        match self {
            SqlDriver::Postgres => "$1",
            SqlDriver::MySql | SqlDriver::Sqlite => "?",
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        match self {
            SqlDriver::MySql => format!("`{}`", ident.replace('`', "``")),
            SqlDriver::Postgres | SqlDriver::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Builds the credential lookup. The user name is always a bound parameter.
    /// `LIMIT 2` is enough to detect a uniqueness violation.
    fn lookup_query(&self, config: &SqlAuthConfig) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {} LIMIT 2",
            config.password,
            self.quote_identifier(&config.table),
            config.username,
            self.placeholder()
        )
    }
}

fn is_sqlite_memory(url: &str) -> bool {
    let url = url.to_lowercase();
    url.contains(":memory:") || url.contains("mode=memory")
}

pub enum DatabaseBackend {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DatabaseBackend {
    async fn fetch_hashes(&self, query: &str, username: &str) -> Result<Vec<String>, sqlx::Error> {
        match self {
            DatabaseBackend::MySql(pool) => {
                sqlx::query_scalar(query)
                    .bind(username)
                    .fetch_all(pool)
                    .await
            }
            DatabaseBackend::Postgres(pool) => {
                sqlx::query_scalar(query)
                    .bind(username)
                    .fetch_all(pool)
                    .await
            }
            DatabaseBackend::Sqlite(pool) => {
                sqlx::query_scalar(query)
                    .bind(username)
                    .fetch_all(pool)
                    .await
            }
        }
    }

    async fn close(&self) {
        match self {
            DatabaseBackend::MySql(pool) => pool.close().await,
            DatabaseBackend::Postgres(pool) => pool.close().await,
            DatabaseBackend::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Checks credentials against a hash column of a relational table.
pub struct SqlAuthenticator {
    driver: SqlDriver,
    backend: DatabaseBackend,
    query: String,
    query_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl SqlAuthenticator {
    pub async fn new(driver: SqlDriver, config: &SqlAuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        if !driver.accepts_url(&config.url) {
            return Err(AuthError::Config(format!(
                "Connection string does not match database type '{}'",
                driver.name()
            )));
        }

        info!("Starting {} authenticator on table '{}'", driver.name(), config.table);

        let acquire_timeout = Duration::from_secs(config.connect_timeout);
        let max_connections = driver.pool_size(config);
        let backend = match driver {
            SqlDriver::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(|e| connection_error("MySQL", e))?;
                DatabaseBackend::MySql(pool)
            }
            SqlDriver::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(|e| connection_error("Postgres", e))?;
                DatabaseBackend::Postgres(pool)
            }
            SqlDriver::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(max_connections)
                    .acquire_timeout(acquire_timeout)
                    .connect(&config.url)
                    .await
                    .map_err(|e| connection_error("SQLite", e))?;
                DatabaseBackend::Sqlite(pool)
            }
        };

        Ok(Self {
            driver,
            backend,
            query: driver.lookup_query(config),
            query_timeout: config.query_timeout.map(Duration::from_secs),
            closed: AtomicBool::new(false),
        })
    }

    async fn lookup(&self, username: &str) -> Result<Vec<String>, AuthError> {
        let fetch = self.backend.fetch_hashes(&self.query, username);
        let rows = match self.query_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch)
                .await
                .map_err(|_| AuthError::Timeout)?,
            None => fetch.await,
        };
        rows.map_err(AuthError::from)
    }
}

fn connection_error(database: &str, err: sqlx::Error) -> AuthError {
    match AuthError::from(err) {
        AuthError::Connection(msg) | AuthError::Query(msg) => {
            AuthError::Connection(format!("Failed to connect to {} database: {}", database, msg))
        }
        AuthError::Timeout => {
            AuthError::Connection(format!("Timed out connecting to {} database", database))
        }
        other => other,
    }
}

#[async_trait]
impl Authenticator for SqlAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AuthError::Closed);
        }

        let mut hashes = match self.lookup(username).await {
            Ok(hashes) => hashes,
            Err(e) => {
                error!("Database query error for user '{}': {}", username, e);
                return Err(e);
            }
        };

        let hash = match hashes.len() {
            0 => {
                debug!("User '{}' not found in database", username);
                return Ok(AuthResult::NoMatch);
            }
            1 => hashes.remove(0),
            n => {
                error!("User '{}' matches {} rows in database", username, n);
                return Err(AuthError::Query(format!("User name '{}' is not unique", username)));
            }
        };

        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || hash::verify_password(&password, &hash)).await?;

        if verified {
            Ok(AuthResult::allowed())
        } else {
            debug!("Password verification failed for user '{}'", username);
            Ok(AuthResult::Denied)
        }
    }

    fn name(&self) -> &str {
        self.driver.name()
    }

    async fn stop(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Stopping {} authenticator", self.driver.name());
        }
        self.backend.close().await;
    }
}
