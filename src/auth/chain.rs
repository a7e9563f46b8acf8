use super::file::FileAuthenticator;
use super::ldap::LdapAuthenticator;
use super::sql::{SqlAuthenticator, SqlDriver};
use super::{AuthResult, Authenticator};
use crate::config::{AuthBackendConfig, AuthnConfig};
use crate::error::AuthError;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Builds the authenticator selected by a backend configuration entry.
pub async fn create_authenticator(config: &AuthBackendConfig) -> Result<Arc<dyn Authenticator>, AuthError> {
    let authenticator: Arc<dyn Authenticator> = match config {
        AuthBackendConfig::Postgres(sql) => Arc::new(SqlAuthenticator::new(SqlDriver::Postgres, sql).await?),
        AuthBackendConfig::Mysql(sql) => Arc::new(SqlAuthenticator::new(SqlDriver::MySql, sql).await?),
        AuthBackendConfig::Sqlite(sql) => Arc::new(SqlAuthenticator::new(SqlDriver::Sqlite, sql).await?),
        AuthBackendConfig::File { path } => Arc::new(FileAuthenticator::load_from_file(path)?),
        AuthBackendConfig::Ldap(ldap) => Arc::new(LdapAuthenticator::new(ldap.clone())?),
    };
    Ok(authenticator)
}

/// Ordered set of authenticators consulted one after another.
///
/// A backend that does not know the user passes the request on; the first
/// backend that knows the user decides. Errors stop the walk.
pub struct Authenticators {
    backends: Vec<Arc<dyn Authenticator>>,
}

impl Authenticators {
    pub fn new(backends: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { backends }
    }

    pub async fn from_config(config: &AuthnConfig) -> Result<Self, AuthError> {
        let mut backends = Vec::with_capacity(config.backends.len());

        for backend in &config.backends {
            match create_authenticator(backend).await {
                Ok(authenticator) => {
                    info!("Authenticator '{}' ready", authenticator.name());
                    backends.push(authenticator);
                }
                Err(e) if config.fail_fast => {
                    error!("Failed to start '{}' authenticator: {}", backend.name(), e);
                    let started = Self::new(backends);
                    started.stop().await;
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping '{}' authenticator: {}", backend.name(), e);
                }
            }
        }

        if backends.is_empty() {
            warn!("No authenticators configured, every request will be rejected");
        }

        Ok(Self::new(backends))
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        for backend in &self.backends {
            match backend.authenticate(username, password).await {
                Ok(AuthResult::NoMatch) => {
                    debug!("'{}' has no match for user '{}'", backend.name(), username);
                }
                Ok(result) => {
                    debug!("'{}' decided for user '{}': allowed={}", backend.name(), username, result.is_allowed());
                    return Ok(result);
                }
                Err(e) => {
                    error!("'{}' failed to authenticate user '{}': {}", backend.name(), username, e);
                    return Err(e);
                }
            }
        }
        Ok(AuthResult::NoMatch)
    }

    /// Stops every backend. Safe to call more than once.
    pub async fn stop(&self) {
        join_all(self.backends.iter().map(|b| b.stop())).await;
    }
}
