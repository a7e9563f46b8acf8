use crate::auth::ldap::LdapAuthConfig;
use crate::auth::sql::SqlAuthConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub mod user_config;

pub use crate::auth::hash::HashType;
pub use user_config::{UserConfig, UserEntry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub authn: AuthnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnConfig {
    /// Abort startup when a backend cannot be created instead of skipping it.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
    #[serde(default)]
    pub backends: Vec<AuthBackendConfig>,
}

fn default_fail_fast() -> bool {
    true
}

/// One configured authenticator. The `type` tag is the backend's name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthBackendConfig {
    #[serde(rename = "postgres")]
    Postgres(SqlAuthConfig),
    #[serde(rename = "mysql")]
    Mysql(SqlAuthConfig),
    #[serde(rename = "sqlite")]
    Sqlite(SqlAuthConfig),
    #[serde(rename = "file")]
    File { path: String },
    #[serde(rename = "ldap")]
    Ldap(LdapAuthConfig),
}

impl AuthBackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            AuthBackendConfig::Postgres(_) => "postgres",
            AuthBackendConfig::Mysql(_) => "mysql",
            AuthBackendConfig::Sqlite(_) => "sqlite",
            AuthBackendConfig::File { .. } => "file",
            AuthBackendConfig::Ldap(_) => "ldap",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub console: bool,
    #[serde(default)]
    pub journald: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
                console: true,
                journald: false,
            },
            authn: AuthnConfig {
                fail_fast: true,
                backends: vec![],
            },
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for backend in &self.authn.backends {
            match backend {
                AuthBackendConfig::Postgres(sql)
                | AuthBackendConfig::Mysql(sql)
                | AuthBackendConfig::Sqlite(sql) => sql.validate()?,
                AuthBackendConfig::File { path } => {
                    if path.is_empty() {
                        return Err(anyhow!("User file path cannot be empty"));
                    }
                }
                AuthBackendConfig::Ldap(ldap) => ldap.validate()?,
            }
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(anyhow!("Invalid log level: {}", self.logging.level));
        }

        Ok(())
    }
}
