use super::hash;
use super::{AuthResult, Authenticator};
use crate::config::UserConfig;
use crate::error::AuthError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Authenticates against users listed in a YAML user file.
pub struct FileAuthenticator {
    user_config: UserConfig,
    closed: AtomicBool,
}

impl FileAuthenticator {
    pub fn new(user_config: UserConfig) -> Self {
        Self {
            user_config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let path = path.as_ref();
        let user_config = UserConfig::load_from_file(path)
            .map_err(|e| AuthError::Config(format!("Failed to load user file {}: {}", path.display(), e)))?;
        info!("Loaded {} users from {}", user_config.users.len(), path.display());
        Ok(Self::new(user_config))
    }
}

#[async_trait]
impl Authenticator for FileAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AuthError::Closed);
        }

        let Some(entry) = self.user_config.get(username) else {
            debug!("User '{}' not found in user file", username);
            return Ok(AuthResult::NoMatch);
        };

        if !entry.enabled {
            debug!("User '{}' is disabled", username);
            return Ok(AuthResult::Denied);
        }

        let password = password.to_string();
        let stored = entry.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || hash::verify_password(&password, &stored)).await?;

        if verified {
            Ok(AuthResult::Allowed { labels: entry.labels.clone() })
        } else {
            debug!("Password verification failed for user '{}'", username);
            Ok(AuthResult::Denied)
        }
    }

    fn name(&self) -> &str {
        "file"
    }

    async fn stop(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
