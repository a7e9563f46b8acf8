use crate::error::AuthError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

pub mod chain;
pub mod file;
pub mod hash;
pub mod ldap;
pub mod sql;

/// Opaque metadata attached to a successful authentication, consumed by
/// downstream authorization.
pub type Labels = HashMap<String, Vec<String>>;

/// Outcome of a single authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// The credentials were verified.
    Allowed { labels: Labels },
    /// The user is known but the credentials were rejected.
    Denied,
    /// The backend has no record of the user.
    NoMatch,
}

impl AuthResult {
    pub fn allowed() -> Self {
        AuthResult::Allowed { labels: Labels::new() }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthResult::Allowed { .. })
    }

    /// Labels of an allowed result. Denials never carry labels.
    pub fn labels(&self) -> Option<&Labels> {
        match self {
            AuthResult::Allowed { labels } => Some(labels),
            _ => None,
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate a user with a password.
    /// Returns the decision, or Err if the backend could not reach one.
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResult, AuthError>;

    /// Stable identifier used in configuration and diagnostics.
    fn name(&self) -> &str;

    /// Release held resources. Idempotent; later calls to `authenticate`
    /// fail with [`AuthError::Closed`].
    async fn stop(&self);

    /// Like `authenticate`, but gives up with [`AuthError::Cancelled`] once
    /// `cancel` fires. The in-flight lookup is dropped, returning any pooled
    /// connection it held.
    async fn authenticate_cancellable(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<AuthResult, AuthError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AuthError::Cancelled),
            result = self.authenticate(username, password) => result,
        }
    }
}
