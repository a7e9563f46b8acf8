use thiserror::Error;

/// Errors an authenticator reports to its caller.
///
/// A wrong password is not an error: it is reported as a denied
/// [`AuthResult`](crate::auth::AuthResult).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid authenticator configuration: {0}")]
    Config(String),

    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("authenticator has been stopped")]
    Closed,

    #[error("authentication timed out")]
    Timeout,

    #[error("authentication cancelled")]
    Cancelled,

    #[error("internal authenticator error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed => AuthError::Closed,
            sqlx::Error::PoolTimedOut => AuthError::Timeout,
            sqlx::Error::Configuration(e) => AuthError::Connection(format!("invalid connection string: {}", e)),
            sqlx::Error::Io(e) => AuthError::Connection(e.to_string()),
            sqlx::Error::Tls(e) => AuthError::Connection(format!("TLS error: {}", e)),
            sqlx::Error::Protocol(e) => AuthError::Connection(format!("protocol error: {}", e)),
            sqlx::Error::WorkerCrashed => AuthError::Connection("database worker crashed".to_string()),
            other => AuthError::Query(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::Internal(format!("verification task failed: {}", err))
    }
}
