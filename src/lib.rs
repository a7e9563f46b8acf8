pub mod auth;
pub mod config;
pub mod error;

pub use auth::chain::Authenticators;
pub use auth::{AuthResult, Authenticator, Labels};
pub use config::Config;
pub use error::AuthError;
