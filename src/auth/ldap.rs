use super::{AuthResult, Authenticator, Labels};
use crate::error::AuthError;
use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info};

/// LDAP result code for rejected credentials.
const INVALID_CREDENTIALS: u32 = 49;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapAuthConfig {
    pub url: String,
    pub base_dn: String,
    #[serde(default)]
    pub bind_dn: Option<String>,
    #[serde(default)]
    pub bind_password: Option<String>,
    /// Search filter, `{}` is replaced by the escaped user name.
    pub user_filter: String,
    /// Label name to directory attribute copied into the labels of an allowed user.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    5
}

impl LdapAuthConfig {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.url.is_empty() {
            return Err(AuthError::Config("LDAP url cannot be empty".to_string()));
        }
        if self.base_dn.is_empty() {
            return Err(AuthError::Config("LDAP base_dn cannot be empty".to_string()));
        }
        if !self.user_filter.contains("{}") {
            return Err(AuthError::Config("LDAP user_filter must contain a {} placeholder".to_string()));
        }
        Ok(())
    }
}

pub struct LdapAuthenticator {
    config: LdapAuthConfig,
    closed: AtomicBool,
}

impl LdapAuthenticator {
    pub fn new(config: LdapAuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        info!("Starting LDAP authenticator for {}", config.url);
        Ok(Self {
            config,
            closed: AtomicBool::new(false),
        })
    }

    fn escape_filter_value(value: &str) -> String {
        value.replace('\\', "\\5c")
             .replace('*', "\\2a")
             .replace('(', "\\28")
             .replace(')', "\\29")
             .replace('\0', "\\00")
    }

    fn user_filter(&self, username: &str) -> String {
        self.config.user_filter.replace("{}", &Self::escape_filter_value(username))
    }

    fn search_attributes(&self) -> Vec<String> {
        let mut attrs: Vec<String> = self.config.labels.values().cloned().collect();
        if attrs.is_empty() {
            // "1.1" requests no attributes at all
            attrs.push("1.1".to_string());
        }
        attrs
    }

    fn labels_from(&self, entry: &SearchEntry) -> Labels {
        self.config
            .labels
            .iter()
            .filter_map(|(label, attr)| {
                entry.attrs.get(attr).map(|values| (label.clone(), values.clone()))
            })
            .collect()
    }

    async fn connect(&self) -> Result<Ldap, AuthError> {
        let settings = LdapConnSettings::new().set_conn_timeout(Duration::from_secs(self.config.timeout));
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.config.url)
            .await
            .map_err(|e| AuthError::Connection(format!("Failed to connect to LDAP server: {}", e)))?;

        ldap3::drive!(conn);

        let bind_dn = self.config.bind_dn.as_deref().unwrap_or("");
        let bind_pw = self.config.bind_password.as_deref().unwrap_or("");
        ldap.simple_bind(bind_dn, bind_pw)
            .await
            .map_err(|e| AuthError::Connection(format!("LDAP bind failed: {}", e)))?
            .success()
            .map_err(|e| AuthError::Connection(format!("LDAP bind error: {}", e)))?;

        Ok(ldap)
    }

    async fn verify(&self, ldap: &mut Ldap, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        let filter = self.user_filter(username);
        let (mut rs, _res) = ldap
            .search(&self.config.base_dn, Scope::Subtree, &filter, self.search_attributes())
            .await
            .map_err(|e| AuthError::Query(format!("LDAP search failed: {}", e)))?
            .success()
            .map_err(|e| AuthError::Query(format!("LDAP search error: {}", e)))?;

        let entry = match rs.len() {
            0 => {
                debug!("LDAP user not found: {}", username);
                return Ok(AuthResult::NoMatch);
            }
            1 => SearchEntry::construct(rs.remove(0)),
            n => {
                error!("LDAP user ambiguous ({} matches): {}", n, username);
                return Err(AuthError::Query(format!("LDAP user '{}' is not unique", username)));
            }
        };
        debug!("Found LDAP user DN: {}", entry.dn);

        let res = ldap
            .simple_bind(&entry.dn, password)
            .await
            .map_err(|e| AuthError::Connection(format!("LDAP bind failed: {}", e)))?;

        match res.rc {
            0 => Ok(AuthResult::Allowed { labels: self.labels_from(&entry) }),
            INVALID_CREDENTIALS => {
                debug!("LDAP password verification failed for {}", username);
                Ok(AuthResult::Denied)
            }
            rc => Err(AuthError::Query(format!("LDAP bind error: rc={} {}", rc, res.text))),
        }
    }
}

#[async_trait]
impl Authenticator for LdapAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<AuthResult, AuthError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AuthError::Closed);
        }

        // An empty password would turn the verifying bind into an
        // unauthenticated bind, which servers accept.
        if password.is_empty() {
            return Ok(AuthResult::Denied);
        }

        let mut ldap = self.connect().await.map_err(|e| {
            error!("LDAP connection error for user '{}': {}", username, e);
            e
        })?;

        let result = self.verify(&mut ldap, username, password).await;
        if let Err(e) = ldap.unbind().await {
            debug!("LDAP unbind failed: {}", e);
        }
        result
    }

    fn name(&self) -> &str {
        "ldap"
    }

    async fn stop(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
