use crate::auth::hash::{self, HashType};
use crate::auth::Labels;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Contents of a user file consumed by the file authenticator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Scheme used for newly set passwords. Stored hashes are verified
    /// according to their own format.
    pub hash_type: HashType,
    pub users: HashMap<String, UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub password_hash: String,
    pub created_at: String,
    pub last_modified: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: Labels,
}

fn default_enabled() -> bool {
    true
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            hash_type: HashType::Argon2,
            users: HashMap::new(),
        }
    }
}

impl UserConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UserConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        info!("User configuration loaded successfully");
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (username, user) in &self.users {
            if username.is_empty() {
                return Err(anyhow!("Username cannot be empty"));
            }
            if user.password_hash.is_empty() {
                return Err(anyhow!("Password hash cannot be empty for user: {}", username));
            }
        }
        Ok(())
    }

    pub fn get(&self, username: &str) -> Option<&UserEntry> {
        self.users.get(username)
    }

    pub fn add_user(&mut self, username: String, password: &str) -> Result<()> {
        if username.is_empty() {
            return Err(anyhow!("Username cannot be empty"));
        }
        if self.users.contains_key(&username) {
            return Err(anyhow!("User already exists: {}", username));
        }

        let password_hash = hash::hash_password(self.hash_type, password)?;
        let now = chrono::Utc::now().to_rfc3339();

        let user_entry = UserEntry {
            password_hash,
            created_at: now.clone(),
            last_modified: now,
            enabled: true,
            labels: Labels::new(),
        };

        self.users.insert(username, user_entry);
        Ok(())
    }

    pub fn remove_user(&mut self, username: &str) -> Result<()> {
        self.users
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| anyhow!("User not found: {}", username))
    }

    pub fn update_password(&mut self, username: &str, new_password: &str) -> Result<()> {
        let password_hash = hash::hash_password(self.hash_type, new_password)?;

        let user = self.users.get_mut(username)
            .ok_or_else(|| anyhow!("User not found: {}", username))?;

        user.password_hash = password_hash;
        user.last_modified = chrono::Utc::now().to_rfc3339();

        Ok(())
    }

    pub fn enable_user(&mut self, username: &str, enabled: bool) -> Result<()> {
        let user = self.users.get_mut(username)
            .ok_or_else(|| anyhow!("User not found: {}", username))?;

        user.enabled = enabled;
        user.last_modified = chrono::Utc::now().to_rfc3339();

        Ok(())
    }
}
