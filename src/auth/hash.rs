use crate::error::AuthError;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use scrypt::Scrypt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Password hashing schemes understood by the verification routine.
///
/// Stored hashes are self-describing, so the scheme is detected from the
/// hash itself when verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashType {
    #[serde(rename = "argon2")]
    Argon2,
    #[serde(rename = "bcrypt")]
    Bcrypt,
    #[serde(rename = "scrypt")]
    Scrypt,
    #[serde(rename = "sha256-crypt")]
    Sha256Crypt,
    #[serde(rename = "sha512-crypt")]
    Sha512Crypt,
}

impl HashType {
    pub fn detect(hash: &str) -> Option<Self> {
        if hash.starts_with("$argon2") {
            Some(HashType::Argon2)
        } else if ["$2a$", "$2b$", "$2x$", "$2y$"].iter().any(|p| hash.starts_with(p)) {
            Some(HashType::Bcrypt)
        } else if hash.starts_with("$scrypt$") {
            Some(HashType::Scrypt)
        } else if hash.starts_with("$5$") {
            Some(HashType::Sha256Crypt)
        } else if hash.starts_with("$6$") {
            Some(HashType::Sha512Crypt)
        } else {
            None
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashType::Argon2 => "argon2",
            HashType::Bcrypt => "bcrypt",
            HashType::Scrypt => "scrypt",
            HashType::Sha256Crypt => "sha256-crypt",
            HashType::Sha512Crypt => "sha512-crypt",
        };
        f.write_str(name)
    }
}

impl FromStr for HashType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "argon2" => Ok(HashType::Argon2),
            "bcrypt" => Ok(HashType::Bcrypt),
            "scrypt" => Ok(HashType::Scrypt),
            "sha256-crypt" => Ok(HashType::Sha256Crypt),
            "sha512-crypt" => Ok(HashType::Sha512Crypt),
            _ => Err(AuthError::Config(format!("Unsupported hash type: {}", s))),
        }
    }
}

/// Check `password` against a stored hash. Unrecognized hash formats never verify.
///
/// This is CPU-bound by design of the schemes; async callers should run it
/// on the blocking pool.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match HashType::detect(hash) {
        Some(HashType::Argon2) => verify_argon2(password, hash),
        Some(HashType::Bcrypt) => verify_bcrypt(password, hash),
        Some(HashType::Scrypt) => verify_scrypt(password, hash),
        Some(HashType::Sha256Crypt) => pwhash::sha256_crypt::verify(password, hash),
        Some(HashType::Sha512Crypt) => pwhash::sha512_crypt::verify(password, hash),
        None => {
            debug!("Stored password hash has an unrecognized format");
            false
        }
    }
}

/// Produce a new salted hash of `password` with the given scheme.
pub fn hash_password(hash_type: HashType, password: &str) -> Result<String, AuthError> {
    match hash_type {
        HashType::Argon2 => {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))
        }
        HashType::Bcrypt => bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e))),
        HashType::Scrypt => {
            let salt = SaltString::generate(&mut OsRng);
            Scrypt
                .hash_password(password.as_bytes(), &salt)
                .map(|h| h.to_string())
                .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))
        }
        HashType::Sha256Crypt => pwhash::sha256_crypt::hash(password)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e))),
        HashType::Sha512Crypt => pwhash::sha512_crypt::hash(password)
            .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e))),
    }
}

fn verify_argon2(password: &str, hash: &str) -> bool {
    if let Ok(parsed_hash) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_ok()
    } else {
        false
    }
}

fn verify_bcrypt(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

fn verify_scrypt(password: &str, hash: &str) -> bool {
    if let Ok(parsed_hash) = PasswordHash::new(hash) {
        Scrypt.verify_password(password.as_bytes(), &parsed_hash).is_ok()
    } else {
        false
    }
}
