//! Password hashing and verification using Argon2id
//!
//! Implements credential hashing following OWASP recommendations:
//! - Algorithm: Argon2id (memory-hard, resistant to GPU attacks)
//! - Memory: 64 MB, Iterations: 3, Parallelism: 4 (configurable)
//! - Salt: 16 bytes random, embedded in the PHC output string
//!
//! Hashing is deliberately expensive. Async callers go through
//! [`hash_off_thread`] and [`verify_off_thread`], which run on tokio's
//! blocking pool.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString,
    },
    Argon2, Params,
};
use std::sync::Arc;
use thiserror::Error;
use tsp_core::PasswordHashConfig;

/// Password hashing and verification errors
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Failed to verify password: {0}")]
    VerificationFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,
}

/// One-way password hash with verification
pub trait PasswordHasher: Send + Sync {
    /// Hash `password` with a fresh random salt
    fn hash(&self, password: &str) -> Result<String, PasswordError>;

    /// Check `password` against a stored hash
    ///
    /// Returns `Ok(false)` on mismatch. Comparison is constant-time.
    fn verify(&self, hash: &str, password: &str) -> Result<bool, PasswordError>;
}

/// Argon2id implementation of [`PasswordHasher`]
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// Create a hasher from configured cost parameters
    pub fn new(config: &PasswordHashConfig) -> Result<Self, PasswordError> {
        let params = Params::new(
            config.memory_kib,
            config.iterations,
            config.parallelism,
            Some(32),
        )
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            self.params.clone(),
        )
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

        Ok(password_hash.to_string())
    }

    fn verify(&self, hash: &str, password: &str) -> Result<bool, PasswordError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|_| PasswordError::InvalidHashFormat)?;

        // Parameters come from the PHC string, not from self.params
        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
        }
    }
}

/// Hash on the blocking pool so request tasks are not stalled
pub async fn hash_off_thread(
    hasher: Arc<dyn PasswordHasher>,
    password: String,
) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?
}

/// Verify on the blocking pool so request tasks are not stalled
pub async fn verify_off_thread(
    hasher: Arc<dyn PasswordHasher>,
    hash: String,
    password: String,
) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || hasher.verify(&hash, &password))
        .await
        .map_err(|e| PasswordError::VerificationFailed(e.to_string()))?
}
