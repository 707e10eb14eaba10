//! Application state management

use crate::auth::jwt::TokenCodec;
use crate::auth::password::{PasswordError, PasswordHasher};
use crate::auth::repository::UserStore;
use crate::auth::service::AuthService;
use crate::auth::session::SessionResolver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tsp_core::config::{AppConfig, ConfigError};
use tsp_core::TokenTransport;

/// Errors building the application state
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// User account storage
    pub store: Arc<dyn UserStore>,
    /// Session token codec, keyed once at startup
    pub codec: TokenCodec,
    /// Signup/login orchestration
    pub auth: AuthService,
    /// Per-request session resolution
    pub resolver: SessionResolver,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Build state from a validated configuration
    ///
    /// Fails if the configuration is invalid, most notably when no signing
    /// key is set.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Result<Self, StateError> {
        config.validate()?;

        let secret = config
            .auth
            .jwt_secret
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("JWT_SECRET_KEY".to_string()))?;
        let codec = TokenCodec::from_secret(secret);

        let token_ttl = config.auth.token_ttl()?;
        let auth = AuthService::new(store.clone(), hasher, codec.clone(), token_ttl)?;

        let resolver = SessionResolver::new(
            store.clone(),
            codec.clone(),
            Duration::from_millis(config.auth.resolve_timeout_ms),
        );

        Ok(Self {
            config,
            store,
            codec,
            auth,
            resolver,
            start_time: Instant::now(),
        })
    }

    pub fn transport(&self) -> TokenTransport {
        self.config.auth.transport
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
