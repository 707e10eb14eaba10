//! TSP Core - Domain models, configuration and shared errors
//!
//! This crate defines the abstractions used by the API server:
//! - User identity and role models
//! - Configuration management
//! - Common error types

pub mod config;
pub mod user;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, PasswordHashConfig,
    Secret, ServerConfig, TokenTransport,
};
pub use user::{AuthenticatedUser, Identity, Role, User, UserRole};

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown role: {0}")]
    UnknownRole(String),
}
