//! TSP Configuration Management
//!
//! Handles configuration from environment variables and TOML config files,
//! with sensible defaults for development. The token signing key has no
//! default: a server without `JWT_SECRET_KEY` refuses to start.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Longest session token lifetime accepted, one week
pub const MAX_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database connection
    pub database: DatabaseConfig,

    /// Session tokens and password hashing
    pub auth: AuthConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply every recognised variable returned by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_value("API_PORT", port)?;
        }

        // Database: a full URL wins over the individual parts
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(Secret::new(url));
        } else if let Some(url) = DatabaseConfig::url_from_parts(&lookup)? {
            self.database.url = Some(url);
        }
        if let Some(size) = lookup("DB_POOL_SIZE") {
            self.database.pool_size = parse_value("DB_POOL_SIZE", size)?;
        }

        // Auth
        if let Some(secret) = lookup("JWT_SECRET_KEY") {
            self.auth.jwt_secret = Some(Secret::new(secret));
        }
        if let Some(ttl) = lookup("JWT_TTL_SECS") {
            self.auth.token_ttl_secs = parse_value("JWT_TTL_SECS", ttl)?;
        }
        if let Some(transport) = lookup("AUTH_TOKEN_TRANSPORT") {
            self.auth.transport = transport.parse()?;
        }
        if let Some(timeout) = lookup("AUTH_RESOLVE_TIMEOUT_MS") {
            self.auth.resolve_timeout_ms = parse_value("AUTH_RESOLVE_TIMEOUT_MS", timeout)?;
        }
        if let Some(memory) = lookup("ARGON2_MEMORY_KIB") {
            self.auth.password.memory_kib = parse_value("ARGON2_MEMORY_KIB", memory)?;
        }
        if let Some(iterations) = lookup("ARGON2_ITERATIONS") {
            self.auth.password.iterations = parse_value("ARGON2_ITERATIONS", iterations)?;
        }
        if let Some(parallelism) = lookup("ARGON2_PARALLELISM") {
            self.auth.password.parallelism = parse_value("ARGON2_PARALLELISM", parallelism)?;
        }
        if let Some(email) = lookup("ADMIN_EMAIL") {
            self.auth.admin_email = Some(email);
        }
        if let Some(password) = lookup("ADMIN_PASSWORD") {
            self.auth.admin_password = Some(Secret::new(password));
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.json_format = match format.to_lowercase().as_str() {
                "json" => true,
                "text" | "pretty" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LOG_FORMAT".to_string(),
                        value: format,
                    })
                }
            };
        }

        Ok(())
    }

    /// Check settings the server cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.auth.jwt_secret {
            Some(secret) if !secret.is_empty() => {}
            _ => return Err(ConfigError::MissingRequired("JWT_SECRET_KEY".to_string())),
        }

        self.auth.token_ttl()?;

        if self.auth.admin_email.is_some() != self.auth.admin_password.is_some() {
            return Err(ConfigError::MissingRequired(
                "ADMIN_EMAIL and ADMIN_PASSWORD must be set together".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL (contains credentials)
    #[serde(skip_serializing)]
    pub url: Option<Secret>,

    /// Connection pool size
    pub pool_size: u32,

    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
            acquire_timeout_secs: 5,
        }
    }
}

impl DatabaseConfig {
    /// Connection URL, required when running against PostgreSQL
    pub fn connection_url(&self) -> Result<&Secret, ConfigError> {
        self.url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingRequired("DATABASE_URL".to_string()))
    }

    /// Assemble a URL from `DB_USER`, `DB_PASSWORD`, `DB_ADDRESS`, `DB_PORT`
    /// and `DB_DATABASE`. Returns `None` when none of them are set.
    fn url_from_parts<F>(lookup: &F) -> Result<Option<Secret>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = lookup("DB_USER");
        let database = lookup("DB_DATABASE");
        let address = lookup("DB_ADDRESS");
        let password = lookup("DB_PASSWORD");

        if user.is_none() && database.is_none() && address.is_none() && password.is_none() {
            return Ok(None);
        }

        let (Some(user), Some(database), Some(address)) = (user, database, address) else {
            return Err(ConfigError::MissingRequired(
                "DB_USER, DB_DATABASE and DB_ADDRESS".to_string(),
            ));
        };
        let password =
            password.ok_or_else(|| ConfigError::MissingRequired("DB_PASSWORD".to_string()))?;

        let host = match lookup("DB_PORT") {
            Some(port) => {
                let port: u16 = parse_value("DB_PORT", port)?;
                format!("{address}:{port}")
            }
            None => address,
        };

        Ok(Some(Secret::new(format!(
            "postgres://{user}:{password}@{host}/{database}"
        ))))
    }
}

/// How the session token travels between client and server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenTransport {
    /// `access_token` cookie, HttpOnly, SameSite=Strict
    #[default]
    Cookie,
    /// `Authorization: Bearer <token>` header
    Bearer,
}

impl FromStr for TokenTransport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cookie" => Ok(Self::Cookie),
            "bearer" => Ok(Self::Bearer),
            _ => Err(ConfigError::InvalidValue {
                key: "AUTH_TOKEN_TRANSPORT".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC signing key for session tokens (required)
    #[serde(skip_serializing)]
    pub jwt_secret: Option<Secret>,

    /// Session token lifetime in seconds
    pub token_ttl_secs: u64,

    /// Token transport for this deployment
    pub transport: TokenTransport,

    /// Upper bound for the per-request user lookup
    pub resolve_timeout_ms: u64,

    /// Argon2 parameters
    pub password: PasswordHashConfig,

    /// Bootstrap admin account, seeded at startup when set
    pub admin_email: Option<String>,

    #[serde(skip_serializing)]
    pub admin_password: Option<Secret>,
}

impl AuthConfig {
    /// Token lifetime, bounded to `1..=MAX_TOKEN_TTL_SECS`
    pub fn token_ttl(&self) -> Result<chrono::Duration, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: "JWT_TTL_SECS".to_string(),
            value: self.token_ttl_secs.to_string(),
        };

        if !(1..=MAX_TOKEN_TTL_SECS).contains(&self.token_ttl_secs) {
            return Err(invalid());
        }
        let secs = i64::try_from(self.token_ttl_secs).map_err(|_| invalid())?;
        chrono::Duration::try_seconds(secs).ok_or_else(invalid)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: 3600, // 1 hour
            transport: TokenTransport::Cookie,
            resolve_timeout_ms: 2000,
            password: PasswordHashConfig::default(),
            admin_email: None,
            admin_password: None,
        }
    }
}

/// Argon2id cost parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordHashConfig {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_kib: u32,

    /// Time cost (iterations)
    pub iterations: u32,

    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for PasswordHashConfig {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

/// Secret configuration value
///
/// Redacted from `Debug` output and never serialized.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
