//! Authentication service layer
//!
//! Business logic for signup, login, logout and whoami, plus the startup
//! admin seeding. Storage, hashing and token signing are injected so the
//! same service runs against PostgreSQL in production and the in-memory
//! store in tests.

use super::jwt::{TokenCodec, TokenError};
use super::password::{hash_off_thread, verify_off_thread, PasswordError, PasswordHasher};
use super::repository::{StoreError, UserStore};
use crate::audit::{audit_log, AuditContext, AuditEvent};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tsp_core::{AuthenticatedUser, Identity, Role, User, UserRole};
use validator::Validate;

/// Input hashed in place of a real password when the email is unknown
const DUMMY_PASSWORD: &str = "timing-equalization-placeholder";

/// Signup request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 320, message = "email must be 1-320 characters"))]
    pub email: String,
    #[validate(length(min = 1, max = 1024, message = "password must be 1-1024 characters"))]
    pub password: String,
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 320, message = "email must be 1-320 characters"))]
    pub email: String,
    #[validate(length(min = 1, max = 1024, message = "password must be 1-1024 characters"))]
    pub password: String,
}

/// A freshly minted session token
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: AuthenticatedUser,
}

/// Answer to "who am I"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoAmI {
    pub email: Option<String>,
    pub role: Role,
}

/// Authentication service errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Email already registered")]
    DuplicateEmail,

    /// Unknown email and wrong password are deliberately the same error
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid request: {0}")]
    Validation(String),

    /// The bootstrap admin email belongs to an account the operator did not create
    #[error("Admin email {0} is already registered to a non-admin account")]
    AdminEmailTaken(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => AuthError::DuplicateEmail,
            other => AuthError::Store(other),
        }
    }
}

fn validate_request(request: &impl Validate) -> Result<(), AuthError> {
    request
        .validate()
        .map_err(|e| AuthError::Validation(e.to_string()))
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    codec: TokenCodec,
    token_ttl: Duration,
    dummy_hash: String,
}

impl AuthService {
    /// Create a service. Hashes the timing placeholder once, up front.
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        codec: TokenCodec,
        token_ttl: Duration,
    ) -> Result<Self, PasswordError> {
        let dummy_hash = hasher.hash(DUMMY_PASSWORD)?;

        Ok(Self {
            store,
            hasher,
            codec,
            token_ttl,
            dummy_hash,
        })
    }

    /// Register a new account
    ///
    /// The role is always `user`; there is no way to ask for anything else
    /// through this path.
    pub async fn signup(
        &self,
        request: SignupRequest,
        context: &AuditContext,
    ) -> Result<User, AuthError> {
        validate_request(&request)?;

        let password_hash = hash_off_thread(self.hasher.clone(), request.password).await?;

        match self
            .store
            .create(&request.email, &password_hash, UserRole::User)
            .await
        {
            Ok(user) => {
                audit_log(&AuditEvent::SignupSuccess {
                    user_id: user.id,
                    email: user.email.clone(),
                    role: user.role.to_string(),
                    context: context.clone(),
                });
                Ok(user)
            }
            Err(err) => {
                let err = AuthError::from(err);
                if matches!(err, AuthError::DuplicateEmail) {
                    audit_log(&AuditEvent::SignupFailure {
                        email: request.email,
                        reason: "duplicate_email".to_string(),
                        context: context.clone(),
                    });
                }
                Err(err)
            }
        }
    }

    /// Check credentials and mint a session token
    pub async fn login(
        &self,
        request: LoginRequest,
        context: &AuditContext,
    ) -> Result<IssuedToken, AuthError> {
        validate_request(&request)?;

        let user = self.store.find_by_email(&request.email).await?;

        // Verify against a placeholder for unknown emails so both
        // failure paths do the same hashing work
        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| self.dummy_hash.clone());
        let verified = verify_off_thread(self.hasher.clone(), stored_hash, request.password).await?;

        let user = match user {
            Some(user) if verified => user,
            found => {
                let reason = if found.is_some() {
                    "wrong_password"
                } else {
                    "unknown_email"
                };
                audit_log(&AuditEvent::LoginFailure {
                    email: request.email,
                    reason: reason.to_string(),
                    context: context.clone(),
                });
                return Err(AuthError::InvalidCredentials);
            }
        };

        let access_token = self
            .codec
            .encode(user.id, user.role, Utc::now(), self.token_ttl)?;

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            context: context.clone(),
        });

        Ok(IssuedToken {
            access_token,
            token_type: "bearer",
            expires_in: self.token_ttl.num_seconds().max(0) as u64,
            user: AuthenticatedUser::from(&user),
        })
    }

    /// Record a logout. Tokens are stateless; the caller discards them.
    pub fn logout(&self, identity: &Identity, context: &AuditContext) {
        audit_log(&AuditEvent::Logout {
            user_id: identity.user().map(|u| u.id),
            email: identity.user().map(|u| u.email.clone()),
            context: context.clone(),
        });
    }

    pub fn whoami(identity: &Identity) -> WhoAmI {
        WhoAmI {
            email: identity.user().map(|u| u.email.clone()),
            role: identity.role(),
        }
    }

    /// Make sure `email` exists with the admin role
    ///
    /// Creates the account if missing. An existing admin is left as is.
    /// An existing non-admin account is refused: its password was chosen
    /// by whoever signed up, not by the operator.
    pub async fn ensure_admin(&self, email: &str, password: &str) -> Result<User, AuthError> {
        if let Some(existing) = self.store.find_by_email(email).await? {
            if existing.role == UserRole::Admin {
                return Ok(existing);
            }
            return Err(AuthError::AdminEmailTaken(existing.email));
        }

        let password_hash = hash_off_thread(self.hasher.clone(), password.to_string()).await?;
        let user = self
            .store
            .create(email, &password_hash, UserRole::Admin)
            .await?;

        audit_log(&AuditEvent::AdminSeeded {
            user_id: user.id,
            email: user.email.clone(),
        });

        Ok(user)
    }
}
