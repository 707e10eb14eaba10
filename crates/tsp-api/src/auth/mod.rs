//! Authentication and authorization module
//!
//! This module provides stateless session tokens bound to a live user lookup:
//! - Token encoding and decoding (HS256 only)
//! - Password hashing with Argon2id
//! - User storage (PostgreSQL or in-memory)
//! - Session resolution: token to identity, once per request
//! - Role gate and extractors for protecting handlers
//! - Authentication service for signup, login and logout

pub mod gate;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod repository;
pub mod service;
pub mod session;

pub use gate::{authorize, AccessDenied, AdminOnly, Everyone, Members, RolePolicy};
pub use jwt::{Claims, TokenCodec, TokenError};
pub use middleware::{
    extract_token, require_roles, resolve_identity, CurrentIdentity, RequestContext, RequireRole,
    ACCESS_TOKEN_COOKIE,
};
pub use password::{Argon2Hasher, PasswordError, PasswordHasher};
pub use repository::{MemoryUserStore, PgUserStore, StoreError, UserStore};
pub use service::{AuthError, AuthService, IssuedToken, LoginRequest, SignupRequest, WhoAmI};
pub use session::{SessionResolver, SessionState};
