//! Session token encoding and decoding
//!
//! Session tokens are JWTs signed with HMAC-SHA256. HS256 is the only
//! accepted algorithm: a token whose header names any other algorithm is
//! rejected before its signature is looked at.
//!
//! The codec does not judge freshness. `exp` is returned verbatim and the
//! session resolver applies the expiry policy.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tsp_core::{Secret, UserRole};

/// The single signature algorithm accepted by the codec
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims carried by a session token
///
/// `role` is a snapshot taken at issuance. It is compared against the live
/// user record on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - user ID as a decimal string
    pub sub: String,
    /// Role at issuance time
    pub role: UserRole,
    /// Issued at timestamp (Unix epoch seconds)
    pub iat: i64,
    /// Expiration timestamp (Unix epoch seconds)
    pub exp: i64,
}

impl Claims {
    pub fn new(subject: i64, role: UserRole, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.timestamp();
        Self {
            sub: subject.to_string(),
            role,
            iat,
            exp: iat + ttl.num_seconds(),
        }
    }

    /// Parse the subject back into a user ID
    pub fn subject_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }

    /// A token is fresh strictly before its `exp` second
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// Token encoding and decoding errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Failed to encode token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Unexpected token algorithm")]
    InvalidAlgorithm,

    #[error("Malformed token: {0}")]
    Malformed(String),
}

/// Signs and verifies session tokens with the process-wide key
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &TOKEN_ALGORITHM)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["sub", "exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn from_secret(secret: &Secret) -> Self {
        Self::new(secret.expose().as_bytes())
    }

    /// Mint a token for `subject` valid for `ttl` from `issued_at`
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use tsp_api::auth::jwt::TokenCodec;
    /// use tsp_core::UserRole;
    ///
    /// let codec = TokenCodec::new(b"signing-key");
    /// let token = codec
    ///     .encode(42, UserRole::User, Utc::now(), Duration::hours(1))
    ///     .expect("encoding never fails for HS256");
    /// let claims = codec.decode(&token).unwrap();
    /// assert_eq!(claims.sub, "42");
    /// ```
    pub fn encode(
        &self,
        subject: i64,
        role: UserRole,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.encode_claims(&Claims::new(subject, role, issued_at, ttl))
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(TOKEN_ALGORITHM), claims, &self.encoding_key)
            .map_err(TokenError::Encoding)
    }

    /// Verify the signature and return the claims without checking expiry
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::InvalidAlgorithm
                }
                _ => TokenError::Malformed(e.to_string()),
            })?;

        Ok(token_data.claims)
    }
}
