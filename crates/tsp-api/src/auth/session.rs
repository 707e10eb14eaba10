//! Session resolution
//!
//! Turns the credential presented with a request into an [`Identity`].
//! Every request is resolved from scratch: the token is verified, its
//! expiry checked, and the subject looked up in the store so that deleted
//! accounts and changed roles take effect immediately.
//!
//! Rejected tokens resolve to [`Identity::Anonymous`]. Store failures are
//! not rejections and are returned as errors.

use super::jwt::TokenCodec;
use super::repository::{StoreError, UserStore};
use crate::audit::{audit_log, AuditContext, AuditEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tsp_core::{AuthenticatedUser, Identity, UserRole};

/// Outcome of resolving one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No credential presented
    NoToken,
    /// Signature, algorithm, structure or subject was unusable
    TokenInvalid,
    /// Verified, but `exp` has passed
    TokenExpired,
    /// Subject does not exist any more
    UserMissing,
    /// Role claim disagrees with the stored role
    RoleMismatch { claimed: UserRole, live: UserRole },
    Authenticated(AuthenticatedUser),
}

impl SessionState {
    pub fn into_identity(self) -> Identity {
        match self {
            SessionState::Authenticated(user) => Identity::Authenticated(user),
            SessionState::NoToken
            | SessionState::TokenInvalid
            | SessionState::TokenExpired
            | SessionState::UserMissing
            | SessionState::RoleMismatch { .. } => Identity::Anonymous,
        }
    }

    /// Short machine-readable label, used in audit records
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::NoToken => "no_token",
            SessionState::TokenInvalid => "token_invalid",
            SessionState::TokenExpired => "token_expired",
            SessionState::UserMissing => "user_missing",
            SessionState::RoleMismatch { .. } => "role_mismatch",
            SessionState::Authenticated(_) => "authenticated",
        }
    }
}

/// Resolves session tokens against the live user store
#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn UserStore>,
    codec: TokenCodec,
    lookup_timeout: Duration,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn UserStore>, codec: TokenCodec, lookup_timeout: Duration) -> Self {
        Self {
            store,
            codec,
            lookup_timeout,
        }
    }

    /// Resolve `token` to the caller's identity as of now
    pub async fn resolve(
        &self,
        token: Option<&str>,
        context: &AuditContext,
    ) -> Result<Identity, StoreError> {
        let state = self.resolve_state(token, Utc::now(), context).await?;
        Ok(state.into_identity())
    }

    /// Run the resolution state machine at instant `now`
    ///
    /// Rejections are audited here. The raw token never reaches a log line;
    /// rejected tokens are identified by their subject claim when one could
    /// be read.
    pub async fn resolve_state(
        &self,
        token: Option<&str>,
        now: DateTime<Utc>,
        context: &AuditContext,
    ) -> Result<SessionState, StoreError> {
        let Some(token) = token else {
            debug!("No session token presented");
            return Ok(SessionState::NoToken);
        };

        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(e) => {
                reject(context, format!("token_invalid: {e}"), None, None, None);
                return Ok(SessionState::TokenInvalid);
            }
        };

        if claims.is_expired_at(now) {
            reject(
                context,
                "token_expired".to_string(),
                Some(claims.sub.as_str()),
                None,
                None,
            );
            return Ok(SessionState::TokenExpired);
        }

        let Some(user_id) = claims.subject_id() else {
            reject(
                context,
                "token_invalid: subject is not a user id".to_string(),
                Some(claims.sub.as_str()),
                None,
                None,
            );
            return Ok(SessionState::TokenInvalid);
        };

        let user = tokio::time::timeout(self.lookup_timeout, self.store.find_by_id(user_id))
            .await
            .map_err(|_| StoreError::Timeout)??;

        let Some(user) = user else {
            reject(
                context,
                "user_missing".to_string(),
                Some(claims.sub.as_str()),
                None,
                None,
            );
            return Ok(SessionState::UserMissing);
        };

        if user.role != claims.role {
            reject(
                context,
                "role_mismatch".to_string(),
                Some(claims.sub.as_str()),
                Some(claims.role),
                Some(user.role),
            );
            return Ok(SessionState::RoleMismatch {
                claimed: claims.role,
                live: user.role,
            });
        }

        debug!(user_id = user.id, role = %user.role, "Session resolved");
        Ok(SessionState::Authenticated(AuthenticatedUser::from(&user)))
    }
}

fn reject(
    context: &AuditContext,
    reason: String,
    subject: Option<&str>,
    claimed_role: Option<UserRole>,
    live_role: Option<UserRole>,
) {
    audit_log(&AuditEvent::TokenRejected {
        reason,
        subject: subject.map(str::to_string),
        claimed_role: claimed_role.map(|r| r.to_string()),
        live_role: live_role.map(|r| r.to_string()),
        context: context.clone(),
    });
}
