//! Security audit logging for authentication events
//!
//! Provides structured audit logging for signups, logins, logouts, rejected
//! session tokens and access control failures.
//!
//! All audit events are logged with the "audit" target so they can be
//! filtered and routed separately from application logs. Rejected tokens and
//! denied access are logged at WARN, everything else at INFO.
//!
//! Events never carry raw tokens, passwords, password hashes or the signing
//! key. Token rejections identify the token by its subject claim only.
//!
//! # Example
//!
//! ```ignore
//! use tsp_api::audit::{audit_log, AuditContext, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     context: AuditContext::default(),
//! });
//! ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{info, warn};

/// Request metadata attached to audit events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// Client IP address (extracted from proxy headers)
    pub ip_address: Option<String>,
    /// User agent string
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuditContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Account created through self-service signup
    SignupSuccess {
        user_id: i64,
        email: String,
        role: String,
        #[serde(flatten)]
        context: AuditContext,
    },

    /// Signup refused (duplicate email, invalid payload)
    SignupFailure {
        email: String,
        reason: String,
        #[serde(flatten)]
        context: AuditContext,
    },

    LoginSuccess {
        user_id: i64,
        email: String,
        #[serde(flatten)]
        context: AuditContext,
    },

    /// Failed login. `reason` is for operators only; clients always see
    /// the same generic message.
    LoginFailure {
        email: String,
        reason: String,
        #[serde(flatten)]
        context: AuditContext,
    },

    Logout {
        user_id: Option<i64>,
        email: Option<String>,
        #[serde(flatten)]
        context: AuditContext,
    },

    /// A presented session token did not yield an identity
    TokenRejected {
        reason: String,
        subject: Option<String>,
        claimed_role: Option<String>,
        live_role: Option<String>,
        #[serde(flatten)]
        context: AuditContext,
    },

    /// Role gate refused the request
    AccessDenied {
        user_id: Option<i64>,
        email: Option<String>,
        role: String,
        required_roles: String,
        resource: String,
        #[serde(flatten)]
        context: AuditContext,
    },

    /// Bootstrap admin account created at startup
    AdminSeeded { user_id: i64, email: String },
}

/// Log a security audit event with structured fields
///
/// The event is also serialized to JSON in the `event` field for log
/// aggregators. Example:
///
/// ```json
/// {
///   "event_type": "token_rejected",
///   "reason": "role_mismatch",
///   "subject": "12",
///   "claimed_role": "admin",
///   "live_role": "user",
///   "ip_address": "203.0.113.1",
///   "user_agent": null
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::SignupSuccess {
            user_id,
            email,
            role,
            context,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                role = %role,
                ip_address = ?context.ip_address,
                "Signup successful"
            );
        }
        AuditEvent::SignupFailure {
            email,
            reason,
            context,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?context.ip_address,
                "Signup failed"
            );
        }
        AuditEvent::LoginSuccess {
            user_id,
            email,
            context,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                ip_address = ?context.ip_address,
                "Login successful"
            );
        }
        AuditEvent::LoginFailure {
            email,
            reason,
            context,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?context.ip_address,
                "Login failed"
            );
        }
        AuditEvent::Logout {
            user_id,
            email,
            context,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = ?user_id,
                email = ?email,
                ip_address = ?context.ip_address,
                "User logout"
            );
        }
        AuditEvent::TokenRejected {
            reason,
            subject,
            claimed_role,
            live_role,
            context,
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                reason = %reason,
                subject = ?subject,
                claimed_role = ?claimed_role,
                live_role = ?live_role,
                ip_address = ?context.ip_address,
                "Session token rejected"
            );
        }
        AuditEvent::AccessDenied {
            user_id,
            email,
            role,
            required_roles,
            resource,
            context,
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = ?user_id,
                email = ?email,
                role = %role,
                required_roles = %required_roles,
                resource = %resource,
                ip_address = ?context.ip_address,
                "Access denied"
            );
        }
        AuditEvent::AdminSeeded { user_id, email } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                "Admin account seeded"
            );
        }
    }
}

/// Extract IP address from request headers
///
/// Checks X-Forwarded-For, then X-Real-IP. Connection info is not
/// available here and is left to the tracing layer.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            // First entry is the client
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}
