//! Authentication API handlers
//!
//! Signup, login, logout and whoami. How the session token reaches the
//! client depends on the configured transport: in cookie mode login sets
//! the `access_token` cookie and logout removes it, in bearer mode the
//! token is returned in the login body and the client keeps it.

use crate::audit::AuditContext;
use crate::auth::middleware::{
    cleared_session_cookie, session_cookie, CurrentIdentity, RequestContext,
};
use crate::auth::service::{AuthService, LoginRequest, SignupRequest, WhoAmI};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tsp_core::TokenTransport;

/// Signup response
#[derive(Debug, Serialize, Deserialize)]
pub struct SignupResponse {
    pub email: String,
}

/// Login response
///
/// Token fields are present only in bearer transport.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Logout response
#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

/// Register a new account
///
/// # Responses
///
/// * `200 OK` - `{email}` of the new account, role `user`
/// * `400 Bad Request` - Empty or oversized email/password
/// * `409 Conflict` - Email already registered
pub async fn signup_handler(
    State(state): State<Arc<AppState>>,
    audit: AuditContext,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.signup(request, &audit).await?;

    Ok(Json(SignupResponse { email: user.email }))
}

/// Log in with email and password
///
/// # Responses
///
/// * `200 OK` - Session established
/// * `401 Unauthorized` - Unknown email or wrong password, same body for both
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    audit: AuditContext,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state.auth.login(request, &audit).await?;
    let message = "Login successful".to_string();

    let response = match state.transport() {
        TokenTransport::Cookie => (
            jar.add(session_cookie(issued.access_token)),
            Json(LoginResponse {
                message,
                access_token: None,
                token_type: None,
                expires_in: None,
            }),
        ),
        TokenTransport::Bearer => (
            jar,
            Json(LoginResponse {
                message,
                access_token: Some(issued.access_token),
                token_type: Some(issued.token_type.to_string()),
                expires_in: Some(issued.expires_in),
            }),
        ),
    };

    Ok(response)
}

/// End the current session
///
/// Always succeeds, signed in or not.
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ctx: RequestContext,
) -> impl IntoResponse {
    state.auth.logout(&ctx.identity, &ctx.audit);

    let jar = match state.transport() {
        TokenTransport::Cookie => jar.remove(cleared_session_cookie()),
        TokenTransport::Bearer => jar,
    };

    (
        jar,
        Json(LogoutResponse {
            message: "Logout successful".to_string(),
        }),
    )
}

/// Who is calling
///
/// Anonymous callers get `{"email": null, "role": "anon"}`.
pub async fn me_handler(CurrentIdentity(identity): CurrentIdentity) -> Json<WhoAmI> {
    Json(AuthService::whoami(&identity))
}
