//! Request authentication
//!
//! Reads the session token from the configured transport, resolves it once
//! per request and exposes the result to handlers through extractors:
//!
//! - [`CurrentIdentity`]: the caller, anonymous or not. Never rejects for
//!   lack of credentials.
//! - [`RequestContext`]: the caller plus the store handle, token codec and
//!   audit metadata.
//! - [`RequireRole`]: rejects with 401/403 unless the caller's role is in
//!   the policy's allow-list.
//!
//! The resolved [`Identity`] is cached in the request extensions, so any
//! number of extractors and the [`require_roles`] layer share one lookup.

use super::gate::{authorize, join_roles, AccessDenied, RolePolicy};
use super::jwt::TokenCodec;
use super::repository::UserStore;
use crate::audit::{audit_log, AuditContext, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use tsp_core::{Identity, Role, TokenTransport};

/// Name of the session cookie in cookie transport
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Pull the raw session token out of the request headers
///
/// Only the configured transport is consulted. An empty or malformed
/// credential counts as no credential.
pub fn extract_token(headers: &HeaderMap, transport: TokenTransport) -> Option<String> {
    match transport {
        TokenTransport::Cookie => CookieJar::from_headers(headers)
            .get(ACCESS_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty()),
        TokenTransport::Bearer => headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .split_once(' ')
            .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
            .map(|(_, token)| token.trim())
            .filter(|token| !token.is_empty())
            .map(str::to_string),
    }
}

/// Session cookie carrying `token`
///
/// HttpOnly, SameSite=Strict, whole-site path, session lifetime.
pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((ACCESS_TOKEN_COOKIE, token))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

/// Cookie that, passed to `CookieJar::remove`, clears the session
pub fn cleared_session_cookie() -> Cookie<'static> {
    Cookie::build((ACCESS_TOKEN_COOKIE, ""))
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .build()
}

/// Resolve the caller of this request, at most once
///
/// Store failures propagate as errors; they are never turned into an
/// anonymous identity.
pub async fn resolve_identity(parts: &mut Parts, state: &AppState) -> Result<Identity, AppError> {
    if let Some(identity) = parts.extensions.get::<Identity>() {
        return Ok(identity.clone());
    }

    let token = extract_token(&parts.headers, state.config.auth.transport);
    let context = AuditContext::from_headers(&parts.headers);
    let identity = state.resolver.resolve(token.as_deref(), &context).await?;

    parts.extensions.insert(identity.clone());
    Ok(identity)
}

fn audit_denial(identity: &Identity, allowed: &[Role], resource: &str, headers: &HeaderMap) {
    audit_log(&AuditEvent::AccessDenied {
        user_id: identity.user().map(|u| u.id),
        email: identity.user().map(|u| u.email.clone()),
        role: identity.role().to_string(),
        required_roles: join_roles(allowed),
        resource: resource.to_string(),
        context: AuditContext::from_headers(headers),
    });
}

/// The resolved caller, anonymous or authenticated
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        resolve_identity(parts, state).await.map(CurrentIdentity)
    }
}

/// Everything a handler needs to act on behalf of the caller
#[derive(Clone)]
pub struct RequestContext {
    pub identity: Identity,
    pub store: Arc<dyn UserStore>,
    pub codec: TokenCodec,
    pub audit: AuditContext,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = resolve_identity(parts, state).await?;

        Ok(Self {
            identity,
            store: state.store.clone(),
            codec: state.codec.clone(),
            audit: AuditContext::from_headers(&parts.headers),
        })
    }
}

/// Extractor that admits only callers whose role is in `P::ALLOWED`
///
/// ```ignore
/// use tsp_api::auth::{AdminOnly, RequireRole};
///
/// async fn admin_handler(admin: RequireRole<AdminOnly>) -> String {
///     format!("hello {}", admin.role)
/// }
/// ```
pub struct RequireRole<P> {
    pub identity: Identity,
    pub role: Role,
    _policy: PhantomData<P>,
}

#[async_trait]
impl<P: RolePolicy> FromRequestParts<Arc<AppState>> for RequireRole<P> {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let identity = resolve_identity(parts, state).await?;

        match authorize(&identity, P::ALLOWED) {
            Ok(role) => Ok(Self {
                identity,
                role,
                _policy: PhantomData,
            }),
            Err(denied) => {
                audit_denial(&identity, P::ALLOWED, parts.uri.path(), &parts.headers);
                Err(denied.into())
            }
        }
    }
}

/// Type alias for role middleware future
type RoleMiddlewareFuture = Pin<Box<dyn Future<Output = Result<Response, AppError>> + Send>>;

/// Middleware factory for role-based access control
///
/// # Example
///
/// ```ignore
/// use axum::{middleware, routing::get, Router};
/// use tsp_api::auth::middleware::require_roles;
/// use tsp_core::Role;
///
/// let admin = Router::new()
///     .route("/stats", get(stats_handler))
///     .route_layer(middleware::from_fn_with_state(
///         state.clone(),
///         require_roles(&[Role::Admin]),
///     ));
/// ```
pub fn require_roles(
    allowed: &'static [Role],
) -> impl Fn(State<Arc<AppState>>, Request, Next) -> RoleMiddlewareFuture + Clone {
    move |State(state): State<Arc<AppState>>, request: Request, next: Next| {
        Box::pin(async move {
            let (mut parts, body) = request.into_parts();
            let identity = resolve_identity(&mut parts, &state).await?;

            if let Err(denied) = authorize(&identity, allowed) {
                audit_denial(&identity, allowed, parts.uri.path(), &parts.headers);
                return Err(AppError::from(denied));
            }

            Ok(next.run(Request::from_parts(parts, body)).await)
        })
    }
}

impl From<AccessDenied> for AppError {
    fn from(denied: AccessDenied) -> Self {
        match denied {
            AccessDenied::Unauthenticated => AppError::Unauthorized,
            AccessDenied::Forbidden { .. } => AppError::Forbidden(denied.to_string()),
        }
    }
}
