//! API route definitions

use crate::handlers::{auth, health};
use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Authentication routes, mounted under `/auth`
///
/// None of these require a session; whoami answers anonymous callers too.
pub fn auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/signup", post(auth::signup_handler))
        .route("/login", post(auth::login_handler))
        .route("/logout", post(auth::logout_handler))
        .route("/me", get(auth::me_handler))
        .route("/me_myself_and_I", get(auth::me_handler))
}

/// Liveness and readiness probes
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
}
