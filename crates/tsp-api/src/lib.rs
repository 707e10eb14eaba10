//! TSP API - authentication and authorization server
//!
//! Signup, login, per-request session resolution and role-gated access for
//! the passenger prediction backend.

pub mod audit;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    app_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// All routes without state, for callers that merge in their own routes
pub fn app_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(routes::health_routes())
        .nest("/auth", routes::auth_routes())
}
