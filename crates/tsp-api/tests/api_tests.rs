//! API Integration Tests
//!
//! Drives the full router with the in-memory user store and cheap Argon2
//! parameters. PostgreSQL-backed tests live next to `PgUserStore` and are
//! marked #[ignore].

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use tsp_api::auth::{
    require_roles, AdminOnly, Argon2Hasher, MemoryUserStore, RequestContext, RequireRole,
    StoreError, TokenCodec, UserStore,
};
use tsp_api::{app_routes, create_router, state::AppState};
use tsp_core::{AppConfig, PasswordHashConfig, Role, Secret, TokenTransport, User, UserRole};

const SIGNING_KEY: &str = "integration-test-signing-key";

fn test_config(transport: TokenTransport) -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = Some(Secret::new(SIGNING_KEY));
    config.auth.transport = transport;
    config.auth.password = PasswordHashConfig {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    config
}

fn test_state(store: Arc<dyn UserStore>, transport: TokenTransport) -> Arc<AppState> {
    let config = test_config(transport);
    let hasher = Arc::new(Argon2Hasher::new(&config.auth.password).unwrap());
    Arc::new(AppState::new(config, store, hasher).unwrap())
}

struct TestApp {
    state: Arc<AppState>,
    store: Arc<MemoryUserStore>,
    router: Router,
}

fn test_app(transport: TokenTransport) -> TestApp {
    let store = Arc::new(MemoryUserStore::new());
    let state = test_state(store.clone(), transport);

    async fn admin_only(admin: RequireRole<AdminOnly>) -> String {
        format!("welcome {}", admin.role)
    }

    async fn my_record(ctx: RequestContext) -> String {
        match ctx.identity.user() {
            Some(user) => match ctx.store.find_by_id(user.id).await {
                Ok(Some(record)) => record.email,
                _ => "missing".to_string(),
            },
            None => "nobody".to_string(),
        }
    }

    let layered = Router::new()
        .route("/admin/layer", get(|| async { "layer ok" }))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_roles(&[Role::Admin]),
        ));

    let router = app_routes()
        .route("/admin/extractor", get(admin_only))
        .route("/whose", get(my_record))
        .merge(layered)
        .with_state(state.clone());

    TestApp {
        state,
        store,
        router,
    }
}

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn get_with_cookie(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn cookie_for(token: &str) -> String {
    format!("access_token={token}")
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn signup(&self, email: &str, password: &str) -> Response {
        self.send(create_json_request(
            "POST",
            "/auth/signup",
            Some(json!({"email": email, "password": password})),
        ))
        .await
    }

    async fn login(&self, email: &str, password: &str) -> Response {
        self.send(create_json_request(
            "POST",
            "/auth/login",
            Some(json!({"email": email, "password": password})),
        ))
        .await
    }

    /// Log in and return the `access_token=...` pair for a Cookie header
    async fn login_cookie(&self, email: &str, password: &str) -> String {
        let response = self.login(email, password).await;
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("login sets the session cookie")
            .to_str()
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn whoami(&self, cookie: Option<&str>) -> Value {
        let response = self.send(get_with_cookie("/auth/me", cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await
    }

    async fn admin(&self) -> User {
        self.state
            .auth
            .ensure_admin("admin@example.com", "admin-pw")
            .await
            .unwrap()
    }
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let store = Arc::new(MemoryUserStore::new());
    let app = create_router(test_state(store, TokenTransport::Cookie));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_readiness_check() {
    let app = test_app(TokenTransport::Cookie);

    let response = app.send(get_with_cookie("/ready", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["ready"], true);
    assert_eq!(json["checks"]["user_store"], true);
}

// =============================================================================
// Signup / Login / Whoami
// =============================================================================

#[tokio::test]
async fn test_signup_login_whoami() {
    let app = test_app(TokenTransport::Cookie);

    let response = app.signup("rider@example.com", "s3cret").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"email": "rider@example.com"}));

    let response = app.login("rider@example.com", "s3cret").await;
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("access_token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));

    let json = body_json(response).await;
    assert!(json["message"].is_string());
    // Cookie transport keeps the token out of the body
    assert!(json.get("access_token").is_none());

    let cookie = set_cookie.split(';').next().unwrap();
    assert_eq!(
        app.whoami(Some(cookie)).await,
        json!({"email": "rider@example.com", "role": "user"})
    );

    let response = app
        .send(get_with_cookie("/auth/me_myself_and_I", Some(cookie)))
        .await;
    assert_eq!(
        body_json(response).await,
        json!({"email": "rider@example.com", "role": "user"})
    );
}

#[tokio::test]
async fn test_whoami_anonymous() {
    let app = test_app(TokenTransport::Cookie);

    assert_eq!(
        app.whoami(None).await,
        json!({"email": null, "role": "anon"})
    );
}

#[tokio::test]
async fn test_signup_cannot_choose_role() {
    let app = test_app(TokenTransport::Cookie);

    let response = app
        .send(create_json_request(
            "POST",
            "/auth/signup",
            Some(json!({"email": "sneaky@example.com", "password": "pw", "role": "admin"})),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let user = app
        .store
        .find_by_email("sneaky@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.role, UserRole::User);
}

#[tokio::test]
async fn test_signup_validation() {
    let app = test_app(TokenTransport::Cookie);

    let response = app.signup("", "pw").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");

    let response = app.signup("a@example.com", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn test_duplicate_signup() {
    let app = test_app(TokenTransport::Cookie);

    assert_eq!(
        app.signup("dup@example.com", "one").await.status(),
        StatusCode::OK
    );

    let response = app.signup("dup@example.com", "two").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "CONFLICT");

    // The first password still works
    assert_eq!(
        app.login("dup@example.com", "one").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn test_concurrent_duplicate_signup() {
    let app = Arc::new(test_app(TokenTransport::Cookie));

    let attempts = (0..8).map(|i| {
        let app = app.clone();
        async move { app.signup("race@example.com", &format!("pw{i}")).await.status() }
    });
    let statuses = futures::future::join_all(attempts).await;

    let created = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let conflicts = statuses
        .iter()
        .filter(|s| **s == StatusCode::CONFLICT)
        .count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(app.store.len().await, 1);
}

#[tokio::test]
async fn test_login_failures_look_identical() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("known@example.com", "right").await;

    let wrong_password = app.login("known@example.com", "wrong").await;
    let unknown_email = app.login("unknown@example.com", "right").await;

    assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
    assert!(wrong_password.headers().get(header::SET_COOKIE).is_none());

    let a = body_json(wrong_password).await;
    let b = body_json(unknown_email).await;
    assert_eq!(a, b);
    assert_eq!(a["code"], "INVALID_CREDENTIALS");
}

// =============================================================================
// Session Resolution
// =============================================================================

#[tokio::test]
async fn test_expired_token_is_anonymous() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("old@example.com", "pw").await;
    let user = app.store.find_by_email("old@example.com").await.unwrap().unwrap();

    let token = app
        .state
        .codec
        .encode(user.id, user.role, Utc::now() - Duration::hours(2), Duration::hours(1))
        .unwrap();

    assert_eq!(
        app.whoami(Some(cookie_for(&token).as_str())).await,
        json!({"email": null, "role": "anon"})
    );
}

#[tokio::test]
async fn test_foreign_key_token_is_anonymous() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("a@example.com", "pw").await;
    let user = app.store.find_by_email("a@example.com").await.unwrap().unwrap();

    let token = TokenCodec::new(b"not-the-server-key")
        .encode(user.id, user.role, Utc::now(), Duration::hours(1))
        .unwrap();

    assert_eq!(
        app.whoami(Some(cookie_for(&token).as_str())).await["role"],
        "anon"
    );
}

#[tokio::test]
async fn test_garbage_cookie_is_anonymous() {
    let app = test_app(TokenTransport::Cookie);

    assert_eq!(
        app.whoami(Some("access_token=definitely.not.valid")).await["role"],
        "anon"
    );
}

#[tokio::test]
async fn test_role_change_invalidates_session() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("climber@example.com", "pw").await;
    let cookie = app.login_cookie("climber@example.com", "pw").await;
    let user = app
        .store
        .find_by_email("climber@example.com")
        .await
        .unwrap()
        .unwrap();

    app.store.set_role(user.id, UserRole::Admin).await.unwrap();

    // The token still claims "user" and is no longer honoured
    assert_eq!(app.whoami(Some(cookie.as_str())).await["role"], "anon");

    // A fresh login picks up the new role
    let cookie = app.login_cookie("climber@example.com", "pw").await;
    assert_eq!(app.whoami(Some(cookie.as_str())).await["role"], "admin");
}

#[tokio::test]
async fn test_demoted_admin_loses_access() {
    let app = test_app(TokenTransport::Cookie);
    let admin = app.admin().await;
    let cookie = app.login_cookie("admin@example.com", "admin-pw").await;

    app.store.set_role(admin.id, UserRole::User).await.unwrap();

    let response = app
        .send(get_with_cookie("/admin/extractor", Some(cookie.as_str())))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_context_exposes_store() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("ctx@example.com", "pw").await;
    let cookie = app.login_cookie("ctx@example.com", "pw").await;

    let response = app.send(get_with_cookie("/whose", Some(cookie.as_str()))).await;
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ctx@example.com");
}

// =============================================================================
// Role Gate
// =============================================================================

#[tokio::test]
async fn test_admin_only_extractor() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("user@example.com", "pw").await;
    app.admin().await;
    let user_cookie = app.login_cookie("user@example.com", "pw").await;
    let admin_cookie = app.login_cookie("admin@example.com", "admin-pw").await;

    let anon = app.send(get_with_cookie("/admin/extractor", None)).await;
    assert_eq!(anon.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(anon).await["code"], "UNAUTHORIZED");

    let user = app
        .send(get_with_cookie("/admin/extractor", Some(user_cookie.as_str())))
        .await;
    assert_eq!(user.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(user).await["code"], "FORBIDDEN");

    let admin = app
        .send(get_with_cookie("/admin/extractor", Some(admin_cookie.as_str())))
        .await;
    assert_eq!(admin.status(), StatusCode::OK);
    let body = axum::body::to_bytes(admin.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"welcome admin");
}

#[tokio::test]
async fn test_require_roles_layer() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("user@example.com", "pw").await;
    app.admin().await;
    let user_cookie = app.login_cookie("user@example.com", "pw").await;
    let admin_cookie = app.login_cookie("admin@example.com", "admin-pw").await;

    let statuses = [
        app.send(get_with_cookie("/admin/layer", None)).await.status(),
        app.send(get_with_cookie("/admin/layer", Some(user_cookie.as_str())))
            .await
            .status(),
        app.send(get_with_cookie("/admin/layer", Some(admin_cookie.as_str())))
            .await
            .status(),
    ];

    assert_eq!(
        statuses,
        [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN, StatusCode::OK]
    );
}

// =============================================================================
// Logout
// =============================================================================

#[tokio::test]
async fn test_logout_removes_cookie() {
    let app = test_app(TokenTransport::Cookie);
    app.signup("bye@example.com", "pw").await;
    let cookie = app.login_cookie("bye@example.com", "pw").await;

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/auth/logout")
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("logout clears the session cookie")
        .to_str()
        .unwrap()
        .to_string();
    assert!(set_cookie.starts_with("access_token=;"));
    assert!(set_cookie.contains("Max-Age=0"));

    assert!(body_json(response).await["message"].is_string());
}

#[tokio::test]
async fn test_logout_when_anonymous() {
    let app = test_app(TokenTransport::Cookie);

    let response = app.send(create_json_request("POST", "/auth/logout", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Bearer Transport
// =============================================================================

#[tokio::test]
async fn test_bearer_transport() {
    let app = test_app(TokenTransport::Bearer);
    app.signup("api@example.com", "pw").await;

    let response = app.login("api@example.com", "pw").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let json = body_json(response).await;
    assert_eq!(json["token_type"], "bearer");
    let token = json["access_token"].as_str().unwrap().to_string();

    let response = app
        .send(
            Request::builder()
                .uri("/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        body_json(response).await,
        json!({"email": "api@example.com", "role": "user"})
    );

    // Cookies are not a credential in bearer mode
    assert_eq!(
        app.whoami(Some(cookie_for(&token).as_str())).await["role"],
        "anon"
    );
}

// =============================================================================
// Storage Failures
// =============================================================================

struct FailingStore;

#[async_trait]
impl UserStore for FailingStore {
    async fn create(&self, _: &str, _: &str, _: UserRole) -> Result<User, StoreError> {
        Err(StoreError::Database("connection refused".to_string()))
    }

    async fn find_by_email(&self, _: &str) -> Result<Option<User>, StoreError> {
        Err(StoreError::Database("connection refused".to_string()))
    }

    async fn find_by_id(&self, _: i64) -> Result<Option<User>, StoreError> {
        Err(StoreError::Database("connection refused".to_string()))
    }

    async fn set_role(&self, _: i64, _: UserRole) -> Result<Option<User>, StoreError> {
        Err(StoreError::Database("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Timeout)
    }
}

#[tokio::test]
async fn test_store_failure_is_not_anonymous() {
    let state = test_state(Arc::new(FailingStore), TokenTransport::Cookie);
    let token = state
        .codec
        .encode(1, UserRole::User, Utc::now(), Duration::hours(1))
        .unwrap();
    let app = create_router(state);

    let response = app
        .oneshot(get_with_cookie("/auth/me", Some(cookie_for(&token).as_str())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert_eq!(json["code"], "DATABASE_ERROR");
    // Storage details are not echoed to the client
    assert!(!json.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_store_failure_on_login() {
    let app = create_router(test_state(Arc::new(FailingStore), TokenTransport::Cookie));

    let response = app
        .oneshot(create_json_request(
            "POST",
            "/auth/login",
            Some(json!({"email": "a@example.com", "password": "pw"})),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_readiness_reports_store_down() {
    let app = create_router(test_state(Arc::new(FailingStore), TokenTransport::Cookie));

    let response = app
        .oneshot(get_with_cookie("/ready", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["ready"], false);
}

#[test]
fn test_state_requires_signing_key() {
    let mut config = test_config(TokenTransport::Cookie);
    config.auth.jwt_secret = None;
    let hasher = Arc::new(Argon2Hasher::new(&config.auth.password).unwrap());

    let result = AppState::new(config, Arc::new(MemoryUserStore::new()), hasher);
    assert!(result.is_err());
}

#[test]
fn test_state_rejects_unbounded_token_ttl() {
    for ttl in [u64::MAX, 9_223_372_036_854_775_808] {
        let mut config = test_config(TokenTransport::Cookie);
        config.auth.token_ttl_secs = ttl;
        let hasher = Arc::new(Argon2Hasher::new(&config.auth.password).unwrap());

        let result = AppState::new(config, Arc::new(MemoryUserStore::new()), hasher);
        assert!(result.is_err(), "ttl {ttl} accepted");
    }
}
