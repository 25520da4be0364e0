use super::*;
use crate::api::ApiConfig;
use crate::store::{LOGIN_PATH, MemoryStore, RecordingNavigator};
use crate::testing::{spawn_stub, token_expiring_in};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// =============================================================================
// STUB BACKEND
// =============================================================================

#[derive(Default)]
struct Backend {
    me_calls: AtomicUsize,
    reject_me: AtomicBool,
    null_identity: AtomicBool,
}

type Shared = Arc<Backend>;

fn user_json(first_name: &str) -> Value {
    json!({
        "id": "42",
        "email": "wanjiru@example.com",
        "username": "wanjiru",
        "firstName": first_name,
        "lastName": "Kamau",
        "role": "user",
        "isVerified": null,
        "createdAt": null
    })
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["password"] != "secret" {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Invalid email or password" }))).into_response();
    }
    Json(json!({
        "user": user_json("Wanjiru"),
        "token": token_expiring_in("42", 3600),
        "refreshToken": "refresh-42"
    }))
    .into_response()
}

async fn register(Json(body): Json<Value>) -> Response {
    if body["password"] != body["confirmPassword"] {
        return (StatusCode::BAD_REQUEST, Json(json!({ "message": "Passwords do not match" }))).into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({
            "user": user_json("Wanjiru"),
            "token": token_expiring_in("42", 3600),
            "refreshToken": "refresh-42"
        })),
    )
        .into_response()
}

async fn me(State(backend): State<Shared>) -> Response {
    backend.me_calls.fetch_add(1, Ordering::SeqCst);
    if backend.reject_me.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Token has expired" }))).into_response();
    }
    let mut user = user_json("Fresh");
    if backend.null_identity.load(Ordering::SeqCst) {
        user["email"] = Value::Null;
        user["username"] = Value::Null;
    }
    Json(user).into_response()
}

async fn refresh() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "Token has been revoked" }))).into_response()
}

async fn profile(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get("authorization").is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let mut user = user_json("Wanjiru");
    if let Some(bio) = body.get("bio") {
        user["bio"] = bio.clone();
    }
    Json(user).into_response()
}

async fn start_backend() -> (String, Shared) {
    let shared = Arc::new(Backend::default());
    let router = axum::Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/me", get(me))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/profile", put(profile))
        .with_state(shared.clone());
    let base = spawn_stub(router).await;
    (format!("{base}/api"), shared)
}

fn auth_for(base_url: &str) -> (AuthSession, Arc<RecordingNavigator>) {
    let navigator = Arc::new(RecordingNavigator::new());
    let store = SessionStore::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()), navigator.clone());
    let api = ApiClient::new(ApiConfig::default().with_base_url(base_url), store).expect("client");
    (AuthSession::new(api), navigator)
}

fn credentials(password: &str) -> LoginCredentials {
    LoginCredentials { email: "wanjiru@example.com".into(), password: password.into() }
}

fn seed_signed_in(auth: &AuthSession, last_check: i64) {
    let store = auth.api().store();
    store.set_tokens(&token_expiring_in("42", 3600), "refresh-42").expect("seed tokens");
    let cached: User = serde_json::from_value(user_json("Cached")).expect("user");
    store.set_cached_user(&cached).expect("seed user");
    store.touch_auth_check(last_check).expect("seed check");
}

// =============================================================================
// login / register / logout
// =============================================================================

#[tokio::test]
async fn login_stores_tokens_and_profile() {
    let (base, _backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);

    let user = auth.login(&credentials("secret")).await.expect("login");

    assert_eq!(user.first_name, "Wanjiru");
    let session = auth.api().store().get().expect("session stored");
    assert_eq!(session.refresh_token, "refresh-42");
    assert_eq!(session.cached_user, Some(user));
    assert!(auth.api().store().last_auth_check().is_some());
}

#[tokio::test]
async fn rejected_login_keeps_storage_empty() {
    let (base, _backend) = start_backend().await;
    let (auth, navigator) = auth_for(&base);

    let err = auth.login(&credentials("wrong")).await.expect_err("bad password");

    assert!(matches!(&err, ApiError::Backend { status: 401, message } if message == "Invalid email or password"));
    assert!(auth.api().store().get().is_none());
    assert!(navigator.visits().is_empty());
}

#[tokio::test]
async fn register_does_not_sign_in() {
    let (base, _backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);
    let form = RegisterCredentials {
        email: "wanjiru@example.com".into(),
        password: "secret".into(),
        confirm_password: "secret".into(),
        first_name: "Wanjiru".into(),
        last_name: "Kamau".into(),
        username: "wanjiru".into(),
        age: 27,
        role: None,
    };

    let user = auth.register(&form).await.expect("register");

    assert_eq!(user.id, "42");
    assert!(auth.api().store().access_token().is_none());
    assert!(auth.api().store().cached_user().is_none());
}

#[tokio::test]
async fn logout_clears_without_navigating() {
    let (base, _backend) = start_backend().await;
    let (auth, navigator) = auth_for(&base);
    seed_signed_in(&auth, now_millis());

    auth.logout();

    assert!(auth.api().store().get().is_none());
    assert!(auth.api().store().cached_user().is_none());
    assert!(navigator.visits().is_empty());
}

// =============================================================================
// check_auth
// =============================================================================

#[tokio::test]
async fn check_auth_without_token_is_none_and_offline() {
    let (base, backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);

    assert!(auth.check_auth().await.is_none());
    assert_eq!(backend.me_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn check_auth_serves_recent_cache() {
    let (base, backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);
    seed_signed_in(&auth, now_millis());

    let user = auth.check_auth().await.expect("cached user");

    assert_eq!(user.first_name, "Cached");
    assert_eq!(backend.me_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn check_auth_refetches_when_cache_is_stale() {
    let (base, backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);
    seed_signed_in(&auth, 0);

    let user = auth.check_auth().await.expect("fetched user");

    assert_eq!(user.first_name, "Fresh");
    assert_eq!(backend.me_calls.load(Ordering::SeqCst), 1);
    assert_eq!(auth.api().store().cached_user().map(|u| u.first_name).as_deref(), Some("Fresh"));
    assert!(auth.api().store().last_auth_check().is_some_and(|t| t > 0));
}

#[tokio::test]
async fn check_auth_accepts_profiles_with_null_identity_fields() {
    let (base, backend) = start_backend().await;
    backend.null_identity.store(true, Ordering::SeqCst);
    let (auth, navigator) = auth_for(&base);
    seed_signed_in(&auth, 0);

    let user = auth.check_auth().await.expect("profile with nulls");

    assert_eq!(user.first_name, "Fresh");
    assert!(user.email.is_empty());
    assert!(auth.api().store().get().is_some(), "session must survive");
    assert_eq!(auth.api().store().cached_user(), Some(user));
    assert!(navigator.visits().is_empty());
}

#[tokio::test]
async fn check_auth_clears_session_when_backend_rejects_it() {
    let (base, backend) = start_backend().await;
    backend.reject_me.store(true, Ordering::SeqCst);
    let (auth, navigator) = auth_for(&base);
    seed_signed_in(&auth, 0);

    assert!(auth.check_auth().await.is_none());
    assert!(auth.api().store().get().is_none());
    assert!(auth.api().store().cached_user().is_none());
    assert_eq!(navigator.visits(), vec![LOGIN_PATH.to_owned()]);
}

#[tokio::test]
async fn check_auth_keeps_session_when_backend_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let (auth, navigator) = auth_for(&format!("http://{addr}/api"));
    seed_signed_in(&auth, 0);

    let user = auth.check_auth().await.expect("cached fallback");

    assert_eq!(user.first_name, "Cached");
    assert!(auth.api().store().get().is_some());
    assert!(navigator.visits().is_empty());
}

// =============================================================================
// profile
// =============================================================================

#[tokio::test]
async fn update_profile_caches_backend_copy() {
    let (base, _backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);
    seed_signed_in(&auth, now_millis());
    let update = ProfileUpdate { bio: Some("Hiking on weekends".into()), ..ProfileUpdate::default() };

    let user = auth.update_profile(&update).await.expect("profile updated");

    assert_eq!(user.bio.as_deref(), Some("Hiking on weekends"));
    assert_eq!(auth.api().store().cached_user(), Some(user));
}

#[tokio::test]
async fn update_cached_user_merges_locally() {
    let (base, backend) = start_backend().await;
    let (auth, _navigator) = auth_for(&base);
    let update = ProfileUpdate { location: Some("Nairobi".into()), ..ProfileUpdate::default() };

    assert!(auth.update_cached_user(&update).is_none(), "nothing cached yet");

    seed_signed_in(&auth, now_millis());
    let merged = auth.update_cached_user(&update).expect("merged");

    assert_eq!(merged.location.as_deref(), Some("Nairobi"));
    assert_eq!(merged.first_name, "Cached");
    assert_eq!(auth.api().store().cached_user(), Some(merged));
    assert_eq!(backend.me_calls.load(Ordering::SeqCst), 0);
}
