//! REST API layer using Axum
//!
//! Session endpoints for admins and flat residents, plus the resource routes in
//! `resources`. Sessions travel in an httpOnly `token` cookie; the gates in
//! `middleware` also accept the token from an `Authorization` header.

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, AuthSettings, TokenService, TOKEN_COOKIE};
use crate::error::{ApiError, MessageResponse, StorageError};
use crate::middleware::{require_principal, AdminResolver, FlatResolver, Gate};
use crate::models::{Admin, AdminProfile, FlatProfile};
use crate::openapi;
use crate::resources;
use crate::storage::Storage;

/// Shared app state for REST handlers (Arc-wrapped for concurrency)
pub struct AppState {
    pub storage: Storage,
    pub tokens: TokenService,
    pub settings: AuthSettings,
}

impl AppState {
    pub fn new(storage: Storage, settings: AuthSettings) -> Self {
        Self {
            tokens: TokenService::new(&settings.jwt_key),
            storage,
            settings,
        }
    }

    /// Issue a token for `principal_id` and add it to the jar as the session cookie.
    fn start_session(&self, jar: CookieJar, principal_id: &str) -> Result<CookieJar, ApiError> {
        let token = self
            .tokens
            .issue(principal_id)
            .context("failed to issue session token")?;

        let cookie = Cookie::build((TOKEN_COOKIE, token))
            .http_only(true)
            .secure(self.settings.secure_cookies)
            .same_site(SameSite::Strict)
            .path("/");
        Ok(jar.add(cookie))
    }
}

/// Always emits an expired `token` cookie, whether or not the request carried one.
fn end_session(jar: CookieJar) -> CookieJar {
    let mut cookie = Cookie::from(TOKEN_COOKIE);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Strict);
    cookie.make_removal();
    jar.add(cookie)
}

const DUPLICATE_ADMIN: &str = "An admin with this email already exists";

#[derive(Deserialize, Debug, ToSchema)]
pub struct AdminSignUpRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct AdminSignInRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlatSignInRequest {
    pub flat_number: Option<String>,
    pub phone: Option<String>,
}

#[derive(Serialize, Debug, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlatSignInResponse {
    pub id: String,
    pub name: Option<String>,
    pub flat_number: String,
}

/// Treat absent and empty strings alike, the way the front end sends blank fields.
pub(crate) fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Create Axum router with auth and resource endpoints
pub fn create_router(storage: Storage, settings: AuthSettings) -> Router {
    let state = Arc::new(AppState::new(storage, settings));
    let admin_gate = Gate::new(state.clone(), AdminResolver);
    let flat_gate = Gate::new(state.clone(), FlatResolver);

    let auth_routes = Router::new()
        .route("/admin-sign-up", post(admin_sign_up))
        .route("/admin-sign-in", post(admin_sign_in))
        .route("/admin-sign-out", post(admin_sign_out))
        .route("/flat-sign-in", post(flat_sign_in))
        .route("/flat-sign-out", post(flat_sign_out))
        .route(
            "/admin-auth-verify",
            get(admin_auth_verify).route_layer(from_fn_with_state(
                admin_gate.clone(),
                require_principal::<AdminResolver>,
            )),
        )
        .route(
            "/flat-auth-verify",
            get(flat_auth_verify).route_layer(from_fn_with_state(
                flat_gate.clone(),
                require_principal::<FlatResolver>,
            )),
        );

    let api = Router::new()
        .nest("/auth", auth_routes)
        .merge(
            resources::admin_routes()
                .route_layer(from_fn_with_state(admin_gate, require_principal::<AdminResolver>)),
        )
        .merge(
            resources::resident_routes()
                .route_layer(from_fn_with_state(flat_gate, require_principal::<FlatResolver>)),
        );

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
        .merge(openapi::swagger_ui())
}

#[utoipa::path(
    post,
    path = "/api/auth/admin-sign-up",
    request_body = AdminSignUpRequest,
    responses(
        (status = 201, description = "Admin created, session cookie set", body = AdminProfile),
        (status = 400, description = "Missing fields or email already registered", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn admin_sign_up(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<AdminSignUpRequest>, JsonRejection>,
) -> Result<(StatusCode, CookieJar, Json<AdminProfile>), ApiError> {
    let Json(payload) = payload?;
    let (Some(username), Some(email), Some(password)) = (
        present(payload.username),
        present(payload.email),
        present(payload.password),
    ) else {
        return Err(ApiError::validation("Username, email, and password are required"));
    };

    if state.storage.find_admin_by_email(&email)?.is_some() {
        return Err(ApiError::conflict(DUPLICATE_ADMIN));
    }

    let cost = state.settings.bcrypt_cost;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
        .await
        .context("password hashing task failed")?
        .context("failed to hash password")?;

    let admin = Admin {
        id: Uuid::new_v4().to_string(),
        username,
        email,
        password_hash,
        created_at: Utc::now(),
    };

    // The email index settles races the pre-check above cannot see.
    state.storage.create_admin(&admin).map_err(|e| match e {
        StorageError::Duplicate { .. } => ApiError::conflict(DUPLICATE_ADMIN),
        other => other.into(),
    })?;

    let jar = state.start_session(jar, &admin.id)?;
    info!("Admin signed up: {} ({})", admin.email, admin.id);
    Ok((StatusCode::CREATED, jar, Json(AdminProfile::from(&admin))))
}

#[utoipa::path(
    post,
    path = "/api/auth/admin-sign-in",
    request_body = AdminSignInRequest,
    responses(
        (status = 200, description = "Signed in, session cookie set", body = AdminProfile),
        (status = 400, description = "Missing fields", body = MessageResponse),
        (status = 401, description = "Wrong password", body = MessageResponse),
        (status = 404, description = "No admin with this email", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn admin_sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<AdminSignInRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AdminProfile>), ApiError> {
    let Json(payload) = payload?;
    let (Some(email), Some(password)) = (present(payload.email), present(payload.password)) else {
        return Err(ApiError::validation("Email and password are required"));
    };

    let admin = state
        .storage
        .find_admin_by_email(&email)?
        .ok_or_else(|| ApiError::not_found("Couldn't find any admin with this email"))?;

    let stored_hash = admin.password_hash.clone();
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .context("password verification task failed")?
        .context("failed to verify password")?;

    if !valid {
        warn!("Failed admin sign-in: {}", email);
        return Err(ApiError::unauthorized("The password is invalid"));
    }

    let jar = state.start_session(jar, &admin.id)?;
    info!("Admin signed in: {} ({})", admin.email, admin.id);
    Ok((jar, Json(AdminProfile::from(&admin))))
}

/// Clears the cookie only; an already-issued token stays valid until it expires.
#[utoipa::path(
    post,
    path = "/api/auth/admin-sign-out",
    responses((status = 200, description = "Session cookie cleared", body = MessageResponse)),
    tag = "auth"
)]
pub async fn admin_sign_out(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (end_session(jar), Json(MessageResponse::new("Admin has signed out")))
}

#[utoipa::path(
    get,
    path = "/api/auth/admin-auth-verify",
    responses(
        (status = 200, description = "Session belongs to an existing admin", body = MessageResponse),
        (status = 401, description = "Missing or invalid token", body = MessageResponse),
        (status = 404, description = "Admin no longer exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn admin_auth_verify(
    admin: Option<Extension<AdminProfile>>,
) -> Result<Json<MessageResponse>, ApiError> {
    if admin.is_none() {
        return Err(ApiError::unauthorized("Unauthorized - Please sign in again"));
    }
    Ok(Json(MessageResponse::new("Admin authentication was successful")))
}

#[utoipa::path(
    post,
    path = "/api/auth/flat-sign-in",
    request_body = FlatSignInRequest,
    responses(
        (status = 200, description = "Signed in, session cookie set", body = FlatSignInResponse),
        (status = 400, description = "Missing fields", body = MessageResponse),
        (status = 404, description = "No flat with this number and phone", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn flat_sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    payload: Result<Json<FlatSignInRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<FlatSignInResponse>), ApiError> {
    let Json(payload) = payload?;
    let (Some(flat_number), Some(phone)) = (present(payload.flat_number), present(payload.phone)) else {
        return Err(ApiError::validation("Flat number and phone are required"));
    };

    let flat = state
        .storage
        .find_flat_by_credentials(&flat_number, &phone)?
        .ok_or_else(|| ApiError::not_found("Couldn't find flat resident with these credentials"))?;

    let jar = state.start_session(jar, &flat.id)?;
    info!("Flat resident signed in: {} ({})", flat.flat_number, flat.id);
    Ok((
        jar,
        Json(FlatSignInResponse {
            id: flat.id,
            name: flat.name,
            flat_number: flat.flat_number,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/flat-sign-out",
    responses((status = 200, description = "Session cookie cleared", body = MessageResponse)),
    tag = "auth"
)]
pub async fn flat_sign_out(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (end_session(jar), Json(MessageResponse::new("Flat resident has signed out")))
}

#[utoipa::path(
    get,
    path = "/api/auth/flat-auth-verify",
    responses(
        (status = 200, description = "The signed-in flat with its building", body = FlatProfile),
        (status = 401, description = "Missing or invalid token", body = MessageResponse),
        (status = 404, description = "Flat no longer exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn flat_auth_verify(
    flat: Option<Extension<FlatProfile>>,
) -> Result<Json<FlatProfile>, ApiError> {
    let Some(Extension(flat)) = flat else {
        return Err(ApiError::unauthorized("Unauthorized - Please sign in again"));
    };
    Ok(Json(flat))
}

async fn root_handler() -> &'static str {
    "Welcome to the Building Management System API"
}

/// Health check handler
async fn health_handler() -> Json<MessageResponse> {
    Json(MessageResponse::new("Building portal API healthy"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bearer, seed_building, seed_flat, send, session_cookie, sign_up_admin, test_app, TEST_JWT_KEY};
    use axum::http::Method;
    use chrono::Duration;
    use serde_json::json;

    #[tokio::test]
    async fn test_rest_health_and_root() {
        let (app, _) = test_app();

        let res = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(res.status, StatusCode::OK);

        let res = send(&app, Method::GET, "/", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_sign_up_sets_strict_http_only_cookie() {
        let (app, storage) = test_app();

        let res = send(
            &app,
            Method::POST,
            "/api/auth/admin-sign-up",
            Some(json!({"username": "manager", "email": "a@x.com", "password": "secret"})),
            None,
        )
        .await;

        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["username"], "manager");
        assert_eq!(res.body["email"], "a@x.com");
        assert!(res.body.get("passwordHash").is_none());

        let set_cookie = res.set_cookie.expect("cookie set");
        assert!(set_cookie.starts_with("token="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));
        assert!(!set_cookie.contains("Secure"));

        let stored = storage.find_admin_by_email("a@x.com").unwrap().unwrap();
        assert_ne!(stored.password_hash, "secret");
    }

    #[tokio::test]
    async fn test_admin_sign_up_requires_all_fields() {
        let (app, storage) = test_app();

        let res = send(
            &app,
            Method::POST,
            "/api/auth/admin-sign-up",
            Some(json!({"username": "manager", "email": "", "password": "secret"})),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["message"], "Username, email, and password are required");
        assert_eq!(storage.count_admins(), 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, _) = test_app();
        let res = send(&app, Method::POST, "/api/auth/admin-sign-in", Some(json!([1, 2, 3])), None).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert!(res.body["message"].is_string());
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_rejected() {
        let (app, storage) = test_app();
        sign_up_admin(&app, "a@x.com", "secret").await;

        let res = send(
            &app,
            Method::POST,
            "/api/auth/admin-sign-up",
            Some(json!({"username": "other", "email": "a@x.com", "password": "another"})),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["message"], DUPLICATE_ADMIN);
        assert!(res.set_cookie.is_none());
        assert_eq!(storage.count_admins(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sign_ups_store_one_admin() {
        let (app, storage) = test_app();
        let body = json!({"username": "racer", "email": "race@x.com", "password": "secret"});

        let (first, second) = tokio::join!(
            send(&app, Method::POST, "/api/auth/admin-sign-up", Some(body.clone()), None),
            send(&app, Method::POST, "/api/auth/admin-sign-up", Some(body.clone()), None),
        );

        let mut statuses = vec![first.status, second.status];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
        assert_eq!(storage.count_admins(), 1);
    }

    #[tokio::test]
    async fn test_admin_sign_in_then_verify() {
        let (app, _) = test_app();
        sign_up_admin(&app, "a@x.com", "secret").await;

        let res = send(
            &app,
            Method::POST,
            "/api/auth/admin-sign-in",
            Some(json!({"email": "a@x.com", "password": "secret"})),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body["id"].is_string());
        assert_eq!(res.body["email"], "a@x.com");
        assert!(res.body.get("passwordHash").is_none());

        let cookie = session_cookie(&res);
        let verify = send(&app, Method::GET, "/api/auth/admin-auth-verify", None, Some(&cookie)).await;
        assert_eq!(verify.status, StatusCode::OK);
        assert_eq!(verify.body["message"], "Admin authentication was successful");
    }

    #[tokio::test]
    async fn test_admin_sign_in_wrong_password() {
        let (app, _) = test_app();
        sign_up_admin(&app, "a@x.com", "secret").await;

        let res = send(
            &app,
            Method::POST,
            "/api/auth/admin-sign-in",
            Some(json!({"email": "a@x.com", "password": "wrong"})),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body, json!({"message": "The password is invalid"}));
        assert!(res.set_cookie.is_none());
    }

    #[tokio::test]
    async fn test_admin_sign_in_unknown_email_and_missing_fields() {
        let (app, _) = test_app();

        let res = send(
            &app,
            Method::POST,
            "/api/auth/admin-sign-in",
            Some(json!({"email": "nobody@x.com", "password": "secret"})),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);

        let res = send(&app, Method::POST, "/api/auth/admin-sign-in", Some(json!({"email": "a@x.com"})), None).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["message"], "Email and password are required");
    }

    #[tokio::test]
    async fn test_sign_out_does_not_revoke_token() {
        let (app, _) = test_app();
        let cookie = sign_up_admin(&app, "a@x.com", "secret").await;

        let res = send(&app, Method::POST, "/api/auth/admin-sign-out", None, Some(&cookie)).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["message"], "Admin has signed out");
        let cleared = res.set_cookie.expect("removal cookie");
        assert!(cleared.starts_with("token=;"));
        assert!(cleared.contains("Max-Age=0"));

        // Tokens are stateless: the old one keeps working until it expires.
        let verify = send(&app, Method::GET, "/api/auth/admin-auth-verify", None, Some(&cookie)).await;
        assert_eq!(verify.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_verify_without_or_with_bad_token() {
        let (app, _) = test_app();

        let res = send(&app, Method::GET, "/api/auth/admin-auth-verify", None, None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["message"], "Unauthorized");

        let res = send(&app, Method::GET, "/api/auth/admin-auth-verify", None, Some("token=not-a-jwt")).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
        assert_eq!(res.body["message"], "Invalid token");
    }

    #[tokio::test]
    async fn test_bearer_header_fallback_and_expiry() {
        let (app, storage) = test_app();
        sign_up_admin(&app, "a@x.com", "secret").await;
        let admin_id = storage.find_admin_by_email("a@x.com").unwrap().unwrap().id;
        let tokens = TokenService::new(TEST_JWT_KEY);

        let fresh = tokens.issue_at(&admin_id, Utc::now() - Duration::minutes(59)).unwrap();
        let res = bearer(&app, "/api/auth/admin-auth-verify", &fresh).await;
        assert_eq!(res.status, StatusCode::OK);

        let stale = tokens.issue_at(&admin_id, Utc::now() - Duration::minutes(61)).unwrap();
        let res = bearer(&app, "/api/auth/admin-auth-verify", &stale).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_flat_sign_in_and_verify_populates_building() {
        let (app, storage) = test_app();
        let building = seed_building(&storage, "B-1");
        seed_flat(&storage, &building.id, "A-101", "01711111111");
        seed_flat(&storage, &building.id, "A-102", "01711111111");

        let res = send(
            &app,
            Method::POST,
            "/api/auth/flat-sign-in",
            Some(json!({"flatNumber": "A-101", "phone": "01711111111"})),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["flatNumber"], "A-101");
        assert_eq!(res.body["name"], "Resident A-101");
        assert!(res.body["id"].is_string());

        let cookie = session_cookie(&res);
        let verify = send(&app, Method::GET, "/api/auth/flat-auth-verify", None, Some(&cookie)).await;
        assert_eq!(verify.status, StatusCode::OK);
        assert_eq!(verify.body["flatNumber"], "A-101");
        assert_eq!(verify.body["building"]["buildingNumber"], "B-1");
    }

    #[tokio::test]
    async fn test_flat_sign_in_requires_exact_pair() {
        let (app, storage) = test_app();
        let building = seed_building(&storage, "B-1");
        seed_flat(&storage, &building.id, "A-101", "01711111111");

        for body in [
            json!({"flatNumber": "A-101", "phone": "01799999999"}),
            json!({"flatNumber": "A-102", "phone": "01711111111"}),
        ] {
            let res = send(&app, Method::POST, "/api/auth/flat-sign-in", Some(body), None).await;
            assert_eq!(res.status, StatusCode::NOT_FOUND);
            assert!(res.set_cookie.is_none());
        }

        let res = send(&app, Method::POST, "/api/auth/flat-sign-in", Some(json!({"flatNumber": "A-101"})), None).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["message"], "Flat number and phone are required");
    }

    #[tokio::test]
    async fn test_principal_kinds_are_not_interchangeable() {
        let (app, storage) = test_app();
        let admin_cookie = sign_up_admin(&app, "a@x.com", "secret").await;
        let building = seed_building(&storage, "B-1");
        seed_flat(&storage, &building.id, "A-101", "017");

        let res = send(&app, Method::GET, "/api/auth/flat-auth-verify", None, Some(&admin_cookie)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body["message"], "Couldn't find flat");

        let flat_res = send(
            &app,
            Method::POST,
            "/api/auth/flat-sign-in",
            Some(json!({"flatNumber": "A-101", "phone": "017"})),
            None,
        )
        .await;
        let flat_cookie = session_cookie(&flat_res);
        let res = send(&app, Method::GET, "/api/auth/admin-auth-verify", None, Some(&flat_cookie)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body["message"], "Couldn't find admin");
    }

    #[tokio::test]
    async fn test_deleted_flat_invalidates_outstanding_token() {
        let (app, storage) = test_app();
        let building = seed_building(&storage, "B-1");
        let flat = seed_flat(&storage, &building.id, "A-101", "017");

        let res = send(
            &app,
            Method::POST,
            "/api/auth/flat-sign-in",
            Some(json!({"flatNumber": "A-101", "phone": "017"})),
            None,
        )
        .await;
        let cookie = session_cookie(&res);

        storage.delete_flat(&flat.id).unwrap();
        let res = send(&app, Method::GET, "/api/auth/flat-auth-verify", None, Some(&cookie)).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_flat_sign_out_clears_cookie() {
        let (app, _) = test_app();
        let res = send(&app, Method::POST, "/api/auth/flat-sign-out", None, None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["message"], "Flat resident has signed out");
        assert!(res.set_cookie.unwrap().contains("Max-Age=0"));
    }
}
