//! Helpers for router tests: a temporary store, request plumbing, seed records.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceExt; // For .oneshot() testing
use uuid::Uuid;

use crate::auth::AuthSettings;
use crate::models::{Building, Flat};
use crate::rest::create_router;
use crate::storage::Storage;

pub const TEST_JWT_KEY: &str = "test-secret-key-12345";

pub struct TestResponse {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub body: Value,
}

pub fn test_app() -> (Router, Storage) {
    let storage = Storage::temporary().expect("temporary storage");
    let settings = AuthSettings {
        jwt_key: TEST_JWT_KEY.to_string(),
        bcrypt_cost: 4, // bcrypt minimum keeps tests fast
        secure_cookies: false,
    };
    (create_router(storage.clone(), settings), storage)
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    cookie: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    dispatch(app, request).await
}

/// GET with the token in an `Authorization: Bearer` header instead of a cookie.
pub async fn bearer(app: &Router, uri: &str, token: &str) -> TestResponse {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    dispatch(app, request).await
}

async fn dispatch(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    TestResponse { status, set_cookie, body }
}

/// `token=...` pair from a response's Set-Cookie, ready for a Cookie header.
pub fn session_cookie(res: &TestResponse) -> String {
    let set_cookie = res.set_cookie.as_deref().expect("session cookie");
    set_cookie.split(';').next().unwrap().to_string()
}

/// Sign up an admin and return its session cookie.
pub async fn sign_up_admin(app: &Router, email: &str, password: &str) -> String {
    let res = send(
        app,
        Method::POST,
        "/api/auth/admin-sign-up",
        Some(json!({"username": "manager", "email": email, "password": password})),
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::CREATED);
    session_cookie(&res)
}

pub fn seed_building(storage: &Storage, number: &str) -> Building {
    let building = Building {
        id: Uuid::new_v4().to_string(),
        building_number: number.to_string(),
        name: Some(format!("Building {number}")),
        created_at: Utc::now(),
    };
    storage.create_building(&building).expect("seed building");
    building
}

pub fn seed_flat(storage: &Storage, building_id: &str, number: &str, phone: &str) -> Flat {
    let now = Utc::now();
    let flat = Flat {
        id: Uuid::new_v4().to_string(),
        flat_number: number.to_string(),
        building_id: building_id.to_string(),
        name: Some(format!("Resident {number}")),
        phone: Some(phone.to_string()),
        owner_name: None,
        owner_phone: None,
        owner_email: None,
        renter_name: None,
        renter_phone: None,
        renter_email: None,
        is_occupied: true,
        created_at: now,
        updated_at: now,
    };
    storage.create_flat(&flat).expect("seed flat");
    flat
}
