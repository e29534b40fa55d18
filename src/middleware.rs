//! Request gating for the two principal kinds.
//!
//! `require_principal` is a single verification routine: find a token, verify it,
//! then hand the embedded id to a `PrincipalResolver`. The admin and flat gates
//! differ only in the resolver, and each resolver reads its own collection, so a
//! token minted for one kind never resolves on the other kind's routes.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;
use tracing::debug;

use crate::auth::TOKEN_COOKIE;
use crate::error::{ApiError, StorageError};
use crate::models::{AdminProfile, FlatProfile};
use crate::rest::AppState;
use crate::storage::Storage;

/// Looks up the principal a verified token points at.
#[async_trait]
pub trait PrincipalResolver: Clone + Send + Sync + 'static {
    /// Value attached to the request extensions on success.
    type Principal: Clone + Send + Sync + 'static;

    async fn resolve(&self, storage: &Storage, id: &str) -> Result<Option<Self::Principal>, StorageError>;

    fn not_found_message(&self) -> &'static str;
}

/// Resolves against the admin collection, stripping the password hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdminResolver;

#[async_trait]
impl PrincipalResolver for AdminResolver {
    type Principal = AdminProfile;

    async fn resolve(&self, storage: &Storage, id: &str) -> Result<Option<AdminProfile>, StorageError> {
        Ok(storage.get_admin(id)?.as_ref().map(AdminProfile::from))
    }

    fn not_found_message(&self) -> &'static str {
        "Couldn't find admin"
    }
}

/// Resolves against the flat collection with the building populated.
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatResolver;

#[async_trait]
impl PrincipalResolver for FlatResolver {
    type Principal = FlatProfile;

    async fn resolve(&self, storage: &Storage, id: &str) -> Result<Option<FlatProfile>, StorageError> {
        storage.get_flat_profile(id)
    }

    fn not_found_message(&self) -> &'static str {
        "Couldn't find flat"
    }
}

/// Middleware state: shared app state plus the resolver for this gate.
#[derive(Clone)]
pub struct Gate<R> {
    pub state: Arc<AppState>,
    pub resolver: R,
}

impl<R> Gate<R> {
    pub fn new(state: Arc<AppState>, resolver: R) -> Self {
        Self { state, resolver }
    }
}

/// Token from the session cookie, else the second word of `Authorization`.
pub fn extract_token(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    jar.get(TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(' ').nth(1))
                .filter(|token| !token.is_empty())
                .map(str::to_string)
        })
}

pub async fn require_principal<R: PrincipalResolver>(
    State(gate): State<Gate<R>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(&jar, req.headers()).ok_or_else(|| ApiError::unauthorized("Unauthorized"))?;

    let claims = gate.state.tokens.verify(&token).map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::unauthorized("Invalid token")
    })?;

    let principal = gate
        .resolver
        .resolve(&gate.state.storage, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::not_found(gate.resolver.not_found_message()))?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_cookie_wins_over_header() {
        let map = headers(&[
            (header::COOKIE, "theme=dark; token=from-cookie"),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        let jar = CookieJar::from_headers(&map);
        assert_eq!(extract_token(&jar, &map).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_header_fallback() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer from-header")]);
        let jar = CookieJar::from_headers(&map);
        assert_eq!(extract_token(&jar, &map).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_no_token() {
        let map = headers(&[(header::AUTHORIZATION, "Bearer")]);
        let jar = CookieJar::from_headers(&map);
        assert_eq!(extract_token(&jar, &map), None);

        let empty = HeaderMap::new();
        assert_eq!(extract_token(&CookieJar::from_headers(&empty), &empty), None);
    }

    #[test]
    fn test_cleared_cookie_falls_back_to_header() {
        let map = headers(&[
            (header::COOKIE, "token="),
            (header::AUTHORIZATION, "Bearer from-header"),
        ]);
        let jar = CookieJar::from_headers(&map);
        assert_eq!(extract_token(&jar, &map).as_deref(), Some("from-header"));
    }
}
