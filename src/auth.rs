use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use thiserror::Error;
use tracing::debug;

use crate::models::AuthPayload;

/// Name of the session cookie carrying the token.
pub const TOKEN_COOKIE: &str = "token";

/// Tokens expire exactly one hour after issuance; there is no refresh.
pub const TOKEN_TTL_SECS: i64 = 3600;

/// Work factor used when nothing else is configured.
pub const DEFAULT_BCRYPT_COST: u32 = 8;

/// Everything the auth boundary needs from configuration.
#[derive(Clone, Debug)]
pub struct AuthSettings {
    pub jwt_key: String,
    pub bcrypt_cost: u32,
    /// Set the cookie's `Secure` flag (production only).
    pub secure_cookies: bool,
}

#[derive(Debug, Error, PartialEq)]
pub enum TokenError {
    #[error("token is malformed or its signature does not match")]
    Invalid,

    #[error("token has expired")]
    Expired,

    #[error("failed to sign token: {0}")]
    Signing(String),
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Issues and verifies HS256 session tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // The one-hour boundary is exact.
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::seconds(TOKEN_TTL_SECS),
        }
    }

    pub fn issue(&self, principal_id: &str) -> Result<String, TokenError> {
        self.issue_at(principal_id, Utc::now())
    }

    /// Issue a token as if it had been signed at `issued_at`.
    pub fn issue_at(&self, principal_id: &str, issued_at: DateTime<Utc>) -> Result<String, TokenError> {
        let claims = AuthPayload {
            sub: principal_id.to_owned(),
            iat: issued_at.timestamp(),
            exp: (issued_at + self.ttl).timestamp(),
        };

        debug!("Issuing token for principal {}", principal_id);
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<AuthPayload, TokenError> {
        decode::<AuthPayload>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })
    }
}
