//! JWT access tokens and opaque refresh tokens (spec §6 "Access-token
//! envelope"). The signing primitive itself is named an out-of-scope
//! "authentication primitive" by spec §1, but issuing/verifying it is the
//! API process's job, so it lives here rather than in `obs-db`/`obs-jobs`.
//! Refresh-token hashing reuses `obs_db::hasher` verbatim — spec §9 notes
//! the "linear scan... because hashing uses a random salt" applies to
//! refresh tokens exactly as it does to passwords.

use std::task::{Context, Poll};

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error, HttpMessage,
};
use futures::future::{self, LocalBoxFuture};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use obs_db::models::{Role, User};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use obs_web::middleware::AuthenticatedUser;
use obs_web::{ApiError, ApiErrorKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub role: Role,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthTokenError {
    #[error("invalid expires_in duration: {0}")]
    BadDuration(String),
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Parses durations shaped like the `JWT_ACCESS_EXPIRES_IN` env var
/// (`"15m"`, `"1h"`, `"30s"`, `"7d"`) into seconds.
pub fn parse_duration_secs(raw: &str) -> Result<i64, AuthTokenError> {
    let raw = raw.trim();
    let (num, unit) = raw.split_at(raw.len().saturating_sub(1));
    let n: i64 = num
        .parse()
        .map_err(|_| AuthTokenError::BadDuration(raw.to_owned()))?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3_600,
        "d" => n * 86_400,
        _ => return Err(AuthTokenError::BadDuration(raw.to_owned())),
    };
    Ok(secs)
}

pub fn issue_access_token(
    user: &User,
    secret: &str,
    expires_in: &str,
) -> Result<String, AuthTokenError> {
    let now = chrono::Utc::now().timestamp();
    let ttl = parse_duration_secs(expires_in)?;
    let claims = Claims {
        sub: user.base.id,
        role: user.role,
        iat: now,
        exp: now + ttl,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_access_token(token: &str, secret: &str) -> Result<Claims, AuthTokenError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Generates a fresh opaque refresh token: the plaintext handed to the
/// client and the salted hash persisted via `RefreshTokenEntity`.
pub fn issue_refresh_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = hex::encode(bytes);
    let hash = obs_db::hasher::Sha256PasswordHasher.hash(&plaintext);
    (plaintext, hash)
}

pub fn verify_refresh_token(hash: &str, plaintext: &str) -> bool {
    obs_db::hasher::verify(hash, plaintext)
}

/// Bearer-token gate for the "private" routes (spec §6). Verifies the JWT
/// before the inner service ever runs and inserts `AuthenticatedUser` into
/// request extensions on success; short-circuits with 401 otherwise.
#[derive(Clone)]
pub struct RequireAuth {
    secret: std::sync::Arc<String>,
}

impl RequireAuth {
    pub fn new(secret: std::sync::Arc<String>) -> Self {
        Self { secret }
    }
}

impl<S, B> Transform<S> for RequireAuth
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAuthMiddleware<S>;
    type Future = LocalBoxFuture<'static, Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        let secret = self.secret.clone();
        Box::pin(future::ok(RequireAuthMiddleware { service, secret }))
    }
}

pub struct RequireAuthMiddleware<S> {
    service: S,
    secret: std::sync::Arc<String>,
}

impl<S, B> Service for RequireAuthMiddleware<S>
where
    S: Service<Request = ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Request = ServiceRequest;
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, req: ServiceRequest) -> Self::Future {
        let token = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let claims = token.and_then(|t| verify_access_token(t, &self.secret).ok());

        match claims {
            Some(claims) => {
                req.extensions_mut().insert(AuthenticatedUser { id: claims.sub });
                Box::pin(self.service.call(req))
            }
            None => {
                let err = ApiError::new(ApiErrorKind::Unauthorized);
                let body: obs_common::ApiEnvelope<()> = obs_common::ApiEnvelope::err(err.body());
                let resp = actix_web::HttpResponse::Unauthorized().json(body);
                Box::pin(future::ok(req.into_response(resp.into_body())))
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_minute_and_day_suffixes() {
        assert_eq!(parse_duration_secs("15m").unwrap(), 900);
        assert_eq!(parse_duration_secs("7d").unwrap(), 604_800);
        assert_eq!(parse_duration_secs("30s").unwrap(), 30);
    }

    #[test]
    fn issued_token_round_trips_through_verify() {
        let user = User {
            base: obs_db::models::Base {
                id: 7,
                created_at: chrono::Utc::now().naive_utc(),
                updated_at: chrono::Utc::now().naive_utc(),
                deleted_at: None,
                embedding: None,
            },
            email: "a@b.com".into(),
            password_hash: "x".into(),
            role: Role::User,
        };
        let token = issue_access_token(&user, "test-secret-test-secret-test-sec", "15m").unwrap();
        let claims = verify_access_token(&token, "test-secret-test-secret-test-sec").unwrap();
        assert_eq!(claims.sub, 7);
    }

    #[test]
    fn refresh_token_plaintext_verifies_against_its_own_hash() {
        let (plaintext, hash) = issue_refresh_token();
        assert!(verify_refresh_token(&hash, &plaintext));
        assert!(!verify_refresh_token(&hash, "wrong"));
    }
}
