//! `/auth/*`: login issues an access+refresh token pair, refresh rotates
//! the refresh token, logout revokes it, `me` echoes the authenticated
//! principal. All four are top-level routes, not under `/api/v1`, so the
//! `Capture` middleware never instruments them.

use actix_web::{web, HttpResponse};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use obs_db::models::{NewRefreshToken, RefreshToken, User};
use obs_db::Order;
use obs_web::middleware::AuthenticatedUser;
use obs_web::{ApiError, ApiErrorKind};

use crate::auth::{issue_access_token, issue_refresh_token, verify_refresh_token};
use crate::routes::users::PublicUser;
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

/// Enforces the per-user active-session cap (spec §9 "linear scan...
/// capped by a per-user limit"): revokes the oldest active refresh tokens
/// for `user_id` so that, after the new token this call is about to issue,
/// the active count stays within `cap`.
async fn enforce_session_cap(state: &ServerState, user_id: i64, cap: u32) -> Result<(), ApiError> {
    if cap == 0 {
        return Ok(());
    }
    let mut filters = std::collections::HashMap::new();
    filters.insert("user_id__eq".to_owned(), serde_json::json!(user_id));
    filters.insert("revoked_at__isnull".to_owned(), serde_json::json!(true));
    let now = Utc::now().naive_utc();
    let params = obs_db::ListParams {
        limit: 1000,
        order_by: "id".to_owned(),
        order: Order::Asc,
        filters,
        ..Default::default()
    };
    let (active, _): (Vec<RefreshToken>, i64) = state.refresh_tokens.list(params).await?;
    let active: Vec<_> = active.into_iter().filter(|t| t.expires_at > now).collect();

    let cap = cap as usize;
    if active.len() + 1 > cap {
        let revoke_count = active.len() + 1 - cap;
        for token in active.into_iter().take(revoke_count) {
            let revoke = serde_json::json!({ "revoked_at": Utc::now().naive_utc() });
            let _: Option<RefreshToken> = state.refresh_tokens.update(token.base.id, revoke).await?;
        }
    }
    Ok(())
}

async fn issue_pair(state: &ServerState, user: &User) -> Result<TokenPair, ApiError> {
    let access_token = issue_access_token(
        user,
        &state.settings.jwt_secret,
        &state.settings.jwt_access_expires_in,
    )
    .map_err(|e| ApiError::new(ApiErrorKind::Internal(e.to_string())))?;

    enforce_session_cap(state, user.base.id, state.settings.jwt_max_active_sessions).await?;

    let (plaintext, hash) = issue_refresh_token();
    let expires_at =
        Utc::now().naive_utc() + Duration::days(state.settings.jwt_refresh_expires_in_days as i64);
    let values = NewRefreshToken {
        token_hash: hash,
        user_id: user.base.id,
        expires_at,
        device_fingerprint: None,
        source_ip: None,
    };
    let _: RefreshToken = state.refresh_tokens.create(values).await?;

    let expires_in = crate::auth::parse_duration_secs(&state.settings.jwt_access_expires_in)
        .map_err(|e| ApiError::new(ApiErrorKind::Internal(e.to_string())))?;

    Ok(TokenPair {
        access_token,
        refresh_token: plaintext,
        expires_in,
    })
}

/// Linear-scans active refresh tokens for one whose salted hash matches
/// `plaintext` — unavoidable since the hash salt means the plaintext can't
/// be looked up by equality.
async fn find_active_refresh_token(
    state: &ServerState,
    plaintext: &str,
) -> Result<Option<RefreshToken>, ApiError> {
    let mut filters = std::collections::HashMap::new();
    filters.insert("revoked_at__isnull".to_owned(), serde_json::json!(true));
    let params = obs_db::ListParams {
        limit: 1000,
        order_by: "id".to_owned(),
        order: Order::Desc,
        filters,
        ..Default::default()
    };
    let (candidates, _): (Vec<RefreshToken>, i64) = state.refresh_tokens.list(params).await?;
    let now = Utc::now().naive_utc();
    Ok(candidates
        .into_iter()
        .find(|t| t.expires_at > now && verify_refresh_token(&t.token_hash, plaintext)))
}

pub async fn login(
    state: web::Data<ServerState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut filters = std::collections::HashMap::new();
    filters.insert("email__eq".to_owned(), serde_json::json!(body.email));
    let user: Option<User> = state
        .users
        .get_first(filters, "id", Order::Asc)
        .await?;

    let user = match user {
        Some(u) if obs_db::hasher::verify(&u.password_hash, &body.password) => u,
        _ => return Err(ApiError::new(ApiErrorKind::Unauthorized)),
    };

    let pair = issue_pair(&state, &user).await?;
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(pair)))
}

pub async fn refresh(
    state: web::Data<ServerState>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let existing = find_active_refresh_token(&state, &body.refresh_token)
        .await?
        .ok_or_else(|| ApiError::new(ApiErrorKind::Unauthorized))?;

    let revoke = serde_json::json!({ "revoked_at": Utc::now().naive_utc() });
    let _: Option<RefreshToken> = state.refresh_tokens.update(existing.base.id, revoke).await?;

    let user: User = state
        .users
        .get(existing.user_id)
        .await?
        .ok_or_else(|| ApiError::new(ApiErrorKind::Unauthorized))?;

    let pair = issue_pair(&state, &user).await?;
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(pair)))
}

pub async fn logout(
    state: web::Data<ServerState>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(existing) = find_active_refresh_token(&state, &body.refresh_token).await? {
        let revoke = serde_json::json!({ "revoked_at": Utc::now().naive_utc() });
        let _: Option<RefreshToken> = state.refresh_tokens.update(existing.base.id, revoke).await?;
    }
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(())))
}

pub async fn me(
    state: web::Data<ServerState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, ApiError> {
    let found: Option<User> = state.users.get(user.id).await?;
    match found {
        Some(u) => Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(PublicUser::from(u)))),
        None => Err(ApiError::new(ApiErrorKind::Unauthorized)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use obs_db::models::{NewUser, Role};
    use obs_db::{Backend, Gateway, MockBackend, Sha256PasswordHasher};
    use obs_jobs::{LocalQueue, LocalScheduler, Queue, Scheduler};
    use obs_settings::Settings;
    use obs_web::buffer::RawMetricBuffer;
    use std::sync::Arc;

    fn state() -> web::Data<ServerState> {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::new());
        let scheduler: Arc<dyn Scheduler> = Arc::new(LocalScheduler::new(queue.clone()));
        let hasher: Arc<Sha256PasswordHasher> = Arc::new(Sha256PasswordHasher);
        web::Data::new(ServerState {
            settings: Arc::new(Settings::default()),
            users: Gateway::with_hasher(backend.clone(), hasher),
            refresh_tokens: Gateway::new(backend.clone()),
            logs: Gateway::new(backend.clone()),
            metric_windows: Gateway::new(backend.clone()),
            snapshots: Gateway::new(backend.clone()),
            worker_stats: Gateway::new(backend.clone()),
            backend,
            queue,
            scheduler,
            buffer: Arc::new(RawMetricBuffer::new(1000)),
            http_client: reqwest::Client::new(),
        })
    }

    /// Spec §8 scenario: a refresh token issued at login, revoked through
    /// `logout`, can no longer be used through `refresh` — the route that
    /// exercises `find_active_refresh_token`'s `revoked_at__isnull` filter.
    #[tokio::test]
    async fn logged_out_refresh_token_is_rejected_on_refresh() {
        let state = state();
        let user: User = state
            .users
            .create(NewUser {
                email: "a@b.com".to_owned(),
                password: "hunter22".to_owned(),
                role: Role::User,
            })
            .await
            .unwrap();

        // `issue_pair` is what `login` calls once credentials already
        // checked out; using it directly hands the test the plaintext
        // refresh token without parsing it back out of a JSON response body.
        let pair = issue_pair(&state, &user).await.unwrap();

        let logout_resp = logout(
            state.clone(),
            web::Json(RefreshRequest {
                refresh_token: pair.refresh_token.clone(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(logout_resp.status(), actix_web::http::StatusCode::OK);

        let result = refresh(
            state,
            web::Json(RefreshRequest {
                refresh_token: pair.refresh_token,
            }),
        )
        .await;
        assert!(matches!(
            result.unwrap_err().kind,
            ApiErrorKind::Unauthorized
        ));
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let state = state();
        let _: User = state
            .users
            .create(NewUser {
                email: "a@b.com".to_owned(),
                password: "correct-horse".to_owned(),
                role: Role::User,
            })
            .await
            .unwrap();

        let result = login(
            state,
            web::Json(LoginRequest {
                email: "a@b.com".to_owned(),
                password: "wrong".to_owned(),
            }),
        )
        .await;
        assert!(matches!(
            result.unwrap_err().kind,
            ApiErrorKind::Unauthorized
        ));
    }
}
