//! `/replay` (list captured snapshots), `/replay/{id}` (fetch one), and
//! `/replay/{id}/replay` (re-issue it against a live base URL).

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use obs_common::{ApiEnvelope, Metadata};
use obs_db::models::RequestSnapshot;
use serde::Deserialize;

use obs_web::replay::{replay as execute_replay, ReplayError};
use obs_web::{ApiError, ApiErrorKind};

use crate::server::ServerState;

const SHORTCUTS: &[(&str, &str)] = &[
    ("method", "method__eq"),
    ("path", "path__eq"),
    ("statusCode", "response_status__eq"),
    ("startDate", "created_at__gte"),
    ("endDate", "created_at__lte"),
];

pub async fn list(
    state: web::Data<ServerState>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let params = super::list_params(&query, SHORTCUTS);
    let limit = params.limit;
    let offset = params.offset;
    let (rows, total) = state.snapshots.list::<RequestSnapshot>(params).await?;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok_paginated(
        rows,
        Metadata { limit, offset, total },
    )))
}

pub async fn get(
    state: web::Data<ServerState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let snapshot: Option<RequestSnapshot> = state.snapshots.get(path.into_inner()).await?;
    match snapshot {
        Some(s) => Ok(HttpResponse::Ok().json(ApiEnvelope::ok(s))),
        None => Err(ApiError::new(ApiErrorKind::NotFound)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub base_url: Option<String>,
}

pub async fn replay_snapshot(
    state: web::Data<ServerState>,
    path: web::Path<i64>,
    body: Option<web::Json<ReplayRequest>>,
) -> Result<HttpResponse, ApiError> {
    let snapshot: RequestSnapshot = state
        .snapshots
        .get(path.into_inner())
        .await?
        .ok_or_else(|| ApiError::new(ApiErrorKind::NotFound))?;

    let base_url = body
        .and_then(|b| b.base_url.clone())
        .or_else(|| state.settings.console_frontend_url.clone())
        .unwrap_or_else(|| format!("http://{}:{}", state.settings.host, state.settings.port));

    let result = execute_replay(&state.http_client, &base_url, &snapshot)
        .await
        .map_err(|e| match e {
            ReplayError::Blocked(_) => ApiError::new(ApiErrorKind::Forbidden(e.to_string())),
            other => ApiError::new(ApiErrorKind::BadRequest(other.to_string())),
        })?;

    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(result)))
}
