//! `/metrics` (list windows) and `/metrics/aggregate` (roll several windows
//! into one summary). Both top-level, private routes.

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use obs_common::{ApiEnvelope, Metadata};
use obs_db::models::MetricWindow;
use obs_db::{ListParams, Order};
use serde::Serialize;

use obs_web::ApiError;

use crate::server::ServerState;

const SHORTCUTS: &[(&str, &str)] = &[
    ("endpoint", "endpoint__eq"),
    ("startDate", "window_start__gte"),
    ("endDate", "window_end__lte"),
];

/// A `MetricWindow` as the read API renders it: `error_rate` comes back as
/// a `0.0..=1.0` fraction rather than the integer percent stored on disk.
#[derive(Debug, Serialize)]
pub struct MetricWindowOut {
    pub id: i64,
    pub endpoint: String,
    pub window_start: i64,
    pub window_end: i64,
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
    pub error_rate: f64,
    pub traffic_count: i64,
    pub mean_request_size: Option<f64>,
    pub mean_response_size: Option<f64>,
}

impl From<MetricWindow> for MetricWindowOut {
    fn from(m: MetricWindow) -> Self {
        Self {
            id: m.base.id,
            endpoint: m.endpoint,
            window_start: m.window_start,
            window_end: m.window_end,
            p50: m.p50,
            p95: m.p95,
            p99: m.p99,
            error_rate: m.error_rate as f64 / 100.0,
            traffic_count: m.traffic_count,
            mean_request_size: m.mean_request_size,
            mean_response_size: m.mean_response_size,
        }
    }
}

pub async fn list(
    state: web::Data<ServerState>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let params = super::list_params(&query, SHORTCUTS);
    let limit = params.limit;
    let offset = params.offset;
    let (rows, total) = state.metric_windows.list::<MetricWindow>(params).await?;
    let data: Vec<MetricWindowOut> = rows.into_iter().map(MetricWindowOut::from).collect();
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok_paginated(
        data,
        Metadata { limit, offset, total },
    )))
}

#[derive(Debug, Serialize, Default)]
pub struct MetricsAggregate {
    pub endpoint: Option<String>,
    pub window_count: i64,
    pub traffic_count: i64,
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
    pub error_rate: f64,
    pub mean_request_size: Option<f64>,
    pub mean_response_size: Option<f64>,
}

/// Traffic-weighted mean across windows — the same blend shape used to
/// reconcile two raw-metric batches landing in the same window, just
/// applied across many already-aggregated windows instead of two.
fn weighted_mean(pairs: &[(i64, i64)]) -> i64 {
    let total: i64 = pairs.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return 0;
    }
    let sum: i64 = pairs.iter().map(|(v, n)| v * n).sum();
    sum / total
}

fn weighted_mean_f(pairs: &[(f64, i64)]) -> Option<f64> {
    let total: i64 = pairs.iter().map(|(_, n)| n).sum();
    if total == 0 {
        return None;
    }
    let sum: f64 = pairs.iter().map(|(v, n)| v * *n as f64).sum();
    Some(sum / total as f64)
}

pub async fn aggregate(
    state: web::Data<ServerState>,
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let mut params = super::list_params(&query, SHORTCUTS);
    params.limit = 1000;
    let endpoint = query.get("endpoint").cloned();

    let (rows, total) = state.metric_windows.list::<MetricWindow>(params).await?;

    if rows.is_empty() {
        return Ok(HttpResponse::Ok().json(ApiEnvelope::ok(MetricsAggregate {
            endpoint,
            ..Default::default()
        })));
    }

    let traffic_count: i64 = rows.iter().map(|r| r.traffic_count).sum();
    let p50 = weighted_mean(&rows.iter().map(|r| (r.p50, r.traffic_count)).collect::<Vec<_>>());
    let p95 = weighted_mean(&rows.iter().map(|r| (r.p95, r.traffic_count)).collect::<Vec<_>>());
    let p99 = weighted_mean(&rows.iter().map(|r| (r.p99, r.traffic_count)).collect::<Vec<_>>());
    let error_rate = weighted_mean(
        &rows
            .iter()
            .map(|r| (r.error_rate, r.traffic_count))
            .collect::<Vec<_>>(),
    ) as f64
        / 100.0;
    let mean_request_size = weighted_mean_f(
        &rows
            .iter()
            .filter_map(|r| r.mean_request_size.map(|v| (v, r.traffic_count)))
            .collect::<Vec<_>>(),
    );
    let mean_response_size = weighted_mean_f(
        &rows
            .iter()
            .filter_map(|r| r.mean_response_size.map(|v| (v, r.traffic_count)))
            .collect::<Vec<_>>(),
    );

    let _ = total;
    Ok(HttpResponse::Ok().json(ApiEnvelope::ok(MetricsAggregate {
        endpoint,
        window_count: rows.len() as i64,
        traffic_count,
        p50,
        p95,
        p99,
        error_rate,
        mean_request_size,
        mean_response_size,
    })))
}

#[cfg(test)]
mod test {
    use super::*;

    /// spec §9: the storage column is an integer percent; the read path
    /// must divide by 100 before handing back a decimal fraction.
    #[test]
    fn error_rate_conversion_matches_integer_percent_boundary() {
        let window = MetricWindow {
            base: obs_db::models::Base {
                id: 1,
                created_at: chrono::Utc::now().naive_utc(),
                updated_at: chrono::Utc::now().naive_utc(),
                deleted_at: None,
                embedding: None,
            },
            endpoint: "/a".to_owned(),
            window_start: 0,
            window_end: 60_000,
            p50: 100,
            p95: 150,
            p99: 200,
            error_rate: 33,
            traffic_count: 3,
            mean_request_size: None,
            mean_response_size: None,
        };
        let out = MetricWindowOut::from(window);
        assert!((out.error_rate - 0.33).abs() < f64::EPSILON);
    }
}
