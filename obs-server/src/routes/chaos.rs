//! `GET /error?errorRate=0.1`: deliberately fails a configurable fraction
//! of calls, so the console's replay/metrics views have something to show
//! without waiting on a real incident.

use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use rand::Rng;
use serde::Serialize;

use obs_web::{ApiError, ApiErrorKind};

#[derive(Debug, Serialize)]
struct ChaosOk {
    ok: bool,
}

pub async fn error_endpoint(
    query: web::Query<HashMap<String, String>>,
) -> Result<HttpResponse, ApiError> {
    let rate: f64 = query
        .get("errorRate")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let roll: f64 = rand::thread_rng().gen();
    if roll < rate {
        let kind = match rand::thread_rng().gen_range(0..4) {
            0 => ApiErrorKind::Internal("chaos endpoint triggered a synthetic failure".to_owned()),
            1 => ApiErrorKind::Retryable("chaos endpoint triggered a synthetic failure".to_owned()),
            2 => ApiErrorKind::ServiceUnavailable(
                "chaos endpoint triggered a synthetic failure".to_owned(),
            ),
            _ => ApiErrorKind::GatewayTimeout(
                "chaos endpoint triggered a synthetic failure".to_owned(),
            ),
        };
        return Err(ApiError::new(kind));
    }

    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(ChaosOk { ok: true })))
}
