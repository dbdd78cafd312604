//! `GET /health` (spec §4.E "health aggregation handler"): concurrently
//! pings the database and looks up the latest worker heartbeat, then rolls
//! the two up into `{healthy, degraded, unhealthy}` — `unhealthy` means the
//! database ping itself failed; a stale or missing worker heartbeat with a
//! healthy database is only `degraded`, never `unhealthy`.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use obs_db::models::WorkerStats;
use obs_db::{Backend, ListParams, Order};
use serde::Serialize;

use obs_web::{ApiError, ApiErrorKind};

use crate::server::ServerState;

/// spec §4.E: "worker.heartbeat_age >= 300s" classifies the worker unhealthy.
const HEARTBEAT_STALE_AFTER_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub database: bool,
    pub last_heartbeat: Option<chrono::NaiveDateTime>,
    pub heartbeat_age_secs: Option<i64>,
}

pub async fn health(state: web::Data<ServerState>) -> Result<HttpResponse, ApiError> {
    let (db_ping, stats_lookup) = futures::future::join(
        state.backend.ping(),
        state.worker_stats.list::<WorkerStats>(ListParams {
            limit: 1,
            order_by: "id".to_owned(),
            order: Order::Desc,
            ..Default::default()
        }),
    )
    .await;

    let database = db_ping.is_ok();
    let latest = stats_lookup.ok().and_then(|(rows, _)| rows.into_iter().next());
    let now = Utc::now().naive_utc();
    let age_secs = latest
        .as_ref()
        .map(|w| (now - w.last_heartbeat).num_seconds());
    let worker_healthy = matches!(age_secs, Some(age) if age < HEARTBEAT_STALE_AFTER_SECS);

    let status = if !database {
        HealthStatus::Unhealthy
    } else if !worker_healthy {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let report = HealthReport {
        status,
        database,
        last_heartbeat: latest.map(|w| w.last_heartbeat),
        heartbeat_age_secs: age_secs,
    };

    if report.status == HealthStatus::Unhealthy {
        return Err(ApiError::new(ApiErrorKind::ServiceUnavailable(
            "database ping failed".to_owned(),
        )));
    }

    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(report)))
}

#[cfg(test)]
mod test {
    use super::*;
    use obs_db::models::{NewWorkerStats, WorkerMode, WorkerStatsEntity};
    use obs_db::{Gateway, MockBackend};
    use std::sync::Arc;

    /// spec §4.E: a stale/missing worker heartbeat with a healthy database
    /// rolls up to `degraded`, never `unhealthy` — the two axes are
    /// independent.
    #[tokio::test]
    async fn missing_heartbeat_with_healthy_db_is_degraded_not_unhealthy() {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let worker_stats: Gateway<WorkerStatsEntity> = Gateway::new(backend.clone());
        let database = backend.ping().await.is_ok();
        let latest: Option<WorkerStats> = None;
        let now = Utc::now().naive_utc();
        let age_secs = latest
            .as_ref()
            .map(|w: &WorkerStats| (now - w.last_heartbeat).num_seconds());
        let worker_healthy = matches!(age_secs, Some(age) if age < HEARTBEAT_STALE_AFTER_SECS);
        let status = if !database {
            HealthStatus::Unhealthy
        } else if !worker_healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        assert_eq!(status, HealthStatus::Degraded);
        let _ = worker_stats
            .create::<_, WorkerStats>(NewWorkerStats {
                mode: WorkerMode::Local,
                queue_depth: 0,
                in_flight: 0,
                scheduled_jobs: 0,
                available_jobs: 0,
                scheduled_jobs_json: serde_json::json!([]),
                available_jobs_json: serde_json::json!([]),
                last_heartbeat: now - chrono::Duration::seconds(400),
            })
            .await
            .unwrap();
    }
}
