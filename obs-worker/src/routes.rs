//! The worker's operator-facing HTTP surface (spec §4.E "Worker HTTP
//! surface"): job-type introspection, queue/scheduler/heartbeat stats, a
//! manual enqueue escape hatch, and a health probe. None of this goes
//! through `obs-web`'s public-API CORS/CSRF/geo stack — it reuses only the
//! error envelope and metrics middleware, since this surface is meant for
//! operators and dashboards, not end users.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use obs_db::models::WorkerStats;
use obs_db::{ListParams, Order};
use obs_jobs::JobType;
use obs_web::{ApiError, ApiErrorKind};
use serde::{Deserialize, Serialize};

use crate::server::WorkerState;

#[derive(Debug, Serialize)]
pub struct JobTypeInfo {
    pub job_type: &'static str,
    pub human_name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub default_max_attempts: u32,
}

/// `GET /worker/jobs`: the handler registry rendered as plain data, the way
/// an operator dashboard would list available job types.
pub async fn list_jobs(state: web::Data<WorkerState>) -> HttpResponse {
    let jobs: Vec<JobTypeInfo> = [
        JobType::ProcessRawMetrics,
        JobType::ProcessMetrics,
        JobType::CleanupLogs,
        JobType::HealthCheck,
    ]
    .iter()
    .filter_map(|jt| {
        state.registry.get(*jt).map(|entry| JobTypeInfo {
            job_type: jt.as_str(),
            human_name: entry.human_name,
            description: entry.description,
            category: entry.category,
            default_max_attempts: entry.default_max_attempts,
        })
    })
    .collect();
    HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(jobs))
}

/// `GET /worker/queue/stats`: depth/in-flight/mode straight off the queue.
pub async fn queue_stats(state: web::Data<WorkerState>) -> Result<HttpResponse, ApiError> {
    use obs_jobs::Queue;
    let stats = state
        .queue
        .stats()
        .await
        .map_err(|e| ApiError::new(ApiErrorKind::Internal(e.to_string())))?;
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(stats)))
}

/// `GET /worker/scheduler/jobs`: the registered cron rules, including the
/// defaults registered at startup.
pub async fn scheduler_jobs(state: web::Data<WorkerState>) -> Result<HttpResponse, ApiError> {
    use obs_jobs::Scheduler;
    let rules = state
        .scheduler
        .list()
        .await
        .map_err(|e| ApiError::new(ApiErrorKind::Internal(e.to_string())))?;
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(rules)))
}

/// `GET /worker/stats`: the latest `WorkerStats` heartbeat row.
pub async fn worker_stats(state: web::Data<WorkerState>) -> Result<HttpResponse, ApiError> {
    let (rows, _) = state
        .worker_stats
        .list::<WorkerStats>(ListParams {
            limit: 1,
            order_by: "id".to_owned(),
            order: Order::Desc,
            ..Default::default()
        })
        .await?;
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(rows.into_iter().next())))
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub job_type: JobType,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    pub max_attempts: Option<u32>,
    pub delay_secs: Option<i64>,
}

fn default_payload() -> serde_json::Value {
    serde_json::json!({})
}

/// `POST /jobs/enqueue`: the manual escape hatch named in spec §4.E,
/// accepting the same job-type union the scheduler and buffer ticker use.
pub async fn enqueue(
    state: web::Data<WorkerState>,
    body: web::Json<EnqueueRequest>,
) -> Result<HttpResponse, ApiError> {
    use obs_jobs::Queue;
    let body = body.into_inner();
    let opts = obs_jobs::EnqueueOptions {
        max_attempts: body.max_attempts,
        delay: body.delay_secs.map(chrono::Duration::seconds),
        scheduled_for: None,
    };
    let job = state
        .queue
        .enqueue(body.job_type, body.payload, opts)
        .await
        .map_err(|e| ApiError::new(ApiErrorKind::Internal(e.to_string())))?;
    Ok(HttpResponse::Accepted().json(obs_common::ApiEnvelope::ok(job)))
}

/// spec §4.E: "worker.heartbeat_age >= 300s" classifies the worker unhealthy.
const HEARTBEAT_STALE_AFTER_SECS: i64 = 300;

#[derive(Debug, Serialize)]
struct WorkerHealthReport {
    status: &'static str,
    database: bool,
    queue_depth: i64,
    last_heartbeat: Option<chrono::NaiveDateTime>,
    heartbeat_age_secs: Option<i64>,
}

/// `GET /health`: mirrors the API process's own `/health` aggregation
/// (database ping + heartbeat staleness, spec §4.E) but scoped to this
/// worker's own queue/backend instances. `unhealthy` (503) means the
/// database ping failed; a stale or missing heartbeat with a healthy
/// database is only `degraded` (200).
pub async fn health(state: web::Data<WorkerState>) -> Result<HttpResponse, ApiError> {
    use obs_db::Backend;
    use obs_jobs::Queue;

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
    let age_secs = latest.as_ref().map(|w| (now - w.last_heartbeat).num_seconds());
    let worker_healthy = matches!(age_secs, Some(age) if age < HEARTBEAT_STALE_AFTER_SECS);
    let queue_depth = state.queue.stats().await.map(|s| s.depth).unwrap_or(-1);

    let status = if !database {
        "unhealthy"
    } else if !worker_healthy {
        "degraded"
    } else {
        "healthy"
    };

    let report = WorkerHealthReport {
        status,
        database,
        queue_depth,
        last_heartbeat: latest.map(|w| w.last_heartbeat),
        heartbeat_age_secs: age_secs,
    };

    if report.status == "unhealthy" {
        return Err(ApiError::new(ApiErrorKind::ServiceUnavailable(
            "database ping failed".to_owned(),
        )));
    }
    Ok(HttpResponse::Ok().json(obs_common::ApiEnvelope::ok(report)))
}
