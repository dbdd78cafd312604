//! The default schedule rules registered at worker start: log retention runs
//! nightly, a heartbeat runs every few minutes so `worker_stats` never goes
//! stale even with an idle job fabric, and a `PROCESS_METRICS` rule runs
//! every 15 minutes. Raw-metric aggregation itself is not a cron rule here:
//! the capture middleware's buffer flush ticker already enqueues a
//! `PROCESS_RAW_METRICS` job with the actual buffered samples on its own
//! cadence, and a cron-fired copy would only ever run with an empty payload.

use crate::job::{JobType, ScheduleRule};

pub fn defaults() -> Vec<ScheduleRule> {
    vec![
        ScheduleRule {
            id: "default-cleanup-logs".into(),
            cron: "0 0 0 * * *".into(),
            job_type: JobType::CleanupLogs,
            payload: serde_json::json!({ "retention_days": 30 }),
            enabled: true,
        },
        ScheduleRule {
            id: "default-health-check".into(),
            cron: "0 */5 * * * *".into(),
            job_type: JobType::HealthCheck,
            payload: serde_json::json!({}),
            enabled: true,
        },
        // No fixed window bounds in the payload: `process_metrics` computes
        // the trailing 15-minute window itself from the time it runs.
        ScheduleRule {
            id: "default-process-metrics".into(),
            cron: "0 */15 * * * *".into(),
            job_type: JobType::ProcessMetrics,
            payload: serde_json::json!({}),
            enabled: true,
        },
    ]
}
