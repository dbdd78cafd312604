//! The closed job-type union (spec §4.C "tagged union for job payloads") and
//! the envelope every queue variant moves around.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    ProcessRawMetrics,
    ProcessMetrics,
    CleanupLogs,
    HealthCheck,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ProcessRawMetrics => "PROCESS_RAW_METRICS",
            JobType::ProcessMetrics => "PROCESS_METRICS",
            JobType::CleanupLogs => "CLEANUP_LOGS",
            JobType::HealthCheck => "HEALTH_CHECK",
        }
    }

    /// The handler registry's `default_options.max_attempts` (spec §4.C):
    /// `HEALTH_CHECK` gets 1 (no retry on a heartbeat), everything else 3.
    /// The single source of truth for both `HandlerRegistry` (metadata) and
    /// `Queue::enqueue` (the actual fallback applied when a caller doesn't
    /// pass `max_attempts` explicitly).
    pub fn default_max_attempts(&self) -> u32 {
        match self {
            JobType::HealthCheck => 1,
            JobType::ProcessRawMetrics | JobType::ProcessMetrics | JobType::CleanupLogs => 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_attempts: Option<u32>,
    pub delay: Option<chrono::Duration>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type,
            payload,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            scheduled_for: None,
        }
    }

    /// `min(30s * 2^(attempts-1), 5min)` (spec §4.C failure semantics).
    pub fn backoff(&self) -> chrono::Duration {
        let secs = 30i64.saturating_mul(1i64 << self.attempts.saturating_sub(1).min(10));
        chrono::Duration::seconds(secs.min(300))
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub depth: i64,
    pub in_flight: i64,
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: String,
    pub cron: String,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub enabled: bool,
}

/// A dead-lettered job plus why it landed there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadJob {
    pub job: Job,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

pub type PayloadMap = HashMap<String, serde_json::Value>;
