//! Data model (spec §3). Each persisted entity is a `*Record` (full row,
//! carries the shared base fields) plus a `New*` (create payload, never
//! carries base fields) — the same `results`/`params` split the teacher
//! uses in `syncstorage_db_common`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entity::{ColumnDef, ColumnKind, Entity};

macro_rules! column {
    ($name:expr, $kind:expr) => {
        ColumnDef {
            name: $name,
            kind: $kind,
        }
    };
}

/// Fields every persisted entity shares (spec §3, "All persistent entities...").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Base {
    pub id: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub embedding: Option<[f32; 16]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub base: Base,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    /// Shadow field; the gateway hashes this into `password_hash` and drops it.
    pub password: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

pub struct UserEntity;
const USER_COLUMNS: &[ColumnDef] = &[
    column!("id", ColumnKind::BigInt),
    column!("created_at", ColumnKind::Timestamp),
    column!("updated_at", ColumnKind::Timestamp),
    column!("deleted_at", ColumnKind::Timestamp),
    column!("embedding", ColumnKind::Json),
    column!("email", ColumnKind::Text),
    column!("password_hash", ColumnKind::Text),
    column!("role", ColumnKind::Text),
];
impl Entity for UserEntity {
    const TABLE: &'static str = "users";
    const COLUMNS: &'static [ColumnDef] = USER_COLUMNS;
    const TEXT_SEARCH_COLUMNS: &'static [&'static str] = &["email"];
    const PASSWORD_SHADOW: Option<(&'static str, &'static str)> = Some(("password", "password_hash"));
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    #[serde(flatten)]
    pub base: Base,
    pub token_hash: String,
    pub user_id: i64,
    pub expires_at: NaiveDateTime,
    pub device_fingerprint: Option<String>,
    pub source_ip: Option<String>,
    pub revoked_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRefreshToken {
    pub token_hash: String,
    pub user_id: i64,
    pub expires_at: NaiveDateTime,
    pub device_fingerprint: Option<String>,
    pub source_ip: Option<String>,
}

pub struct RefreshTokenEntity;
const REFRESH_TOKEN_COLUMNS: &[ColumnDef] = &[
    column!("id", ColumnKind::BigInt),
    column!("created_at", ColumnKind::Timestamp),
    column!("updated_at", ColumnKind::Timestamp),
    column!("deleted_at", ColumnKind::Timestamp),
    column!("embedding", ColumnKind::Json),
    column!("token_hash", ColumnKind::Text),
    column!("user_id", ColumnKind::BigInt),
    column!("expires_at", ColumnKind::Timestamp),
    column!("device_fingerprint", ColumnKind::Text),
    column!("source_ip", ColumnKind::Text),
    column!("revoked_at", ColumnKind::Timestamp),
];
impl Entity for RefreshTokenEntity {
    const TABLE: &'static str = "refresh_tokens";
    const COLUMNS: &'static [ColumnDef] = REFRESH_TOKEN_COLUMNS;
    const TEXT_SEARCH_COLUMNS: &'static [&'static str] = &[];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(flatten)]
    pub base: Base,
    pub source: String,
    pub level: LogLevel,
    pub message: String,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLog {
    pub source: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

pub struct LogEntity;
const LOG_COLUMNS: &[ColumnDef] = &[
    column!("id", ColumnKind::BigInt),
    column!("created_at", ColumnKind::Timestamp),
    column!("updated_at", ColumnKind::Timestamp),
    column!("deleted_at", ColumnKind::Timestamp),
    column!("embedding", ColumnKind::Json),
    column!("source", ColumnKind::Text),
    column!("level", ColumnKind::Text),
    column!("message", ColumnKind::Text),
    column!("attributes", ColumnKind::Json),
];
impl Entity for LogEntity {
    const TABLE: &'static str = "logs";
    const COLUMNS: &'static [ColumnDef] = LOG_COLUMNS;
    const TEXT_SEARCH_COLUMNS: &'static [&'static str] = &["source", "message"];
}

/// Transient: never a table, only ever in-memory or inside a job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMetric {
    pub endpoint: String,
    pub latency_ms: i64,
    pub status: u16,
    pub ts_ms: i64,
    pub request_size: Option<i64>,
    pub response_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWindow {
    #[serde(flatten)]
    pub base: Base,
    pub endpoint: String,
    pub window_start: i64,
    pub window_end: i64,
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
    /// Integer percent 0..100 — see spec §9 open question: the read API
    /// divides by 100 to return a decimal fraction.
    pub error_rate: i64,
    pub traffic_count: i64,
    pub mean_request_size: Option<f64>,
    pub mean_response_size: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMetricWindow {
    pub endpoint: String,
    pub window_start: i64,
    pub window_end: i64,
    pub p50: i64,
    pub p95: i64,
    pub p99: i64,
    pub error_rate: i64,
    pub traffic_count: i64,
    pub mean_request_size: Option<f64>,
    pub mean_response_size: Option<f64>,
}

pub struct MetricWindowEntity;
const METRIC_WINDOW_COLUMNS: &[ColumnDef] = &[
    column!("id", ColumnKind::BigInt),
    column!("created_at", ColumnKind::Timestamp),
    column!("updated_at", ColumnKind::Timestamp),
    column!("deleted_at", ColumnKind::Timestamp),
    column!("embedding", ColumnKind::Json),
    column!("endpoint", ColumnKind::Text),
    column!("window_start", ColumnKind::BigInt),
    column!("window_end", ColumnKind::BigInt),
    column!("p50", ColumnKind::BigInt),
    column!("p95", ColumnKind::BigInt),
    column!("p99", ColumnKind::BigInt),
    column!("error_rate", ColumnKind::BigInt),
    column!("traffic_count", ColumnKind::BigInt),
    column!("mean_request_size", ColumnKind::Real),
    column!("mean_response_size", ColumnKind::Real),
];
impl Entity for MetricWindowEntity {
    const TABLE: &'static str = "metric_windows";
    const COLUMNS: &'static [ColumnDef] = METRIC_WINDOW_COLUMNS;
    const TEXT_SEARCH_COLUMNS: &'static [&'static str] = &["endpoint"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoSource {
    Platform,
    Header,
    Ip,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub source: GeoSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSnapshot {
    #[serde(flatten)]
    pub base: Base,
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub user_id: Option<i64>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub response_status: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<serde_json::Value>,
    pub duration_ms: i64,
    pub geo: Geo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRequestSnapshot {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub user_id: Option<i64>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub response_status: u16,
    pub response_headers: HashMap<String, String>,
    pub response_body: Option<serde_json::Value>,
    pub duration_ms: i64,
    pub geo: Geo,
}

pub struct RequestSnapshotEntity;
const REQUEST_SNAPSHOT_COLUMNS: &[ColumnDef] = &[
    column!("id", ColumnKind::BigInt),
    column!("created_at", ColumnKind::Timestamp),
    column!("updated_at", ColumnKind::Timestamp),
    column!("deleted_at", ColumnKind::Timestamp),
    column!("embedding", ColumnKind::Json),
    column!("method", ColumnKind::Text),
    column!("path", ColumnKind::Text),
    column!("query", ColumnKind::Json),
    column!("headers", ColumnKind::Json),
    column!("body", ColumnKind::Json),
    column!("user_id", ColumnKind::BigInt),
    column!("version", ColumnKind::Text),
    column!("environment", ColumnKind::Text),
    column!("response_status", ColumnKind::Integer),
    column!("response_headers", ColumnKind::Json),
    column!("response_body", ColumnKind::Json),
    column!("duration_ms", ColumnKind::BigInt),
    column!("geo", ColumnKind::Json),
];
impl Entity for RequestSnapshotEntity {
    const TABLE: &'static str = "request_snapshots";
    const COLUMNS: &'static [ColumnDef] = REQUEST_SNAPSHOT_COLUMNS;
    const TEXT_SEARCH_COLUMNS: &'static [&'static str] = &["path", "method"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    #[serde(flatten)]
    pub base: Base,
    pub mode: WorkerMode,
    pub queue_depth: i64,
    pub in_flight: i64,
    pub scheduled_jobs: i64,
    pub available_jobs: i64,
    pub scheduled_jobs_json: serde_json::Value,
    pub available_jobs_json: serde_json::Value,
    pub last_heartbeat: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkerStats {
    pub mode: WorkerMode,
    pub queue_depth: i64,
    pub in_flight: i64,
    pub scheduled_jobs: i64,
    pub available_jobs: i64,
    pub scheduled_jobs_json: serde_json::Value,
    pub available_jobs_json: serde_json::Value,
    pub last_heartbeat: NaiveDateTime,
}

pub struct WorkerStatsEntity;
const WORKER_STATS_COLUMNS: &[ColumnDef] = &[
    column!("id", ColumnKind::BigInt),
    column!("created_at", ColumnKind::Timestamp),
    column!("updated_at", ColumnKind::Timestamp),
    column!("deleted_at", ColumnKind::Timestamp),
    column!("embedding", ColumnKind::Json),
    column!("mode", ColumnKind::Text),
    column!("queue_depth", ColumnKind::BigInt),
    column!("in_flight", ColumnKind::BigInt),
    column!("scheduled_jobs", ColumnKind::BigInt),
    column!("available_jobs", ColumnKind::BigInt),
    column!("scheduled_jobs_json", ColumnKind::Json),
    column!("available_jobs_json", ColumnKind::Json),
    column!("last_heartbeat", ColumnKind::Timestamp),
];
impl Entity for WorkerStatsEntity {
    const TABLE: &'static str = "worker_stats";
    const COLUMNS: &'static [ColumnDef] = WORKER_STATS_COLUMNS;
    const TEXT_SEARCH_COLUMNS: &'static [&'static str] = &[];
}

/// Dispatch helpers the postgres backend uses since it operates on bare
/// table names rather than generic `E: Entity` (it sits behind a `dyn
/// Backend` object, so it can't be generic over `Entity` itself).
pub fn columns_for(table: &str) -> &'static [ColumnDef] {
    match table {
        "users" => USER_COLUMNS,
        "refresh_tokens" => REFRESH_TOKEN_COLUMNS,
        "logs" => LOG_COLUMNS,
        "metric_windows" => METRIC_WINDOW_COLUMNS,
        "request_snapshots" => REQUEST_SNAPSHOT_COLUMNS,
        "worker_stats" => WORKER_STATS_COLUMNS,
        _ => &[],
    }
}

pub fn text_search_columns(table: &str) -> &'static [&'static str] {
    match table {
        "users" => &["email"],
        "logs" => &["source", "message"],
        "metric_windows" => &["endpoint"],
        "request_snapshots" => &["path", "method"],
        _ => &[],
    }
}
