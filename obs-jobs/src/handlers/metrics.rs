//! `PROCESS_RAW_METRICS` / `PROCESS_METRICS` job handlers (spec §4.D "windowed
//! metric aggregator"). The raw buffer is flushed into this job's payload by
//! the capture middleware in `obs-web`; this module only does the windowing
//! and percentile math and upserts the resulting `MetricWindow` rows.

use std::sync::Arc;

use obs_common::WINDOW_WIDTH_MS;
use obs_db::{Gateway, ListParams, Order};
use validator::Validate;

use crate::error::JobError;

#[derive(Debug, Clone, serde::Deserialize, Validate)]
pub struct RawMetricIn {
    #[validate(length(min = 1))]
    pub endpoint: String,
    #[validate(range(min = 0))]
    pub latency_ms: i64,
    pub status: u16,
    pub ts_ms: i64,
    pub request_size: Option<i64>,
    pub response_size: Option<i64>,
}

#[derive(Debug, Clone, serde::Deserialize, Validate)]
pub struct ProcessRawMetricsPayload {
    #[validate]
    pub metrics: Vec<RawMetricIn>,
}

fn window_start(ts_ms: i64) -> i64 {
    (ts_ms.div_euclid(WINDOW_WIDTH_MS)) * WINDOW_WIDTH_MS
}

/// `p`-th percentile of `latencies` (must already be sorted ascending), via
/// `sorted[ceil(p/100*n)-1]` floored at 0 (spec §4.D, percentile formula).
fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len() as f64;
    let idx = ((p / 100.0) * n).ceil() as i64 - 1;
    sorted[idx.max(0) as usize]
}

struct Bucket {
    endpoint: String,
    window_start: i64,
    latencies: Vec<i64>,
    errors: i64,
    total: i64,
    request_sizes: Vec<i64>,
    response_sizes: Vec<i64>,
}

/// Partitions raw samples by `(endpoint, window_start)`, computes p50/p95/p99,
/// error rate, and mean sizes per bucket, and upserts one `MetricWindow` row
/// per bucket (get-first-by-endpoint-and-window-start then update else
/// create — spec §9's resolution for "what happens when two batches land in
/// the same window").
pub async fn process_raw_metrics(
    payload: serde_json::Value,
    gateway: &Gateway<obs_db::models::MetricWindowEntity>,
) -> Result<usize, JobError> {
    let parsed: ProcessRawMetricsPayload = serde_json::from_value(payload)
        .map_err(|e| JobError::InvalidPayload(e.to_string()))?;
    parsed
        .validate()
        .map_err(|e| JobError::InvalidPayload(e.to_string()))?;

    let mut buckets: std::collections::HashMap<(String, i64), Bucket> =
        std::collections::HashMap::new();
    for m in parsed.metrics {
        let ws = window_start(m.ts_ms);
        let bucket = buckets
            .entry((m.endpoint.clone(), ws))
            .or_insert_with(|| Bucket {
                endpoint: m.endpoint.clone(),
                window_start: ws,
                latencies: Vec::new(),
                errors: 0,
                total: 0,
                request_sizes: Vec::new(),
                response_sizes: Vec::new(),
            });
        bucket.latencies.push(m.latency_ms);
        bucket.total += 1;
        if m.status >= 400 {
            bucket.errors += 1;
        }
        if let Some(sz) = m.request_size {
            bucket.request_sizes.push(sz);
        }
        if let Some(sz) = m.response_size {
            bucket.response_sizes.push(sz);
        }
    }

    let mut written = 0usize;
    for (_, mut bucket) in buckets {
        bucket.latencies.sort_unstable();
        let p50 = percentile(&bucket.latencies, 50.0);
        let p95 = percentile(&bucket.latencies, 95.0);
        let p99 = percentile(&bucket.latencies, 99.0);
        let error_rate = if bucket.total == 0 {
            0
        } else {
            ((bucket.errors * 100) as f64 / bucket.total as f64).round() as i64
        };
        let mean_request_size = mean(&bucket.request_sizes);
        let mean_response_size = mean(&bucket.response_sizes);

        let mut filters = std::collections::HashMap::new();
        filters.insert("endpoint__eq".to_owned(), serde_json::json!(bucket.endpoint));
        filters.insert(
            "window_start__eq".to_owned(),
            serde_json::json!(bucket.window_start),
        );
        let existing: Option<obs_db::models::MetricWindow> = gateway
            .get_first(filters, "id", Order::Asc)
            .await
            .map_err(JobError::Db)?;

        let window_end = bucket.window_start + WINDOW_WIDTH_MS;
        if let Some(existing) = existing {
            let combined_traffic = existing.traffic_count + bucket.total;
            let values = obs_db::models::NewMetricWindow {
                endpoint: bucket.endpoint.clone(),
                window_start: bucket.window_start,
                window_end,
                p50: blend(existing.p50, p50, existing.traffic_count, bucket.total),
                p95: blend(existing.p95, p95, existing.traffic_count, bucket.total),
                p99: blend(existing.p99, p99, existing.traffic_count, bucket.total),
                error_rate: blend(
                    existing.error_rate,
                    error_rate,
                    existing.traffic_count,
                    bucket.total,
                ),
                traffic_count: combined_traffic,
                mean_request_size: blend_opt(
                    existing.mean_request_size,
                    mean_request_size,
                    existing.traffic_count,
                    bucket.total,
                ),
                mean_response_size: blend_opt(
                    existing.mean_response_size,
                    mean_response_size,
                    existing.traffic_count,
                    bucket.total,
                ),
            };
            let _: Option<obs_db::models::MetricWindow> = gateway
                .update(existing.base.id, values)
                .await
                .map_err(JobError::Db)?;
        } else {
            let values = obs_db::models::NewMetricWindow {
                endpoint: bucket.endpoint.clone(),
                window_start: bucket.window_start,
                window_end,
                p50,
                p95,
                p99,
                error_rate,
                traffic_count: bucket.total,
                mean_request_size,
                mean_response_size,
            };
            let _: obs_db::models::MetricWindow =
                gateway.create(values).await.map_err(JobError::Db)?;
        }
        written += 1;
    }
    Ok(written)
}

fn mean(values: &[i64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<i64>() as f64 / values.len() as f64)
}

fn blend(old: i64, new: i64, old_n: i64, new_n: i64) -> i64 {
    let total = old_n + new_n;
    if total == 0 {
        return new;
    }
    ((old * old_n) + (new * new_n)) / total
}

fn blend_opt(old: Option<f64>, new: Option<f64>, old_n: i64, new_n: i64) -> Option<f64> {
    match (old, new) {
        (Some(o), Some(n)) => {
            let total = (old_n + new_n) as f64;
            if total == 0.0 {
                Some(n)
            } else {
                Some(((o * old_n as f64) + (n * new_n as f64)) / total)
            }
        }
        (Some(o), None) => Some(o),
        (None, Some(n)) => Some(n),
        (None, None) => None,
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ProcessMetricsPayload {
    pub window_start: Option<i64>,
    pub window_end: Option<i64>,
}

/// `PROCESS_METRICS` is a lighter companion job: given `[windowStart,
/// windowEnd]` it would re-aggregate any missing windows from
/// already-persisted snapshots/logs. Spec §4.D permits a minimal
/// implementation here, documented as a hook; when the default 15-minute
/// cron rule fires with no explicit bounds, the trailing 15-minute range is
/// derived from the current time so the hook still has a concrete window to
/// act on once re-aggregation logic is added.
pub async fn process_metrics(
    payload: serde_json::Value,
    _gateway: &Gateway<obs_db::models::MetricWindowEntity>,
) -> Result<(), JobError> {
    let parsed: ProcessMetricsPayload =
        serde_json::from_value(payload).map_err(|e| JobError::InvalidPayload(e.to_string()))?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let window_end = parsed.window_end.unwrap_or(now_ms);
    let window_start = parsed.window_start.unwrap_or(window_end - 15 * 60 * 1000);
    trace!(
        "process_metrics hook covering window [{}, {})",
        window_start,
        window_end
    );
    Ok(())
}

pub type MetricWindowGateway = Arc<Gateway<obs_db::models::MetricWindowEntity>>;

#[cfg(test)]
mod test {
    use super::*;
    use obs_db::MockBackend;
    use std::sync::Arc as StdArc;

    fn gateway() -> Gateway<obs_db::models::MetricWindowEntity> {
        Gateway::new(StdArc::new(MockBackend::new()))
    }

    #[tokio::test]
    async fn aggregates_three_requests_into_one_window() {
        let gw = gateway();
        let payload = serde_json::json!({
            "metrics": [
                {"endpoint": "/a", "latency_ms": 10, "status": 200, "ts_ms": 1_000},
                {"endpoint": "/a", "latency_ms": 20, "status": 200, "ts_ms": 2_000},
                {"endpoint": "/a", "latency_ms": 30, "status": 500, "ts_ms": 3_000},
            ]
        });
        let written = process_raw_metrics(payload, &gw).await.unwrap();
        assert_eq!(written, 1);

        let mut filters = std::collections::HashMap::new();
        filters.insert("endpoint__eq".to_owned(), serde_json::json!("/a"));
        let row: Option<obs_db::models::MetricWindow> = gw
            .get_first(filters, "id", Order::Asc)
            .await
            .unwrap();
        let row = row.unwrap();
        assert_eq!(row.traffic_count, 3);
        assert_eq!(row.p50, 20);
        assert_eq!(row.error_rate, 33);
    }

    #[tokio::test]
    async fn requests_outside_window_width_split_into_two_windows() {
        let gw = gateway();
        let payload = serde_json::json!({
            "metrics": [
                {"endpoint": "/a", "latency_ms": 10, "status": 200, "ts_ms": 0},
                {"endpoint": "/a", "latency_ms": 20, "status": 200, "ts_ms": WINDOW_WIDTH_MS},
            ]
        });
        let written = process_raw_metrics(payload, &gw).await.unwrap();
        assert_eq!(written, 2);
        let (rows, total) = gw.list::<obs_db::models::MetricWindow>(ListParams::default()).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
    }
}
