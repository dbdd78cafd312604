//! The raw-metric buffer (spec §4.A middleware #11, §9 "fire-and-forget
//! writes... replace with a bounded channel + dedicated drain routine").
//! Producers (the metrics-capture middleware) only ever push and return;
//! a single ticker-owned drain routine empties it into the job fabric.

use std::sync::Mutex;

use obs_common::{BATCH_SIZE, WINDOW_WIDTH_MS};
use obs_db::models::RawMetric;
use obs_jobs::{EnqueueOptions, JobType, Queue};
use std::sync::Arc;

/// Bounded buffer of not-yet-enqueued raw metrics. Guarded by a plain mutex
/// since producers only hold it long enough to push (spec §5 "producers
/// block only long enough to acquire the mutex and push").
pub struct RawMetricBuffer {
    inner: Mutex<Vec<RawMetric>>,
    capacity: usize,
    dropped: std::sync::atomic::AtomicU64,
}

impl RawMetricBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Appends one measurement. On overflow, drops the oldest entry and
    /// counts it (spec §9: "on overflow drop-oldest and increment a drop
    /// counter exposed via stats") rather than blocking the request path.
    pub fn push(&self, metric: RawMetric) {
        let mut buf = self.inner.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.remove(0);
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        buf.push(metric);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Drains up to `BATCH_SIZE` items from the head once the buffer has
    /// reached `2*BATCH_SIZE` (spec §4.A middleware #11). Returns `None`
    /// when there isn't enough to flush yet.
    fn take_batch(&self) -> Option<Vec<RawMetric>> {
        let mut buf = self.inner.lock().unwrap();
        if buf.len() < 2 * BATCH_SIZE {
            return None;
        }
        let tail = buf.split_off(BATCH_SIZE.min(buf.len()));
        Some(std::mem::replace(&mut *buf, tail))
    }

    /// Unconditional drain, used on process shutdown (spec §5 "flush the
    /// raw-metric buffer once").
    fn take_all(&self) -> Vec<RawMetric> {
        std::mem::take(&mut *self.inner.lock().unwrap())
    }

    /// Re-prepends a batch that failed to enqueue (spec §4.A: "on enqueue
    /// failure the batch is re-prepended").
    fn requeue(&self, mut batch: Vec<RawMetric>) {
        let mut buf = self.inner.lock().unwrap();
        batch.append(&mut buf);
        *buf = batch;
    }
}

/// Flushes `buffer` into a `PROCESS_RAW_METRICS` job on `queue`. Returns the
/// number of metrics enqueued.
pub async fn flush_once(buffer: &RawMetricBuffer, queue: &dyn Queue) -> usize {
    let batch = match buffer.take_batch() {
        Some(b) => b,
        None => return 0,
    };
    let count = batch.len();
    let payload = serde_json::json!({ "metrics": batch });
    if let Err(e) = queue
        .enqueue(JobType::ProcessRawMetrics, payload, EnqueueOptions::default())
        .await
    {
        warn!("raw-metric flush failed, re-queuing batch: {:?}", e);
        buffer.requeue(batch);
        return 0;
    }
    count
}

/// The final, unconditional flush run once on shutdown.
pub async fn flush_shutdown(buffer: &RawMetricBuffer, queue: &dyn Queue) -> usize {
    let batch = buffer.take_all();
    if batch.is_empty() {
        return 0;
    }
    let count = batch.len();
    let payload = serde_json::json!({ "metrics": batch });
    if let Err(e) = queue
        .enqueue(JobType::ProcessRawMetrics, payload, EnqueueOptions::default())
        .await
    {
        warn!("shutdown flush failed, dropping {} metrics: {:?}", count, e);
        return 0;
    }
    count
}

/// Spawns the periodic flush ticker (spec §4.A "a periodic ticker (default
/// 5s) takes up to BATCH_SIZE items"). Returns a handle whose drop does not
/// stop the ticker; callers that need clean shutdown should `abort()` it
/// explicitly after calling `flush_shutdown`.
pub fn spawn_flush_ticker(
    buffer: Arc<RawMetricBuffer>,
    queue: Arc<dyn Queue>,
    interval_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            let flushed = flush_once(&buffer, queue.as_ref()).await;
            if flushed > 0 {
                trace!("flushed {} raw metrics", flushed);
            }
        }
    })
}

pub fn window_floor(ts_ms: i64) -> i64 {
    (ts_ms.div_euclid(WINDOW_WIDTH_MS)) * WINDOW_WIDTH_MS
}

#[cfg(test)]
mod test {
    use super::*;
    use obs_jobs::LocalQueue;

    fn metric(endpoint: &str) -> RawMetric {
        RawMetric {
            endpoint: endpoint.to_owned(),
            latency_ms: 10,
            status: 200,
            ts_ms: 0,
            request_size: None,
            response_size: None,
        }
    }

    #[test]
    fn overflow_drops_oldest_and_counts_it() {
        let buf = RawMetricBuffer::new(2);
        buf.push(metric("/a"));
        buf.push(metric("/b"));
        buf.push(metric("/c"));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.dropped_count(), 1);
    }

    #[tokio::test]
    async fn flush_once_is_noop_below_threshold() {
        let buf = RawMetricBuffer::new(1000);
        buf.push(metric("/a"));
        let queue = LocalQueue::new();
        let flushed = flush_once(&buf, &queue).await;
        assert_eq!(flushed, 0);
        assert_eq!(buf.len(), 1);
    }

    #[tokio::test]
    async fn flush_shutdown_drains_everything_regardless_of_threshold() {
        let buf = RawMetricBuffer::new(1000);
        buf.push(metric("/a"));
        buf.push(metric("/b"));
        let queue = LocalQueue::new();
        let flushed = flush_shutdown(&buf, &queue).await;
        assert_eq!(flushed, 2);
        assert!(buf.is_empty());
    }
}
