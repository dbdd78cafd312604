//! The `Queue` trait and its two implementations (spec §4.C "pluggable job
//! queue"): `LocalQueue` runs entirely in-process on `crossbeam-channel` and
//! a `ScheduledThreadPool`; `RemoteQueue` models handing the same contract to
//! an external broker over HTTP, grounded the way the teacher's db pool
//! selection (`syncserver/src/db/mod.rs`) switches backend by configuration
//! rather than by call site.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use scheduled_thread_pool::ScheduledThreadPool;

use crate::error::JobError;
use crate::job::{DeadJob, EnqueueOptions, Job, JobType, QueueStats};
use obs_common::DLQ_RING_SIZE;

#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Job, JobError>;

    async fn stats(&self) -> Result<QueueStats, JobError>;

    async fn dead_letters(&self) -> Result<Vec<DeadJob>, JobError>;
}

struct Delayed {
    job: Job,
    ready_at: chrono::DateTime<Utc>,
}

struct Inner {
    ready: (Sender<Job>, Receiver<Job>),
    delayed: Mutex<Vec<Delayed>>,
    dead_letters: Mutex<VecDeque<DeadJob>>,
    in_flight: std::sync::atomic::AtomicI64,
}

/// In-process queue: a `crossbeam-channel` of ready jobs, a delayed-job list
/// swept by a `ScheduledThreadPool` tick, and a bounded dead-letter ring.
/// Retries re-enqueue with the backoff from `Job::backoff`; exhausted jobs
/// land in the ring (oldest evicted once it reaches `DLQ_RING_SIZE`).
pub struct LocalQueue {
    inner: Arc<Inner>,
    _pool: Arc<ScheduledThreadPool>,
}

impl LocalQueue {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            ready: unbounded(),
            delayed: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(VecDeque::with_capacity(DLQ_RING_SIZE)),
            in_flight: std::sync::atomic::AtomicI64::new(0),
        });
        let pool = Arc::new(ScheduledThreadPool::new(1));
        let sweep_inner = inner.clone();
        pool.execute_at_fixed_rate(
            StdDuration::from_millis(250),
            StdDuration::from_millis(250),
            move || sweep_delayed(&sweep_inner),
        );
        Self { inner, _pool: pool }
    }

    /// Pulls the next ready job, blocking the calling worker thread up to
    /// `timeout`. Used by the worker's consumer loop, not by handlers.
    pub fn recv_timeout(&self, timeout: StdDuration) -> Option<Job> {
        self.inner.ready.1.recv_timeout(timeout).ok()
    }

    pub fn mark_in_flight(&self, delta: i64) {
        self.inner
            .in_flight
            .fetch_add(delta, std::sync::atomic::Ordering::SeqCst);
    }

    /// Called by the worker after a handler fails: either re-enqueues with
    /// backoff or dead-letters the job (spec §4.C failure semantics).
    pub fn retry_or_dead_letter(&self, mut job: Job, reason: String) {
        job.attempts += 1;
        if job.exhausted() {
            let mut ring = self.inner.dead_letters.lock().unwrap();
            if ring.len() >= DLQ_RING_SIZE {
                ring.pop_front();
            }
            ring.push_back(DeadJob {
                job,
                reason,
                dead_at: Utc::now(),
            });
            return;
        }
        let ready_at = Utc::now() + job.backoff();
        self.inner
            .delayed
            .lock()
            .unwrap()
            .push(Delayed { job, ready_at });
    }

    /// Dead-letters `job` immediately, with no attempt increment and no
    /// backoff re-enqueue (spec §4.C: "Payload schema invalid -> no retry;
    /// DLQ with reason"). Distinct from `retry_or_dead_letter`, which is for
    /// handler failures that are still within their retry budget.
    pub fn dead_letter_now(&self, job: Job, reason: String) {
        let mut ring = self.inner.dead_letters.lock().unwrap();
        if ring.len() >= DLQ_RING_SIZE {
            ring.pop_front();
        }
        ring.push_back(DeadJob {
            job,
            reason,
            dead_at: Utc::now(),
        });
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn sweep_delayed(inner: &Arc<Inner>) {
    let now = Utc::now();
    let mut delayed = inner.delayed.lock().unwrap();
    let (due, rest): (Vec<Delayed>, Vec<Delayed>) =
        delayed.drain(..).partition(|d| d.ready_at <= now);
    *delayed = rest;
    drop(delayed);
    for d in due {
        let _ = inner.ready.0.send(d.job);
    }
}

#[async_trait]
impl Queue for LocalQueue {
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Job, JobError> {
        let max_attempts = opts.max_attempts.unwrap_or_else(|| job_type.default_max_attempts());
        let mut job = Job::new(job_type, payload, max_attempts);
        job.scheduled_for = opts.scheduled_for;
        let delay = opts
            .delay
            .unwrap_or_else(chrono::Duration::zero)
            .max(chrono::Duration::zero());
        if delay > chrono::Duration::zero() || opts.scheduled_for.is_some() {
            let ready_at = opts.scheduled_for.unwrap_or_else(|| Utc::now() + delay);
            self.inner
                .delayed
                .lock()
                .unwrap()
                .push(Delayed { job: job.clone(), ready_at });
        } else {
            self.inner
                .ready
                .0
                .send(job.clone())
                .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        }
        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats, JobError> {
        Ok(QueueStats {
            depth: self.inner.ready.1.len() as i64 + self.inner.delayed.lock().unwrap().len() as i64,
            in_flight: self.inner.in_flight.load(std::sync::atomic::Ordering::SeqCst),
            mode: "local".to_owned(),
        })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadJob>, JobError> {
        Ok(self.inner.dead_letters.lock().unwrap().iter().cloned().collect())
    }
}

/// Hands the same enqueue/stats/dead-letter contract to an external
/// SQS-style broker. The broker itself (delivery, visibility timeouts,
/// durability) is out of scope (spec §1 "external collaborators") — this
/// is the HTTP seam the core consumes, grounded on the `reqwest` usage seen
/// across the pack's service manifests rather than on any teacher code,
/// since the teacher has no remote queue equivalent.
pub struct RemoteQueue {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteQueue {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl Queue for RemoteQueue {
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Job, JobError> {
        let max_attempts = opts.max_attempts.unwrap_or_else(|| job_type.default_max_attempts());
        let mut job = Job::new(job_type, payload, max_attempts);
        job.scheduled_for = opts.scheduled_for;
        let resp = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&job)
            .send()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(JobError::QueueUnavailable(format!(
                "broker returned {}",
                resp.status()
            )));
        }
        Ok(job)
    }

    async fn stats(&self) -> Result<QueueStats, JobError> {
        let resp = self
            .client
            .get(format!("{}/jobs/stats", self.base_url))
            .send()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        resp.json::<QueueStats>()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))
    }

    async fn dead_letters(&self) -> Result<Vec<DeadJob>, JobError> {
        let resp = self
            .client
            .get(format!("{}/jobs/dead-letters", self.base_url))
            .send()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))?;
        resp.json::<Vec<DeadJob>>()
            .await
            .map_err(|e| JobError::QueueUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn enqueue_without_delay_is_immediately_ready() {
        let q = LocalQueue::new();
        q.enqueue(JobType::HealthCheck, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        let job = q.recv_timeout(StdDuration::from_millis(500));
        assert!(job.is_some());
    }

    #[tokio::test]
    async fn exhausted_job_is_dead_lettered_not_retried() {
        let q = LocalQueue::new();
        let job = Job::new(JobType::CleanupLogs, serde_json::json!({}), 1);
        q.retry_or_dead_letter(job, "boom".into());
        let dead = q.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, "boom");
    }

    #[tokio::test]
    async fn retryable_job_is_scheduled_with_backoff_not_dead_lettered() {
        let q = LocalQueue::new();
        let job = Job::new(JobType::CleanupLogs, serde_json::json!({}), 5);
        q.retry_or_dead_letter(job, "transient".into());
        let dead = q.dead_letters().await.unwrap();
        assert!(dead.is_empty());
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.depth, 1);
    }

    /// spec §4.C: `HEALTH_CHECK`'s `default_options.max_attempts` is 1, and
    /// an enqueue that doesn't pass `max_attempts` explicitly must pick that
    /// up from `JobType::default_max_attempts`, not a blanket hardcoded
    /// value.
    #[tokio::test]
    async fn enqueue_without_explicit_max_attempts_uses_the_job_types_default() {
        let q = LocalQueue::new();
        let job = q
            .enqueue(JobType::HealthCheck, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(job.max_attempts, 1);

        let job = q
            .enqueue(JobType::ProcessRawMetrics, serde_json::json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        assert_eq!(job.max_attempts, 3);
    }

    /// spec §4.C failure semantics: "Payload schema invalid -> no retry;
    /// DLQ with reason" — `dead_letter_now` must not touch `attempts` or
    /// reschedule, unlike `retry_or_dead_letter`.
    #[tokio::test]
    async fn dead_letter_now_skips_retry_and_lands_directly_in_the_dlq() {
        let q = LocalQueue::new();
        let job = Job::new(JobType::ProcessRawMetrics, serde_json::json!({}), 5);
        q.dead_letter_now(job, "invalid payload".into());
        let dead = q.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempts, 0);
        assert_eq!(dead[0].reason, "invalid payload");
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.depth, 0);
    }
}
