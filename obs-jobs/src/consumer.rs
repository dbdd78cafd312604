//! The shared consumer pool (spec §4.E / §5 worker loop): `worker_count`
//! threads pull ready jobs off a `LocalQueue`, dispatch them through the
//! `HandlerRegistry`, and feed failures back through
//! `LocalQueue::retry_or_dead_letter`. Lives in this crate rather than in
//! either binary so `obs-server` can embed one directly on its own
//! in-process queue when `job_fabric.mode` is `Local` (SPEC_FULL.md §2's
//! "collapse into one process" promise), while `obs-worker` spawns the same
//! pool as a standalone process. The teacher has no job-fabric consumer to
//! imitate directly, so this is grounded on the shape of its db pool
//! instead: a small fixed fleet of long-lived workers, each blocking on its
//! own channel recv and driving async work through a captured runtime
//! handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::queue::LocalQueue;
use crate::registry::HandlerRegistry;

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// A fixed pool of OS threads, each blocking on `LocalQueue::recv_timeout`
/// and dispatching onto the tokio runtime handle captured at spawn time.
pub struct ConsumerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl ConsumerPool {
    pub fn spawn(queue: Arc<LocalQueue>, registry: Arc<HandlerRegistry>, worker_count: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let rt = Handle::current();
        let handles = (0..worker_count.max(1))
            .map(|id| {
                let queue = queue.clone();
                let registry = registry.clone();
                let stop = stop.clone();
                let rt = rt.clone();
                std::thread::Builder::new()
                    .name(format!("obs-consumer-{}", id))
                    .spawn(move || run(queue, registry, stop, rt))
                    .expect("failed to spawn consumer thread")
            })
            .collect();
        Self { stop, handles }
    }

    /// Tells every consumer thread to stop pulling new jobs once its
    /// current poll returns (spec §5 shutdown: "stop pulling, drain
    /// in-flight, grace period").
    pub fn stop_pulling(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Waits up to `grace` for the consumer threads to notice `stop` and
    /// exit. A thread still mid-dispatch past the grace period is left to
    /// finish on its own rather than killed (spec §5: "a grace period, not
    /// a hard kill").
    pub async fn join(self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        for handle in self.handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let joined = tokio::task::spawn_blocking(move || {
                let _ = handle.join();
            });
            let _ = tokio::time::timeout(remaining, joined).await;
        }
    }
}

fn run(queue: Arc<LocalQueue>, registry: Arc<HandlerRegistry>, stop: Arc<AtomicBool>, rt: Handle) {
    while !stop.load(Ordering::SeqCst) {
        let job = match queue.recv_timeout(POLL_TIMEOUT) {
            Some(job) => job,
            None => continue,
        };
        queue.mark_in_flight(1);
        let result = rt.block_on(registry.dispatch(job.job_type, job.payload.clone()));
        queue.mark_in_flight(-1);
        if let Err(e) = result {
            warn!("job {} ({}) failed: {:?}", job.id, job.job_type.as_str(), e);
            // Spec §4.C failure semantics: a structurally invalid payload is
            // dead-lettered on the spot, never retried — unlike a handler
            // failure, which still consumes a retry attempt.
            if matches!(e, crate::error::JobError::InvalidPayload(_)) {
                queue.dead_letter_now(job, e.to_string());
            } else {
                queue.retry_or_dead_letter(job, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::job::{EnqueueOptions, JobType};
    use crate::queue::Queue;
    use crate::registry::JobContext;
    use crate::scheduler::{LocalScheduler, Scheduler};
    use obs_db::{Backend, Gateway, MockBackend};
    use std::time::Duration as StdDuration;

    fn ctx(queue: Arc<dyn Queue>) -> Arc<JobContext> {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let scheduler: Arc<dyn Scheduler> = Arc::new(LocalScheduler::new(queue.clone()));
        Arc::new(JobContext {
            metric_windows: Gateway::new(backend.clone()),
            worker_stats: Gateway::new(backend.clone()),
            backend,
            queue,
            scheduler,
            mode: obs_db::models::WorkerMode::Local,
        })
    }

    /// Spec §8 scenario, driven through the actual consumer pool rather
    /// than a direct `dispatch` call: an enqueued job is picked up off the
    /// shared queue and lands in the metric windows table.
    #[tokio::test]
    async fn consumer_pool_drains_an_enqueued_job() {
        let queue = Arc::new(LocalQueue::new());
        let registry = Arc::new(HandlerRegistry::new(ctx(queue.clone() as Arc<dyn Queue>)));

        let pool = ConsumerPool::spawn(queue.clone(), registry, 2);

        queue
            .enqueue(
                JobType::HealthCheck,
                serde_json::json!({}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        tokio::time::delay_for(StdDuration::from_millis(700)).await;
        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.depth, 0);
        assert_eq!(stats.in_flight, 0);

        pool.stop_pulling();
        pool.join(StdDuration::from_secs(2)).await;
    }
}
