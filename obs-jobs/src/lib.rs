#[macro_use]
extern crate slog_scope;
extern crate validator_derive;

pub mod consumer;
pub mod default_rules;
pub mod error;
pub mod handlers;
pub mod job;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use consumer::ConsumerPool;
pub use error::JobError;
pub use job::{DeadJob, EnqueueOptions, Job, JobType, PayloadMap, QueueStats, ScheduleRule};
pub use queue::{LocalQueue, Queue, RemoteQueue};
pub use registry::{HandlerEntry, HandlerRegistry, JobContext};
pub use scheduler::{LocalScheduler, RemoteScheduler, Scheduler};

#[cfg(test)]
mod test {
    use super::*;
    use obs_db::{Backend, Gateway, MockBackend};
    use std::sync::Arc;
    use std::time::Duration;

    /// Spec §8 scenario: a job enqueued through `LocalQueue` and dispatched
    /// through the registry ends up aggregated into a `MetricWindow` row.
    #[tokio::test]
    async fn enqueued_metrics_job_runs_end_to_end_through_local_queue() {
        let backend: Arc<dyn Backend> = Arc::new(MockBackend::new());
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::new());
        let scheduler: Arc<dyn Scheduler> = Arc::new(LocalScheduler::new(queue.clone()));
        let ctx = Arc::new(JobContext {
            metric_windows: Gateway::new(backend.clone()),
            worker_stats: Gateway::new(backend.clone()),
            backend: backend.clone(),
            queue,
            scheduler,
            mode: obs_db::models::WorkerMode::Local,
        });
        let registry = HandlerRegistry::new(ctx.clone());
        let queue = LocalQueue::new();

        queue
            .enqueue(
                JobType::ProcessRawMetrics,
                serde_json::json!({
                    "metrics": [
                        {"endpoint": "/widgets", "latency_ms": 12, "status": 200, "ts_ms": 5_000}
                    ]
                }),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let job = queue.recv_timeout(Duration::from_millis(500)).unwrap();
        registry
            .dispatch(job.job_type, job.payload)
            .await
            .unwrap();

        let (rows, total) = ctx
            .metric_windows
            .list::<obs_db::models::MetricWindow>(obs_db::ListParams::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].endpoint, "/widgets");
    }
}
