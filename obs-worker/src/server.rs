//! Process wiring for the worker binary: builds the backend/queue/
//! scheduler/registry, registers the default schedule rules, starts a
//! consumer pool when the job fabric is in local mode, and assembles the
//! small operator-facing `actix-web` app. Grounded on `obs-server::server`'s
//! shape, scoped down to the surface spec §4.E names for this process.

use std::sync::Arc;

use actix_web::{dev, web, App, HttpServer};
use obs_db::models::{MetricWindowEntity, WorkerStatsEntity};
use obs_db::{Backend, Gateway, MockBackend, PgBackend};
use obs_jobs::{
    default_rules, ConsumerPool, HandlerRegistry, JobContext, LocalQueue, LocalScheduler, Queue,
    RemoteQueue, RemoteScheduler, Scheduler,
};
use obs_settings::{JobFabricMode, Settings};

#[derive(Clone)]
pub struct WorkerState {
    pub settings: Arc<Settings>,
    pub worker_stats: Gateway<WorkerStatsEntity>,
    pub backend: Arc<dyn Backend>,
    pub queue: Arc<dyn Queue>,
    pub scheduler: Arc<dyn Scheduler>,
    pub registry: Arc<HandlerRegistry>,
}

pub struct BoundWorker {
    pub server: dev::Server,
    pub queue: Arc<dyn Queue>,
    /// `None` in remote mode: there is no in-process queue to drain here,
    /// the external broker's own consumers do that (spec §4.C "Remote
    /// variant").
    pub consumer_pool: Option<ConsumerPool>,
    pub shutdown_grace: std::time::Duration,
}

pub struct Worker;

impl Worker {
    pub async fn with_settings(settings: Settings) -> std::io::Result<BoundWorker> {
        let settings = Arc::new(settings);

        let url = url::Url::parse(&settings.database_url)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let backend: Arc<dyn Backend> = match url.scheme() {
            "mock" => Arc::new(MockBackend::new()),
            _ => Arc::new(
                PgBackend::new(&settings.database_url, settings.database_pool_max_size)
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?,
            ),
        };

        let metric_windows: Gateway<MetricWindowEntity> = Gateway::new(backend.clone());
        let worker_stats: Gateway<WorkerStatsEntity> = Gateway::new(backend.clone());

        let worker_url = settings
            .worker_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:4040".to_owned());

        // Honors `job_fabric.mode` the same way `obs-server` does: in local
        // mode this process owns the in-process `LocalQueue` it drains; in
        // remote mode it only talks to the external broker, so there is no
        // local queue for a `ConsumerPool` to pull from here.
        let (queue, local_queue): (Arc<dyn Queue>, Option<Arc<LocalQueue>>) =
            match settings.job_fabric.mode {
                JobFabricMode::Local => {
                    let lq = Arc::new(LocalQueue::new());
                    (lq.clone() as Arc<dyn Queue>, Some(lq))
                }
                JobFabricMode::Remote => {
                    (Arc::new(RemoteQueue::new(worker_url.clone())) as Arc<dyn Queue>, None)
                }
            };

        let scheduler: Arc<dyn Scheduler> = match settings.job_fabric.mode {
            JobFabricMode::Local => Arc::new(LocalScheduler::new(queue.clone())),
            JobFabricMode::Remote => Arc::new(RemoteScheduler::new(worker_url)),
        };
        for rule in default_rules::defaults() {
            if let Err(e) = scheduler.register(rule).await {
                warn!("failed to register default schedule rule: {:?}", e);
            }
        }

        let mode = match settings.job_fabric.mode {
            JobFabricMode::Local => obs_db::models::WorkerMode::Local,
            JobFabricMode::Remote => obs_db::models::WorkerMode::Remote,
        };
        let ctx = Arc::new(JobContext {
            metric_windows,
            worker_stats: worker_stats.clone(),
            backend: backend.clone(),
            queue: queue.clone(),
            scheduler: scheduler.clone(),
            mode,
        });
        let registry = Arc::new(HandlerRegistry::new(ctx));

        let consumer_pool = local_queue
            .map(|lq| ConsumerPool::spawn(lq, registry.clone(), settings.job_fabric.worker_count));

        let state = WorkerState {
            settings: settings.clone(),
            worker_stats,
            backend,
            queue: queue.clone(),
            scheduler,
            registry,
        };

        let host = settings.host.clone();
        let port = settings
            .worker_url
            .as_ref()
            .and_then(|u| url::Url::parse(u).ok())
            .and_then(|u| u.port())
            .unwrap_or(4040);

        let server = HttpServer::new(move || {
            App::new().app_data(web::Data::new(state.clone())).service(
                web::scope("")
                    .route("/worker/jobs", web::get().to(crate::routes::list_jobs))
                    .route("/worker/queue/stats", web::get().to(crate::routes::queue_stats))
                    .route(
                        "/worker/scheduler/jobs",
                        web::get().to(crate::routes::scheduler_jobs),
                    )
                    .route("/worker/stats", web::get().to(crate::routes::worker_stats))
                    .route("/jobs/enqueue", web::post().to(crate::routes::enqueue))
                    .route("/health", web::get().to(crate::routes::health)),
            )
        })
        .bind((host.as_str(), port))?
        .run();

        Ok(BoundWorker {
            server,
            queue,
            consumer_pool,
            shutdown_grace: std::time::Duration::from_secs(settings.job_fabric.shutdown_grace_secs),
        })
    }
}
