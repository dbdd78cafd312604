//! Process wiring: the `ServerState` app-data every handler reads, the
//! `build_app!` macro that assembles the request pipeline in the teacher's
//! LIFO `.wrap()` order, and `Server::with_settings` which builds the
//! backend/queue/scheduler and binds the listener. Grounded on the
//! teacher's `syncserver::server` (`src/server/mod.rs`), generalized from
//! its single storage-only app to the full auth + capture + job-fabric
//! pipeline this system needs.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    dev, http::StatusCode, middleware::errhandlers::ErrorHandlers, web, App, HttpServer,
};
use obs_db::models::{
    LogEntity, MetricWindowEntity, RefreshTokenEntity, RequestSnapshotEntity, UserEntity,
    WorkerStatsEntity,
};
use obs_db::{Backend, Gateway, MockBackend, PgBackend, Sha256PasswordHasher};
use obs_jobs::{
    default_rules, ConsumerPool, EnqueueOptions, HandlerRegistry, JobContext, LocalQueue,
    LocalScheduler, Queue, RemoteQueue, RemoteScheduler, Scheduler,
};
use obs_settings::{JobFabricMode, Settings};
use obs_web::cors::build_cors;
use obs_web::middleware::{
    BodySizeLimit, Capture, CaptureState, Csrf, Favicon, LanguageDetect, RequestIdMiddlewareFactory,
    SecurityHeaders, ServerTiming,
};
use obs_web::{render_404, RawMetricBuffer};

use crate::auth::RequireAuth;

/// Global app-data handed to every handler. Cloning is cheap: every field is
/// an `Arc`-backed handle (a `Gateway` clones its inner `Arc<dyn Backend>`).
#[derive(Clone)]
pub struct ServerState {
    pub settings: Arc<Settings>,
    pub users: Gateway<UserEntity>,
    pub refresh_tokens: Gateway<RefreshTokenEntity>,
    pub logs: Gateway<LogEntity>,
    pub metric_windows: Gateway<MetricWindowEntity>,
    pub snapshots: Gateway<RequestSnapshotEntity>,
    pub worker_stats: Gateway<WorkerStatsEntity>,
    pub backend: Arc<dyn Backend>,
    pub queue: Arc<dyn Queue>,
    pub scheduler: Arc<dyn Scheduler>,
    pub buffer: Arc<RawMetricBuffer>,
    pub http_client: reqwest::Client,
}

/// Assembles the full actix-web `App`. Middleware is applied LIFO, so the
/// order below reads outermost-last: `RequestId` ends up wrapping
/// everything else, `Capture` sits closest to the handlers.
macro_rules! build_app {
    ($state:expr) => {{
        let state: ServerState = $state;
        let production = state.settings.node_env.is_production_like();
        let secret = Arc::new(state.settings.jwt_secret.clone());
        let cors: Cors = build_cors(state.settings.console_frontend_url.as_deref());
        let capture_state = CaptureState {
            buffer: state.buffer.clone(),
            snapshots: state.snapshots.clone(),
            logs: state.logs.clone(),
        };

        App::new()
            .app_data(web::Data::new(state))
            .wrap(Capture(capture_state))
            .wrap(SecurityHeaders::new(production))
            .wrap(BodySizeLimit::default())
            .wrap(ServerTiming::default())
            .wrap(LanguageDetect::default())
            .wrap(Csrf::default())
            .wrap(cors)
            .wrap(ErrorHandlers::new().handler(StatusCode::NOT_FOUND, render_404))
            .wrap(Favicon::default())
            .wrap(RequestIdMiddlewareFactory::default())
            .service(
                web::resource("/api/v1/users")
                    .route(web::get().to(crate::routes::users::list))
                    .route(web::post().to(crate::routes::users::create)),
            )
            .service(
                web::resource("/api/v1/users/{id}")
                    .route(web::get().to(crate::routes::users::get))
                    .route(web::put().to(crate::routes::users::update))
                    .route(web::patch().to(crate::routes::users::update))
                    .route(web::delete().to(crate::routes::users::delete)),
            )
            .service(web::resource("/auth/login").route(web::post().to(crate::routes::auth::login)))
            .service(
                web::resource("/auth/refresh").route(web::post().to(crate::routes::auth::refresh)),
            )
            .service(
                web::resource("/auth/logout")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::post().to(crate::routes::auth::logout)),
            )
            .service(
                web::resource("/auth/me")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::auth::me)),
            )
            .service(
                web::resource("/health")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::health::health)),
            )
            .service(
                web::resource("/logs")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::logs::list)),
            )
            .service(
                web::resource("/logs/stream")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::logs::stream)),
            )
            .service(
                web::resource("/metrics")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::metrics::list)),
            )
            .service(
                web::resource("/metrics/aggregate")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::metrics::aggregate)),
            )
            .service(
                web::resource("/replay")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::replay::list)),
            )
            .service(
                web::resource("/replay/{id}")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::replay::get)),
            )
            .service(
                web::resource("/replay/{id}/replay")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::post().to(crate::routes::replay::replay_snapshot)),
            )
            .service(
                web::resource("/error")
                    .wrap(RequireAuth::new(secret.clone()))
                    .route(web::get().to(crate::routes::chaos::error_endpoint)),
            )
    }};
}

pub struct Server;

/// A bound, not-yet-awaited server plus the handles `main` needs to flush
/// the raw-metric buffer and stop background tickers on shutdown.
pub struct BoundServer {
    pub server: dev::Server,
    pub buffer: Arc<RawMetricBuffer>,
    pub queue: Arc<dyn Queue>,
    /// `Some` only when `job_fabric.mode` is `Local`: the API process then
    /// embeds its own worker pool and drains the `LocalQueue` it enqueues
    /// onto, rather than relying on a separate `obs-worker` process to ever
    /// see those jobs (SPEC_FULL.md §2, "collapse into one process").
    pub consumer_pool: Option<ConsumerPool>,
    pub shutdown_grace: std::time::Duration,
}

impl Server {
    pub async fn with_settings(settings: Settings) -> std::io::Result<BoundServer> {
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

        let hasher: Arc<Sha256PasswordHasher> = Arc::new(Sha256PasswordHasher);
        let users = Gateway::with_hasher(backend.clone(), hasher);
        let refresh_tokens = Gateway::new(backend.clone());
        let logs = Gateway::new(backend.clone());
        let metric_windows = Gateway::new(backend.clone());
        let snapshots = Gateway::new(backend.clone());
        let worker_stats = Gateway::new(backend.clone());

        let worker_url = settings
            .worker_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:4040".to_owned());

        // In local mode the API process also owns the `LocalQueue` it
        // enqueues onto, so it keeps a concrete handle around (`local_queue`)
        // to hand a `ConsumerPool` below; in remote mode there is nothing
        // in-process to drain, the external broker's own consumers do that.
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

        let buffer = Arc::new(RawMetricBuffer::new(10_000));
        obs_web::buffer::spawn_flush_ticker(
            buffer.clone(),
            queue.clone(),
            settings.metrics_flush_interval_ms,
        );

        // Warm the queue with an initial health-check job so `worker_stats`
        // is populated even before the first scheduled tick.
        let _ = queue
            .enqueue(
                obs_jobs::JobType::HealthCheck,
                serde_json::json!({}),
                EnqueueOptions::default(),
            )
            .await;

        // A `ConsumerPool` only gets built in local mode: it drains the
        // `LocalQueue` above with the same `HandlerRegistry`
        // `obs-worker` would use standalone, embedding the worker pool
        // directly in the API process (SPEC_FULL.md §2's "collapse into
        // one process" local-mode shape) instead of leaving jobs to pile up
        // unconsumed until a separate worker process happens to share the
        // same in-memory queue, which it never can.
        let mode = match settings.job_fabric.mode {
            JobFabricMode::Local => obs_db::models::WorkerMode::Local,
            JobFabricMode::Remote => obs_db::models::WorkerMode::Remote,
        };
        let ctx = Arc::new(JobContext {
            metric_windows: metric_windows.clone(),
            worker_stats: worker_stats.clone(),
            backend: backend.clone(),
            queue: queue.clone(),
            scheduler: scheduler.clone(),
            mode,
        });
        let registry = Arc::new(HandlerRegistry::new(ctx));
        let consumer_pool = local_queue
            .map(|lq| ConsumerPool::spawn(lq, registry, settings.job_fabric.worker_count));

        let state = ServerState {
            settings: settings.clone(),
            users,
            refresh_tokens,
            logs,
            metric_windows,
            snapshots,
            worker_stats,
            backend,
            queue: queue.clone(),
            scheduler,
            buffer: buffer.clone(),
            http_client: reqwest::Client::new(),
        };

        let host = settings.host.clone();
        let port = settings.port;

        let server = HttpServer::new(move || build_app!(state.clone()))
            .bind((host.as_str(), port))?
            .run();

        Ok(BoundServer {
            server,
            buffer,
            queue,
            consumer_pool,
            shutdown_grace: std::time::Duration::from_secs(settings.job_fabric.shutdown_grace_secs),
        })
    }
}
