#[macro_use]
extern crate slog_scope;

mod routes;
mod server;

use obs_settings::Settings;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::with_env_and_config_file(config_path.as_deref())?;
    obs_common::logging::init_logging(settings.node_env.is_production_like())
        .expect("logging failed to initialize");

    info!(
        "obs-worker listening, job fabric mode {:?}, {} consumer slot(s)",
        settings.job_fabric.mode, settings.job_fabric.worker_count
    );
    let bound = server::Worker::with_settings(settings).await?;

    // actix-server installs its own SIGINT/SIGTERM handling, so this
    // resolves once a shutdown signal has already been accepted. The
    // consumer pool is told to stop pulling new jobs and given a grace
    // period to let whatever it already pulled finish (spec §5 shutdown
    // sequence).
    bound.server.await?;
    info!("obs-worker closing, draining in-flight jobs");
    if let Some(pool) = bound.consumer_pool {
        pool.stop_pulling();
        pool.join(bound.shutdown_grace).await;
    }
    obs_common::logging::reset_logging();
    Ok(())
}
