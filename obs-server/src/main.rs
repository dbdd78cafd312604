#[macro_use]
extern crate slog_scope;
extern crate validator_derive;

mod auth;
mod routes;
mod server;

use obs_settings::Settings;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);
    let settings = Settings::with_env_and_config_file(config_path.as_deref())?;
    obs_common::logging::init_logging(settings.node_env.is_production_like())
        .expect("logging failed to initialize");

    let banner = settings.banner();
    let bound = server::Server::with_settings(settings).await?;
    info!("obs-server listening on {}", banner);

    // actix-server installs its own SIGINT/SIGTERM handling, so this
    // resolves once a shutdown signal has already been accepted; the final
    // buffer flush runs after, same shape as the teacher's `server.await?`
    // followed immediately by teardown.
    bound.server.await?;
    info!("obs-server closing, flushing raw-metric buffer");
    obs_web::buffer::flush_shutdown(&bound.buffer, bound.queue.as_ref()).await;
    if let Some(pool) = bound.consumer_pool {
        pool.stop_pulling();
        pool.join(bound.shutdown_grace).await;
    }
    obs_common::logging::reset_logging();
    Ok(())
}
