//! Process-wide structured logging init/reset, grounded on the teacher's
//! `syncserver::logging` (`src/logging.rs`): `slog` rooted at either a
//! MozLog-JSON drain (production) or a term-color drain (development),
//! both wrapped in `slog_envlogger` (so `RUST_LOG`/`LOG_LEVEL` still filter)
//! and `slog_async` (so logging itself never blocks the caller), with the
//! result installed as both the `slog_scope` global logger and the
//! `log`-facade backend via `slog_stdlog`.

use std::io;

use slog::{slog_o, Drain};

/// Installs the process-wide logger. `json` selects the MozLog-JSON drain
/// (used in production/staging so ingestion pipelines can parse it);
/// otherwise a human-readable terminal drain is used.
pub fn init_logging(json: bool) -> Result<(), slog::Error> {
    let logger = if json {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "obs".to_owned());
        let drain = slog_mozlog_json::MozLogJson::new(io::stdout())
            .logger_name(format!(
                "{}-{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            ))
            .msg_type(format!("{}:log", env!("CARGO_PKG_NAME")))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };
    // cancel_reset: see slog-rs/slog#169 — reset_logging() below handles
    // teardown explicitly instead.
    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().ok();
    Ok(())
}

pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
