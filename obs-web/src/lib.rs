//! Request pipeline, raw-metric buffer, and replay engine (spec §4.A,
//! §4.E). Grounded on the teacher's `web` module
//! (`src/web/middleware/*.rs`, `syncserver/src/server/mod.rs`), kept on
//! its actix-web 3 `Transform`/`Service` shape throughout.

#[macro_use]
extern crate slog_scope;

pub mod buffer;
pub mod cors;
pub mod error;
pub mod geo;
pub mod middleware;
pub mod replay;
pub mod snapshot;

/// Header the replay engine sets on its outbound requests so the CSRF
/// stage (spec §4.A middleware #5) recognizes and bypasses a replayed
/// call.
pub const REPLAY_MARKER_HEADER: &str = "x-internal-replay";

pub use buffer::RawMetricBuffer;
pub use error::{render_404, ApiError, ApiErrorKind};
