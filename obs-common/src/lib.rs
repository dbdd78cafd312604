#[macro_use]
extern crate slog_scope;

pub mod envelope;
pub mod logging;
pub mod metrics;

use std::fmt;

pub use envelope::{ApiEnvelope, ErrorBody, ErrorMessage, Metadata, ValidationIssue};
pub use metrics::{metrics_from_opts, MetricError, Metrics};

/// Window width (ms) over which `MetricWindow` rows are aggregated.
pub const WINDOW_WIDTH_MS: i64 = 60_000;

/// Raw-metric buffer batch size; the flush ticker drains up to this many
/// at a time once the buffer reaches twice this size.
pub const BATCH_SIZE: usize = 50;

/// Depth of the in-memory dead-letter ring kept by the local queue variant.
pub const DLQ_RING_SIZE: usize = 100;

/// Maximum characters of a JSON response body captured into a snapshot.
pub const SNAPSHOT_BODY_CAP: usize = 10_000;

/// HKDF expansion to 32 bytes, lifted verbatim from the teacher's
/// `syncserver-common::hkdf_expand_32` (used there to derive Spanner/token
/// material from a key; used here to expand a content hash into the
/// `embedding` column's byte source, see `obs_db::entity::encode_embedding`).
pub fn hkdf_expand_32(info: &[u8], salt: Option<&[u8]>, key: &[u8]) -> Result<[u8; 32], String> {
    use hkdf::Hkdf;
    use sha2::Sha256;
    let mut result = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(salt, key);
    hkdf.expand(info, &mut result)
        .map_err(|e| format!("HKDF Error: {:?}", e))?;
    Ok(result)
}

#[macro_export]
macro_rules! from_error {
    ($from:ty, $to:ty, $to_kind:expr) => {
        impl From<$from> for $to {
            fn from(inner: $from) -> $to {
                $to_kind(inner).into()
            }
        }
    };
}

#[macro_export]
macro_rules! impl_fmt_display {
    ($error:ty, $kind:ty) => {
        impl fmt::Display for $error {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.kind, formatter)
            }
        }
    };
}

/// Implemented by error types that can report themselves to Sentry/metrics.
pub trait ReportableError {
    fn error_backtrace(&self) -> String;
    fn is_sentry_event(&self) -> bool;
    fn metric_label(&self) -> Option<String>;
}

/// Implemented by error types that can be constructed from an internal failure message.
pub trait InternalError {
    fn internal_error(message: String) -> Self;
}
