use obs_common::ReportableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("payload validation failed: {0}")]
    InvalidPayload(String),

    #[error("handler failed: {0}")]
    HandlerFailed(String),

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("db error: {0}")]
    Db(#[from] obs_db::DbError),
}

impl ReportableError for JobError {
    fn error_backtrace(&self) -> String {
        String::new()
    }

    fn is_sentry_event(&self) -> bool {
        !matches!(self, JobError::InvalidPayload(_))
    }

    fn metric_label(&self) -> Option<String> {
        match self {
            JobError::InvalidPayload(_) => Some("jobs.invalid_payload".to_owned()),
            JobError::UnknownJobType(_) => Some("jobs.unknown_type".to_owned()),
            _ => None,
        }
    }
}
