//! Db error types, shaped after `syncserver-db-common::error` /
//! `syncstorage-db-common::error`: a `thiserror`-derived kind enum wrapped in
//! a struct carrying a backtrace and an HTTP status the web layer can lift
//! directly into a response.

use backtrace::Backtrace;
use obs_common::ReportableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbErrorKind {
    #[error("unknown filter operator: {}", _0)]
    UnknownOperator(String),

    #[error("unknown field: {}", _0)]
    UnknownField(String),

    #[error("invalid order_by field: {}", _0)]
    InvalidOrderBy(String),

    #[error("limit out of range: {}", _0)]
    LimitOutOfRange(i64),

    #[error("row not found")]
    NotFound,

    #[error("pool error: {}", _0)]
    Pool(String),

    #[error("query execution error: {}", _0)]
    Execution(String),

    #[error("serialization error: {}", _0)]
    Serialization(String),
}

#[derive(Debug)]
pub struct DbError {
    pub kind: DbErrorKind,
    pub status: u16,
    pub backtrace: Box<Backtrace>,
}

impl DbError {
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DbErrorKind::Pool(_) | DbErrorKind::Execution(_))
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for DbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<DbErrorKind> for DbError {
    fn from(kind: DbErrorKind) -> Self {
        let status = match &kind {
            DbErrorKind::UnknownOperator(_)
            | DbErrorKind::UnknownField(_)
            | DbErrorKind::InvalidOrderBy(_)
            | DbErrorKind::LimitOutOfRange(_) => 400,
            DbErrorKind::NotFound => 404,
            DbErrorKind::Pool(_) | DbErrorKind::Execution(_) | DbErrorKind::Serialization(_) => {
                500
            }
        };
        Self {
            kind,
            status,
            backtrace: Box::new(Backtrace::new()),
        }
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        DbErrorKind::Execution(e.to_string()).into()
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbErrorKind::Serialization(e.to_string()).into()
    }
}

impl ReportableError for DbError {
    fn error_backtrace(&self) -> String {
        format!("{:#?}", self.backtrace)
    }

    fn is_sentry_event(&self) -> bool {
        self.status >= 500
    }

    fn metric_label(&self) -> Option<String> {
        match &self.kind {
            DbErrorKind::NotFound => Some("db.not_found".to_owned()),
            _ => None,
        }
    }
}
