pub mod mock;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::entity::ColumnDef;
use crate::error::DbError;
use crate::filter::{ListParams, Predicate};

pub type JsonRow = Map<String, Value>;

/// The storage-execution seam behind `Gateway<E>`. Every method takes the
/// already-validated, already-typed shape the gateway produces from an
/// `Entity` + `ListParams`/`Predicate`s, and returns rows as JSON objects
/// the gateway deserializes into `E`. This keeps one table-shape-agnostic
/// trait object usable across every entity in spec §3, the same role the
/// teacher's `DbPool`/`Db` trait objects play for storage backends.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn list(
        &self,
        table: &'static str,
        columns: &'static [ColumnDef],
        predicates: &[Predicate],
        params: &ListParams,
    ) -> Result<(Vec<JsonRow>, i64), DbError>;

    async fn get(
        &self,
        table: &'static str,
        columns: &'static [ColumnDef],
        id: i64,
        include_deleted: bool,
    ) -> Result<Option<JsonRow>, DbError>;

    async fn get_first(
        &self,
        table: &'static str,
        columns: &'static [ColumnDef],
        predicates: &[Predicate],
        order_by: &str,
        order: crate::filter::Order,
        include_deleted: bool,
    ) -> Result<Option<JsonRow>, DbError>;

    async fn insert(&self, table: &'static str, values: JsonRow) -> Result<JsonRow, DbError>;

    async fn update(
        &self,
        table: &'static str,
        id: i64,
        values: JsonRow,
    ) -> Result<Option<JsonRow>, DbError>;

    async fn delete(
        &self,
        table: &'static str,
        id: i64,
        soft: bool,
    ) -> Result<Option<JsonRow>, DbError>;

    /// Physical-delete-only sweep used by log retention (`CLEANUP_LOGS`):
    /// hard-deletes up to `batch_size` rows older than `cutoff` on a
    /// timestamp column, returning how many were removed.
    async fn hard_delete_older_than(
        &self,
        table: &'static str,
        timestamp_column: &str,
        cutoff: chrono::NaiveDateTime,
        batch_size: i64,
    ) -> Result<i64, DbError>;

    /// `SELECT 1`-equivalent liveness probe (spec §4.E "heartbeat handler",
    /// §4.E "health aggregation handler"). Independent of every other
    /// method here so `/health` can report database reachability even when
    /// no table operation happens to run in the same request.
    async fn ping(&self) -> Result<(), DbError>;
}
